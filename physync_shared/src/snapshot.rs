//! Body snapshots and the shared snapshot store.
//!
//! The store is the only state shared between the simulation loop and the
//! network tasks. Every access is all-or-nothing over the whole set, so a
//! reader never sees some bodies from one step and some from the next.
//!
//! Access comes in two flavours:
//! - `try_*` methods never block. If another party holds the store they
//!   return [`StoreAccess::Skipped`] and the caller retries next iteration.
//! - `read_all`/`write_all` block briefly; use them off the hot loops.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError, TryLockError,
};

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Number of simulated bodies. Server and client must be built with the same value.
pub const BODY_COUNT: usize = 30;

/// Observable state of one body at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BodySnapshot {
    pub position: Vec2,
    /// Radians.
    pub orientation: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
}

impl BodySnapshot {
    pub const ZERO: Self = Self {
        position: Vec2::ZERO,
        orientation: 0.0,
        linear_velocity: Vec2::ZERO,
        angular_velocity: 0.0,
    };
}

/// One snapshot per body, indexed by body.
///
/// Index `i` names the same body on server and client for the lifetime of a
/// connection. Nothing on the wire identifies a body, so the body population
/// must not be reordered or resized while peers are connected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotSet {
    bodies: [BodySnapshot; BODY_COUNT],
}

impl Default for SnapshotSet {
    fn default() -> Self {
        Self::AT_REST
    }
}

impl SnapshotSet {
    /// Every body at rest at the origin.
    pub const AT_REST: Self = Self {
        bodies: [BodySnapshot::ZERO; BODY_COUNT],
    };

    pub const fn from_bodies(bodies: [BodySnapshot; BODY_COUNT]) -> Self {
        Self { bodies }
    }

    pub const fn len(&self) -> usize {
        BODY_COUNT
    }

    pub const fn is_empty(&self) -> bool {
        BODY_COUNT == 0
    }

    pub fn get(&self, index: usize) -> Option<&BodySnapshot> {
        self.bodies.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BodySnapshot> {
        self.bodies.get_mut(index)
    }

    pub fn bodies(&self) -> &[BodySnapshot; BODY_COUNT] {
        &self.bodies
    }

    pub fn iter(&self) -> impl Iterator<Item = &BodySnapshot> {
        self.bodies.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BodySnapshot> {
        self.bodies.iter_mut()
    }
}

/// Outcome of a non-blocking store access.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub enum StoreAccess<T> {
    /// The access went through.
    Ready(T),
    /// Another party held the store; nothing was read or written.
    Skipped,
}

impl<T> StoreAccess<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, StoreAccess::Skipped)
    }
}

/// Holds the current [`SnapshotSet`].
#[derive(Debug, Default)]
pub struct SnapshotStore {
    set: Mutex<SnapshotSet>,
    initialized: AtomicBool,
    generation: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `set`. Counts as initialized.
    pub fn with_set(set: SnapshotSet) -> Self {
        let store = Self::new();
        store.write_all(&set);
        store
    }

    /// Replaces the whole set if the store is free.
    pub fn try_write_all(&self, set: &SnapshotSet) -> StoreAccess<()> {
        self.try_update(|current| *current = *set)
    }

    /// Replaces one body if the store is free.
    pub fn try_write(&self, index: usize, snapshot: BodySnapshot) -> anyhow::Result<StoreAccess<()>> {
        anyhow::ensure!(index < BODY_COUNT, "body index {index} out of range (0..{BODY_COUNT})");
        Ok(self.try_update(|current| current.bodies[index] = snapshot))
    }

    /// Copies out the whole set if the store is free.
    pub fn try_read_all(&self) -> StoreAccess<SnapshotSet> {
        match self.try_lock() {
            Some(guard) => StoreAccess::Ready(*guard),
            None => StoreAccess::Skipped,
        }
    }

    /// Mutates the set in place inside one critical section.
    pub fn try_update<F>(&self, f: F) -> StoreAccess<()>
    where
        F: FnOnce(&mut SnapshotSet),
    {
        match self.try_lock() {
            Some(mut guard) => {
                f(&mut guard);
                drop(guard);
                self.mark_written();
                StoreAccess::Ready(())
            }
            None => StoreAccess::Skipped,
        }
    }

    /// Blocking variant of [`Self::try_write_all`].
    pub fn write_all(&self, set: &SnapshotSet) {
        *self.lock() = *set;
        self.mark_written();
    }

    /// Blocking variant of [`Self::try_read_all`].
    pub fn read_all(&self) -> SnapshotSet {
        *self.lock()
    }

    /// True once at least one complete write has landed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Number of complete writes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    fn mark_written(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.initialized.store(true, Ordering::Release);
    }

    // The set is plain data, so a panic mid-write cannot leave it logically
    // invalid. Poisoning is ignored.
    fn try_lock(&self) -> Option<MutexGuard<'_, SnapshotSet>> {
        match self.set.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_set(seed: f32) -> SnapshotSet {
        let mut set = SnapshotSet::AT_REST;
        for (i, body) in set.iter_mut().enumerate() {
            let f = seed + i as f32;
            *body = BodySnapshot {
                position: Vec2::new(f, -f),
                orientation: f * 0.1,
                linear_velocity: Vec2::new(f * 2.0, f * 3.0),
                angular_velocity: -f,
            };
        }
        set
    }

    #[test]
    fn write_all_then_read_all_returns_exact_values() {
        let store = SnapshotStore::new();
        let set = numbered_set(7.25);

        assert_eq!(store.try_write_all(&set), StoreAccess::Ready(()));
        assert_eq!(store.try_read_all(), StoreAccess::Ready(set));
        assert_eq!(store.read_all(), set);
    }

    #[test]
    fn contended_access_is_skipped_not_blocked() {
        let store = SnapshotStore::new();
        let outcome = store.try_update(|_| {
            assert!(store.try_read_all().is_skipped());
            assert!(store.try_write_all(&SnapshotSet::AT_REST).is_skipped());
            assert!(store.try_write(0, BodySnapshot::ZERO).unwrap().is_skipped());
        });
        assert_eq!(outcome, StoreAccess::Ready(()));
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn initialized_only_after_first_write() {
        let store = SnapshotStore::new();
        assert!(!store.is_initialized());
        assert_eq!(store.generation(), 0);

        let _ = store.try_write_all(&numbered_set(0.0));
        assert!(store.is_initialized());
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn single_body_write_touches_only_that_index() {
        let store = SnapshotStore::with_set(numbered_set(1.0));
        let body = BodySnapshot {
            position: Vec2::new(1.5, -2.0),
            orientation: 0.3,
            ..BodySnapshot::ZERO
        };

        assert!(!store.try_write(4, body).unwrap().is_skipped());

        let read = store.read_all();
        assert_eq!(read.get(4), Some(&body));
        assert_eq!(read.get(3), numbered_set(1.0).get(3));
    }

    #[test]
    fn out_of_range_write_is_an_error() {
        let store = SnapshotStore::new();
        assert!(store.try_write(BODY_COUNT, BodySnapshot::ZERO).is_err());
        assert!(!store.is_initialized());
    }

    #[test]
    fn concurrent_writers_never_produce_torn_reads() {
        use std::sync::Arc;

        let store = Arc::new(SnapshotStore::with_set(numbered_set(0.0)));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for seed in 1..2_000 {
                    let _ = store.try_write_all(&numbered_set(seed as f32 * 100.0));
                }
            })
        };

        for _ in 0..2_000 {
            if let StoreAccess::Ready(set) = store.try_read_all() {
                let base = set.bodies()[0].position.x;
                for (i, body) in set.iter().enumerate() {
                    assert_eq!(body.position.x, base + i as f32);
                }
            }
        }
        writer.join().unwrap();
    }
}
