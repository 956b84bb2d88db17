//! Moves body state between a [`PhysicsBackend`] and the [`SnapshotStore`].
//!
//! - Server: [`SimulationAdapter::capture`] after every simulation step.
//! - Client: [`SimulationAdapter::apply`] after every received frame.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::{
    physics::PhysicsBackend,
    snapshot::{SnapshotStore, StoreAccess, BODY_COUNT},
};

/// A world shared between the simulation loop and a network task.
pub type SharedWorld<P> = Arc<Mutex<P>>;

/// Takes the world lock without blocking. Poisoning is ignored.
pub fn try_lock_world<P>(world: &Mutex<P>) -> Option<MutexGuard<'_, P>> {
    match world.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Result of pushing store contents into a local world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ApplyOutcome {
    /// Every body was overwritten.
    Applied,
    /// No remote frame has landed in the store yet; the world was left alone.
    NotInitialized,
    /// The store or the world was busy; retry next iteration.
    Skipped,
}

/// Bridges one physics world and one snapshot store.
#[derive(Debug, Clone)]
pub struct SimulationAdapter {
    store: Arc<SnapshotStore>,
}

impl SimulationAdapter {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Copies every body of `world` into the store in one critical section.
    pub fn capture<P>(&self, world: &P) -> anyhow::Result<StoreAccess<()>>
    where
        P: PhysicsBackend + ?Sized,
    {
        check_body_count(world)?;
        Ok(self.store.try_update(|set| {
            for (i, body) in set.iter_mut().enumerate() {
                *body = world.current_state(i);
            }
        }))
    }

    /// Overwrites every body of `world` from the store.
    pub fn apply<P>(&self, world: &mut P) -> anyhow::Result<ApplyOutcome>
    where
        P: PhysicsBackend + ?Sized,
    {
        check_body_count(world)?;
        if !self.store.is_initialized() {
            return Ok(ApplyOutcome::NotInitialized);
        }
        let StoreAccess::Ready(set) = self.store.try_read_all() else {
            return Ok(ApplyOutcome::Skipped);
        };
        for (i, body) in set.iter().enumerate() {
            world.apply_state(i, *body);
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Like [`Self::apply`], but gives up instead of waiting if the world is locked.
    pub fn try_apply_shared<P>(&self, world: &Mutex<P>) -> anyhow::Result<ApplyOutcome>
    where
        P: PhysicsBackend,
    {
        match try_lock_world(world) {
            Some(mut guard) => self.apply(&mut *guard),
            None => Ok(ApplyOutcome::Skipped),
        }
    }
}

fn check_body_count<P: PhysicsBackend + ?Sized>(world: &P) -> anyhow::Result<()> {
    anyhow::ensure!(
        world.body_count() == BODY_COUNT,
        "world has {} bodies, sync expects {BODY_COUNT}",
        world.body_count()
    );
    Ok(())
}
