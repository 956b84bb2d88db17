//! Process-wide run/stop signalling.
//!
//! Each background loop category owns one [`RunFlag`]. Flags are set once and
//! never cleared. Loops either poll [`RunFlag::is_stopped`] every iteration or
//! race their wait against [`RunFlag::wait`], so stopping never has to
//! interrupt in-flight I/O.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bitflags::bitflags;
use tokio::sync::Notify;
use tracing::debug;

bitflags! {
    /// Background loop categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoopKind: u8 {
        /// Listener accept loop and client receive loop.
        const NETWORK = 1 << 0;
        /// Broadcast timer loop.
        const BROADCAST = 1 << 1;
    }
}

/// Cooperative stop signal for one loop category.
#[derive(Debug, Default)]
pub struct RunFlag {
    stopped: AtomicBool,
    notify: Notify,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Calling it again is a no-op.
    pub fn signal(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolves once the flag is set.
    pub async fn wait(&self) {
        // Register before checking so a concurrent signal is not lost.
        let notified = self.notify.notified();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

/// Owns one [`RunFlag`] per [`LoopKind`].
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    network: Arc<RunFlag>,
    broadcast: Arc<RunFlag>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag for one loop category. `kind` must name exactly one category.
    pub fn flag(&self, kind: LoopKind) -> Arc<RunFlag> {
        if kind == LoopKind::BROADCAST {
            Arc::clone(&self.broadcast)
        } else {
            Arc::clone(&self.network)
        }
    }

    /// Stops the given categories.
    pub fn stop(&self, kinds: LoopKind) {
        if kinds.contains(LoopKind::NETWORK) {
            self.network.signal();
        }
        if kinds.contains(LoopKind::BROADCAST) {
            self.broadcast.signal();
        }
        debug!(?kinds, "Stop signalled");
    }

    /// Stops every category. Idempotent.
    pub fn signal_stop(&self) {
        self.stop(LoopKind::all());
    }

    /// True if any of `kinds` has been stopped.
    pub fn is_stopped(&self, kinds: LoopKind) -> bool {
        (kinds.contains(LoopKind::NETWORK) && self.network.is_stopped())
            || (kinds.contains(LoopKind::BROADCAST) && self.broadcast.is_stopped())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let lc = Lifecycle::new();
        assert!(!lc.is_stopped(LoopKind::all()));
        lc.signal_stop();
        lc.signal_stop();
        assert!(lc.is_stopped(LoopKind::NETWORK));
        assert!(lc.is_stopped(LoopKind::BROADCAST));
    }

    #[test]
    fn stopping_one_category_leaves_the_other_running() {
        let lc = Lifecycle::new();
        lc.stop(LoopKind::BROADCAST);
        assert!(lc.flag(LoopKind::BROADCAST).is_stopped());
        assert!(!lc.flag(LoopKind::NETWORK).is_stopped());
    }

    #[tokio::test]
    async fn wait_wakes_on_signal_and_returns_immediately_after() {
        let lc = Lifecycle::new();
        let flag = lc.flag(LoopKind::NETWORK);
        let waiter = tokio::spawn(async move { flag.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        lc.signal_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        tokio::time::timeout(Duration::from_millis(50), lc.flag(LoopKind::NETWORK).wait())
            .await
            .expect("already-stopped flag resolves at once");
    }
}
