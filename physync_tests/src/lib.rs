//! Shared helpers for the socket-level integration tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use physync_server::{BroadcastScheduler, ConnectionRegistry, Listener};
use physync_shared::{
    lifecycle::{Lifecycle, LoopKind},
    math::Vec2,
    snapshot::{SnapshotSet, SnapshotStore},
};
use tokio::task::JoinHandle;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Polls `cond` every 5ms for up to `within`.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// All bodies at rest, except body 0 sits at `(x, 0)`.
pub fn marked_set(x: f32) -> SnapshotSet {
    let mut set = SnapshotSet::AT_REST;
    if let Some(body) = set.get_mut(0) {
        body.position = Vec2::new(x, 0.0);
    }
    set
}

/// A listener on an ephemeral port feeding a registry, with a scheduler the
/// test ticks by hand.
pub struct ManualServer {
    pub addr: SocketAddr,
    pub store: Arc<SnapshotStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub scheduler: BroadcastScheduler,
    pub lifecycle: Lifecycle,
    pub accept: JoinHandle<usize>,
}

impl ManualServer {
    pub async fn start(store: Arc<SnapshotStore>) -> anyhow::Result<Self> {
        let listener = Listener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr();
        let registry = Arc::new(ConnectionRegistry::new());
        let lifecycle = Lifecycle::new();
        let accept = tokio::spawn(listener.accept_loop(Arc::clone(&registry), lifecycle.flag(LoopKind::NETWORK)));
        let scheduler = BroadcastScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Duration::from_secs(3600),
            Duration::from_millis(500),
        );
        Ok(Self {
            addr,
            store,
            registry,
            scheduler,
            lifecycle,
            accept,
        })
    }

    /// Waits until exactly `n` connections are registered.
    pub async fn wait_for_clients(&self, n: usize) -> bool {
        eventually(Duration::from_secs(2), || self.registry.len() == n).await
    }

    pub async fn stop(self) -> anyhow::Result<usize> {
        self.lifecycle.signal_stop();
        Ok(tokio::time::timeout(Duration::from_secs(2), self.accept).await??)
    }
}
