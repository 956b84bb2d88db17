//! Server wiring.
//!
//! Starts the two background tasks of the authoritative side:
//! - network: resolve + bind, then the accept loop
//! - broadcast: the fixed-interval scheduler
//!
//! A startup failure ends only the network task. The caller's simulation
//! loop keeps running and learns about it when joining.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use physync_shared::{
    config::SyncConfig,
    lifecycle::{Lifecycle, LoopKind},
    snapshot::SnapshotStore,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::{broadcast::BroadcastScheduler, listener::Listener, registry::ConnectionRegistry};

/// Authoritative side of the sync.
pub struct SyncServer {
    cfg: SyncConfig,
    store: Arc<SnapshotStore>,
    registry: Arc<ConnectionRegistry>,
    lifecycle: Lifecycle,
}

/// Handles to the running background tasks.
pub struct ServerTasks {
    pub network: JoinHandle<anyhow::Result<usize>>,
    pub broadcast: JoinHandle<u64>,
}

/// How the background tasks ended.
#[derive(Debug)]
pub struct ServerExit {
    /// Connections accepted, or the startup error.
    pub network: anyhow::Result<usize>,
    /// Broadcast ticks run.
    pub broadcast: anyhow::Result<u64>,
}

impl SyncServer {
    pub fn new(cfg: SyncConfig, store: Arc<SnapshotStore>, lifecycle: Lifecycle) -> Self {
        Self {
            cfg,
            store,
            registry: Arc::new(ConnectionRegistry::new()),
            lifecycle,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> BroadcastScheduler {
        BroadcastScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.cfg.broadcast_interval(),
            self.cfg.send_timeout(),
        )
    }

    /// Spawns both tasks. Binding happens inside the network task.
    pub fn start(&self) -> ServerTasks {
        let addr = self.cfg.server_addr.clone();
        let registry = Arc::clone(&self.registry);
        let flag = self.lifecycle.flag(LoopKind::NETWORK);
        let network = tokio::spawn(async move {
            let listener = match Listener::bind(&addr).await {
                Ok(l) => l,
                Err(e) => {
                    let error = format!("{e:#}");
                    error!(%addr, %error, "Server startup failed; network disabled");
                    return Err(e);
                }
            };
            Ok(listener.accept_loop(registry, flag).await)
        });
        ServerTasks {
            network,
            broadcast: self.spawn_broadcast(),
        }
    }

    /// Binds first, then spawns both tasks. Returns the bound address.
    pub async fn start_bound(&self) -> anyhow::Result<(SocketAddr, ServerTasks)> {
        let listener = Listener::bind(&self.cfg.server_addr).await?;
        let local = listener.local_addr();
        let registry = Arc::clone(&self.registry);
        let flag = self.lifecycle.flag(LoopKind::NETWORK);
        let network =
            tokio::spawn(async move { Ok::<_, anyhow::Error>(listener.accept_loop(registry, flag).await) });
        Ok((
            local,
            ServerTasks {
                network,
                broadcast: self.spawn_broadcast(),
            },
        ))
    }

    fn spawn_broadcast(&self) -> JoinHandle<u64> {
        tokio::spawn(self.scheduler().run(self.lifecycle.flag(LoopKind::BROADCAST)))
    }
}

impl ServerTasks {
    /// Waits for both tasks. Call after signalling stop.
    pub async fn join(self) -> ServerExit {
        let network = self.network.await.context("network task panicked").and_then(|r| r);
        let broadcast = self.broadcast.await.context("broadcast task panicked");
        info!(
            network = ?network.as_ref().map_err(|e| e.to_string()),
            broadcast = ?broadcast.as_ref().map_err(|e| e.to_string()),
            "Server tasks exited"
        );
        ServerExit { network, broadcast }
    }
}

/// Config bound to an ephemeral loopback port, for tests.
pub fn ephemeral_config(broadcast_interval_ms: u64) -> SyncConfig {
    SyncConfig {
        server_addr: "127.0.0.1:0".to_string(),
        broadcast_interval_ms,
        ..Default::default()
    }
}
