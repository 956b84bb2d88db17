//! Client wiring.
//!
//! The client owns exactly one connection: the one to the server. There is
//! no reconnect; if connecting fails or the server goes away the network task
//! ends and the local simulation keeps running on its last applied state.

use std::sync::Arc;

use anyhow::Context;
use physync_shared::{
    adapter::{SharedWorld, SimulationAdapter},
    config::SyncConfig,
    lifecycle::{Lifecycle, LoopKind},
    net::resolve_addr,
    physics::PhysicsBackend,
    snapshot::SnapshotStore,
};
use tokio::{net::TcpStream, task::JoinHandle};
use tracing::{error, info};

use crate::receiver::{ReceiveStats, Receiver};

/// Resolves `addr` and opens the server connection.
pub async fn connect(addr: &str) -> anyhow::Result<TcpStream> {
    let resolved = resolve_addr(addr).await?;
    let stream = TcpStream::connect(resolved)
        .await
        .with_context(|| format!("tcp connect {resolved}"))?;
    stream.set_nodelay(true).context("tcp set_nodelay")?;
    Ok(stream)
}

/// Passive observer side of the sync.
pub struct SyncClient {
    cfg: SyncConfig,
    adapter: SimulationAdapter,
    lifecycle: Lifecycle,
}

impl SyncClient {
    pub fn new(cfg: SyncConfig, store: Arc<SnapshotStore>, lifecycle: Lifecycle) -> Self {
        Self {
            cfg,
            adapter: SimulationAdapter::new(store),
            lifecycle,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        self.adapter.store()
    }

    /// Spawns the network task: connect, then receive into `world` until stopped.
    pub fn start<P>(&self, world: SharedWorld<P>) -> JoinHandle<anyhow::Result<ReceiveStats>>
    where
        P: PhysicsBackend + 'static,
    {
        let addr = self.cfg.server_addr.clone();
        let adapter = self.adapter.clone();
        let retry = self.cfg.receive_retry();
        let flag = self.lifecycle.flag(LoopKind::NETWORK);

        tokio::spawn(async move {
            info!(server = %addr, "Connecting to server");
            let stream = tokio::select! {
                _ = flag.wait() => return Ok(ReceiveStats::default()),
                res = connect(&addr) => match res {
                    Ok(stream) => stream,
                    Err(e) => {
                        let error = format!("{e:#}");
                        error!(server = %addr, %error, "Client startup failed; network disabled");
                        return Err(e);
                    }
                },
            };
            info!(server = %addr, "Connected to server");
            Receiver::new(stream, adapter, world, retry).receive_loop(flag).await
        })
    }
}
