//! Inbound connection acceptance.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use physync_shared::{lifecycle::RunFlag, net::resolve_addr};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, TcpPeer};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// TCP listener feeding the connection registry.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Resolves `addr` and binds to it.
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let resolved = resolve_addr(addr).await?;
        let listener = TcpListener::bind(resolved)
            .await
            .with_context(|| format!("tcp bind {resolved}"))?;
        let local_addr = listener.local_addr().context("tcp local_addr")?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections into `registry` until `flag` is signalled.
    /// Returns how many connections were accepted. The socket closes on return.
    pub async fn accept_loop(self, registry: Arc<ConnectionRegistry>, flag: Arc<RunFlag>) -> usize {
        info!(addr = %self.local_addr, "Listening for clients");
        let mut accepted = 0;
        while !flag.is_stopped() {
            tokio::select! {
                _ = flag.wait() => break,
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "set_nodelay failed");
                        }
                        let id = registry.add(Arc::new(TcpPeer::new(stream, peer)));
                        accepted += 1;
                        info!(conn_id = %id, %peer, clients = registry.len(), "Client connected");
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        info!(addr = %self.local_addr, accepted, "Listener stopped");
        accepted
    }
}

#[cfg(test)]
mod tests {
    use physync_shared::lifecycle::{Lifecycle, LoopKind};
    use tokio::net::TcpStream;

    use super::*;

    #[tokio::test]
    async fn accepted_connections_are_registered() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let registry = Arc::new(ConnectionRegistry::new());
        let lc = Lifecycle::new();
        let task = tokio::spawn(listener.accept_loop(Arc::clone(&registry), lc.flag(LoopKind::NETWORK)));

        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        for _ in 0..100 {
            if registry.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.len(), 2);

        lc.signal_stop();
        let accepted = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(accepted, 2);
    }

    #[tokio::test]
    async fn bind_failure_names_the_operation() {
        let first = Listener::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();
        let err = Listener::bind(&taken).await.err().expect("port already in use");
        assert!(format!("{err:#}").contains("tcp bind"), "{err:#}");
    }
}
