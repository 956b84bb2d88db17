//! Live connection membership.
//!
//! The registry owns every live connection. Broadcasts take a point-in-time
//! copy via [`ConnectionRegistry::snapshot`] and do their I/O without
//! holding the registry lock.

use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use physync_shared::net::ConnId;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::debug;

/// Result of one non-failing send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The whole frame was handed to the transport.
    Delivered,
    /// The peer's buffer was full and nothing was written; try next tick.
    Deferred,
}

/// Upper bound on how long a send waits for the socket to report writable
/// before deferring.
pub const WRITABLE_WAIT: Duration = Duration::from_millis(20);

/// Writability wait for a send allowed `budget`. Stays well inside the budget
/// so a full peer buffer is reported as `Deferred` before the caller gives up.
pub fn writable_wait(budget: Duration) -> Duration {
    WRITABLE_WAIT.min(budget / 2)
}

/// One outbound connection. Hard failures are returned as `Err`.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Human-readable peer identity for logs.
    fn peer_label(&self) -> String;

    /// Sends one whole frame, or nothing at all if the peer cannot take data right now.
    ///
    /// `budget` is how long the caller waits for this send. A peer that can only
    /// defer must say so within it; a frame that cannot be finished within it
    /// is an error.
    async fn send_frame(&self, frame: Bytes, budget: Duration) -> anyhow::Result<SendOutcome>;
}

/// A TCP connection to one client.
pub struct TcpPeer {
    stream: tokio::sync::Mutex<TcpStream>,
    peer: SocketAddr,
}

impl TcpPeer {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: tokio::sync::Mutex::new(stream),
            peer,
        }
    }
}

impl fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpPeer").field("peer", &self.peer).finish()
    }
}

#[async_trait]
impl FrameSink for TcpPeer {
    fn peer_label(&self) -> String {
        self.peer.to_string()
    }

    async fn send_frame(&self, frame: Bytes, budget: Duration) -> anyhow::Result<SendOutcome> {
        let started = tokio::time::Instant::now();
        let mut stream = self.stream.lock().await;
        match tokio::time::timeout(writable_wait(budget), stream.writable()).await {
            Ok(ready) => ready.context("tcp writable")?,
            Err(_) => return Ok(SendOutcome::Deferred),
        }
        let written = match stream.try_write(&frame) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Ok(SendOutcome::Deferred);
            }
            Err(e) => return Err(e).context("tcp write"),
        };
        anyhow::ensure!(written > 0 || frame.is_empty(), "tcp write: connection closed");

        // Part of the frame is already on the wire; the rest must follow or the
        // stream loses frame alignment.
        if written < frame.len() {
            debug!(peer = %self.peer, written, total = frame.len(), "Partial write, finishing frame");
            let left = budget.saturating_sub(started.elapsed());
            tokio::time::timeout(left, stream.write_all(&frame[written..]))
                .await
                .map_err(|_| anyhow::anyhow!("tcp write remainder: timed out after {budget:?}"))?
                .context("tcp write remainder")?;
        }
        Ok(SendOutcome::Delivered)
    }
}

/// Thread-safe set of live connections, ordered by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: Mutex<BTreeMap<ConnId, Arc<dyn FrameSink>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Adding the same sink twice returns its existing id.
    pub fn add(&self, sink: Arc<dyn FrameSink>) -> ConnId {
        let mut conns = self.lock();
        if let Some((id, _)) = conns.iter().find(|(_, s)| Arc::ptr_eq(s, &sink)) {
            return *id;
        }
        let id = ConnId::new_unique();
        conns.insert(id, sink);
        id
    }

    /// Removes a connection. Returns false if it was not registered.
    pub fn remove(&self, id: ConnId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Point-in-time copy, safe to iterate while doing I/O.
    pub fn snapshot(&self) -> Vec<(ConnId, Arc<dyn FrameSink>)> {
        self.lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect()
    }

    pub fn ids(&self) -> Vec<ConnId> {
        self.lock().keys().copied().collect()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnId, Arc<dyn FrameSink>>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
