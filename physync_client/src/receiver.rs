//! Snapshot receive loop.
//!
//! Reads the server stream, cuts it into fixed-length frames, and applies the
//! newest complete frame to the local world. Bytes short of a full frame stay
//! buffered until the rest arrives. If the store or world is busy the decoded
//! frame is kept and retried on the next iteration.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use bytes::BytesMut;
use physync_shared::{
    adapter::{ApplyOutcome, SharedWorld, SimulationAdapter},
    lifecycle::RunFlag,
    net::{decode_frame, FRAME_LEN},
    physics::PhysicsBackend,
    snapshot::SnapshotSet,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Complete frames decoded.
    pub frames: u64,
    /// Frames pushed into the local world.
    pub applied: u64,
}

/// Client-side receive loop over one server stream.
pub struct Receiver<S, P> {
    stream: S,
    adapter: SimulationAdapter,
    world: SharedWorld<P>,
    retry: Duration,
    buf: BytesMut,
    pending: Option<SnapshotSet>,
    stats: ReceiveStats,
}

impl<S, P> Receiver<S, P>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    P: PhysicsBackend,
{
    pub fn new(stream: S, adapter: SimulationAdapter, world: SharedWorld<P>, retry: Duration) -> Self {
        Self {
            stream,
            adapter,
            world,
            retry,
            buf: BytesMut::with_capacity(FRAME_LEN * 2),
            pending: None,
            stats: ReceiveStats::default(),
        }
    }

    /// Runs until `flag` is signalled or the server closes the stream, then
    /// closes the connection.
    pub async fn receive_loop(mut self, flag: Arc<RunFlag>) -> anyhow::Result<ReceiveStats> {
        let result = self.pump(&flag).await;
        let _ = self.stream.shutdown().await;
        info!(frames = self.stats.frames, applied = self.stats.applied, "Receiver stopped");
        result.map(|()| self.stats)
    }

    async fn pump(&mut self, flag: &RunFlag) -> anyhow::Result<()> {
        while !flag.is_stopped() {
            self.buf.reserve(FRAME_LEN);
            tokio::select! {
                _ = flag.wait() => break,
                read = self.stream.read_buf(&mut self.buf) => {
                    if read.context("tcp read")? == 0 {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                    self.drain_frames()?;
                }
                _ = tokio::time::sleep(self.retry), if self.pending.is_some() => {}
            }
            self.try_apply()?;
        }
        Ok(())
    }

    // Older complete frames are superseded by newer ones.
    fn drain_frames(&mut self) -> anyhow::Result<()> {
        while self.buf.len() >= FRAME_LEN {
            let frame = self.buf.split_to(FRAME_LEN);
            self.pending = Some(decode_frame(&frame)?);
            self.stats.frames += 1;
        }
        if !self.buf.is_empty() {
            debug!(buffered = self.buf.len(), needed = FRAME_LEN, "Partial frame, waiting for more");
        }
        Ok(())
    }

    fn try_apply(&mut self) -> anyhow::Result<()> {
        let Some(set) = self.pending else {
            return Ok(());
        };
        if self.adapter.store().try_write_all(&set).is_skipped() {
            debug!("Store busy, frame kept for retry");
            return Ok(());
        }
        match self.adapter.try_apply_shared(&self.world)? {
            ApplyOutcome::Applied => {
                self.pending = None;
                self.stats.applied += 1;
                if self.stats.applied == 1 {
                    info!("First snapshot applied");
                }
            }
            ApplyOutcome::Skipped => debug!("World busy, frame kept for retry"),
            ApplyOutcome::NotInitialized => {}
        }
        Ok(())
    }
}
