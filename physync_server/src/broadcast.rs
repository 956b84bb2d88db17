//! Periodic snapshot broadcast.
//!
//! Each tick reads the store once, encodes one frame, and scatters it to every
//! registered connection on its own task. Outcomes are gathered afterwards and
//! only then applied to the registry, so a slow or broken peer never delays or
//! aborts delivery to the others.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use physync_shared::{
    lifecycle::RunFlag,
    net::{encode_frame, ConnId},
    snapshot::{SnapshotStore, StoreAccess},
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, SendOutcome};

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// The store was busy, nothing was sent.
    pub skipped: bool,
    pub delivered: Vec<ConnId>,
    /// Peer buffer full; kept for the next tick.
    pub deferred: Vec<ConnId>,
    /// Hard failure; removed from the registry.
    pub dropped: Vec<ConnId>,
}

/// Pushes the current snapshot set to every connection at a fixed interval.
pub struct BroadcastScheduler {
    store: Arc<SnapshotStore>,
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    send_timeout: Duration,
    ticks: u64,
}

impl BroadcastScheduler {
    pub fn new(
        store: Arc<SnapshotStore>,
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            interval,
            send_timeout,
            ticks: 0,
        }
    }

    /// Number of ticks run so far, skipped ones included.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs one broadcast round. Never fails; per-connection errors only
    /// remove that connection.
    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport {
            tick: self.ticks,
            ..Default::default()
        };

        let StoreAccess::Ready(set) = self.store.try_read_all() else {
            debug!(tick = self.ticks, "Store busy, broadcast skipped");
            report.skipped = true;
            return report;
        };
        let frame = encode_frame(&set);

        // Peers whose send has not reported back yet.
        let mut pending = BTreeMap::new();
        let mut sends = JoinSet::new();
        for (id, sink) in self.registry.snapshot() {
            pending.insert(id, sink.peer_label());
            let frame = frame.clone();
            let timeout = self.send_timeout;
            sends.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, sink.send_frame(frame, timeout)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(anyhow::anyhow!("send timed out after {timeout:?}")),
                };
                (id, outcome)
            });
        }

        while let Some(joined) = sends.join_next().await {
            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Send task aborted");
                    continue;
                }
            };
            let peer = pending.remove(&id).unwrap_or_default();
            match outcome {
                Ok(SendOutcome::Delivered) => report.delivered.push(id),
                Ok(SendOutcome::Deferred) => {
                    debug!(conn_id = %id, %peer, "Peer buffer full, frame deferred");
                    report.deferred.push(id);
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(conn_id = %id, %peer, %error, "Send failed, dropping connection");
                    self.drop_conn(id, &mut report);
                }
            }
        }

        // Whatever is left panicked or was cancelled mid-send; its stream
        // state is unknown.
        for (id, peer) in pending {
            warn!(conn_id = %id, %peer, "Send did not complete, dropping connection");
            self.drop_conn(id, &mut report);
        }

        report.delivered.sort();
        report.deferred.sort();
        report.dropped.sort();
        report
    }

    fn drop_conn(&self, id: ConnId, report: &mut TickReport) {
        self.registry.remove(id);
        report.dropped.push(id);
    }

    /// Ticks every `interval` until `flag` is signalled. Returns the tick count.
    pub async fn run(mut self, flag: Arc<RunFlag>) -> u64 {
        info!(interval_ms = self.interval.as_millis() as u64, "Broadcast scheduler started");
        while !flag.is_stopped() {
            tokio::select! {
                _ = flag.wait() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            let report = self.tick().await;
            debug!(
                tick = report.tick,
                delivered = report.delivered.len(),
                deferred = report.deferred.len(),
                dropped = report.dropped.len(),
                "Broadcast tick"
            );
        }
        info!(ticks = self.ticks, "Broadcast scheduler stopped");
        self.ticks
    }
}
