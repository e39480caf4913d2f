//! Recovery controller (§4.J): periodically sweeps records whose lease
//! expired without a heartbeat back to `pending`, recovering from a crashed
//! or network-partitioned worker that never released its claim.

use chrono::Utc;
use runtime_core::alert::{Alert, AlertSink, Severity};
use runtime_core::queue_protocol::QueueProtocol;
use runtime_core::record::FlowKind;
use std::sync::Arc;
use std::time::Duration;

pub struct RecoveryController<Q: QueueProtocol> {
    queue: Arc<Q>,
    flow_kind: FlowKind,
    alert_sink: Arc<dyn AlertSink>,
    interval: Duration,
}

impl<Q: QueueProtocol> RecoveryController<Q> {
    pub fn new(queue: Arc<Q>, flow_kind: FlowKind, alert_sink: Arc<dyn AlertSink>, interval: Duration) -> Self {
        Self { queue, flow_kind, alert_sink, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Step 2 of the §4.J startup sequence (step 1, loading the local queue,
    /// already happened via `LocalOperationQueue::open` before this runs):
    /// reap any lease this worker's flow kind left orphaned across a restart.
    pub async fn startup(&self) -> u64 {
        tracing::info!(flow_kind = %self.flow_kind, "running startup lease recovery sweep");
        self.run_once().await
    }

    /// Run one sweep, reclaiming any record whose lease has already expired.
    /// Returns the number of records reclaimed.
    pub async fn run_once(&self) -> u64 {
        match self.queue.reap_orphans(&self.flow_kind, Utc::now()).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                let count = reclaimed.len() as u64;
                tracing::warn!(flow_kind = %self.flow_kind, count, "reclaimed orphaned leases");
                self.alert_sink
                    .emit(
                        Alert::new(Severity::Warning, "reclaimed orphaned leases")
                            .with_detail(format!("flow_kind={} count={count}", self.flow_kind)),
                    )
                    .await;
                count
            }
            Ok(_) => 0,
            Err(err) => {
                tracing::error!(flow_kind = %self.flow_kind, error = %err, "lease recovery sweep failed");
                0
            }
        }
    }
}

impl<Q: QueueProtocol + Send + Sync + 'static> RecoveryController<Q> {
    /// Spawn the periodic reaper (§4.F.6: swept "every `lease_duration_s`"),
    /// running alongside the worker's main loop for the life of the process.
    pub fn spawn_periodic(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // skip the immediate first tick, `startup()` already swept once
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
