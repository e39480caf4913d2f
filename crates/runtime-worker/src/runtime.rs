//! The worker main loop (§4.G): health probe, local-queue flush, concurrency
//! budget, batch claim, dispatch, batched heartbeat, outcome handling, and
//! graceful drain on shutdown.

use crate::shutdown::ShutdownOutcome;
use chrono::Utc;
use dashmap::DashMap;
use runtime_core::alert::{Alert, AlertSink, Severity};
use runtime_core::config::{keys, ConfigProvider};
use runtime_core::failure::{self, BackoffPolicy, Disposition, FailureClassification};
use runtime_core::handler::{HandlerContext, HandlerOutcome, HandlerRegistry};
use runtime_core::health::{HealthCheckOptions, HealthProbe, HealthReport, HealthStatus, DEFAULT_READINESS_QUEUE_THRESHOLD};
use runtime_core::identity::WorkerIdentity;
use runtime_core::pool::{warn_on_utilization, ConnectionPool, ErasedConnectionPool};
use runtime_core::queue_protocol::{QueueError, QueueProtocol};
use runtime_core::record::{FlowKind, ProcessingQueueRecord, RecordId};
use runtime_local_queue::{LocalOperationKind, LocalOperationQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything the main loop needs, resolved once at startup from a `ConfigProvider`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub max_concurrent: u32,
    pub batch_size: u32,
    pub poll_interval: Duration,
    pub lease_duration_s: i64,
    pub heartbeat_interval: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl RuntimeSettings {
    pub fn from_config(config: &dyn ConfigProvider) -> Result<Self, runtime_core::config::ConfigError> {
        Ok(Self {
            max_concurrent: config.get_u64(keys::MAX_CONCURRENT, 5)? as u32,
            batch_size: config.get_u64(keys::BATCH_SIZE, 10)? as u32,
            poll_interval: config.get_duration_ms(keys::POLL_INTERVAL_MS, 1000)?,
            lease_duration_s: config.get_u64(keys::LEASE_DURATION_S, 300)? as i64,
            heartbeat_interval: config.get_duration_s(keys::HEARTBEAT_INTERVAL_S, 100)?,
            max_attempts: config.get_u64(keys::MAX_ATTEMPTS, 3)? as u32,
            backoff: BackoffPolicy {
                base_s: config.get_f64(keys::BACKOFF_BASE_S, 1.0)?,
                max_s: config.get_f64(keys::BACKOFF_MAX_S, 3600.0)?,
                jitter: config.get_f64(keys::BACKOFF_JITTER, 0.2)?,
            },
        })
    }
}

struct DispatchOutput {
    record_id: RecordId,
    attempts_before: u32,
    outcome: Result<HandlerOutcome, tokio::task::JoinError>,
}

/// Drives one `flow_kind`'s claim/dispatch/heartbeat/drain cycle against a
/// `QueueProtocol` backend, routing every claimed record to the single
/// handler bound to this process. `P` is the connection pool each handler
/// invocation draws its own transactional handle from (§4.G, §4.I).
pub struct WorkerRuntime<Q: QueueProtocol + 'static, P: ConnectionPool + 'static, H: HealthProbe + 'static> {
    identity: WorkerIdentity,
    flow_kind: FlowKind,
    queue: Arc<Q>,
    connection_pool: Arc<P>,
    health_probe: Arc<H>,
    handlers: HandlerRegistry,
    settings: RuntimeSettings,
    alert_sink: Arc<dyn AlertSink>,
    local_queue: LocalOperationQueue,
    in_flight: Arc<DashMap<RecordId, CancellationToken>>,
    tasks: JoinSet<DispatchOutput>,
}

impl<Q, P, H> WorkerRuntime<Q, P, H>
where
    Q: QueueProtocol + 'static,
    P: ConnectionPool + 'static,
    P::Handle: 'static,
    H: HealthProbe + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: WorkerIdentity,
        queue: Arc<Q>,
        connection_pool: Arc<P>,
        health_probe: Arc<H>,
        handlers: HandlerRegistry,
        settings: RuntimeSettings,
        alert_sink: Arc<dyn AlertSink>,
        local_queue: LocalOperationQueue,
    ) -> Self {
        let flow_kind = identity.flow_kind().clone();
        Self {
            identity,
            flow_kind,
            queue,
            connection_pool,
            health_probe,
            handlers,
            settings,
            alert_sink,
            local_queue,
            in_flight: Arc::new(DashMap::new()),
            tasks: JoinSet::new(),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// On-demand database health (§4.D), as reported by this runtime's probe.
    pub async fn health(&self) -> HealthReport {
        self.health_probe.check(HealthCheckOptions { include_retry: false, include_migration_version: true }).await
    }

    /// Readiness (§6): healthy database *and* a local operation queue that
    /// isn't backed up past its soft threshold — a worker still answering
    /// health checks but silently piling up unflushed outcomes isn't ready
    /// to take more traffic.
    pub async fn readiness(&self) -> bool {
        let health = self.health().await;
        health.status == HealthStatus::Healthy && self.local_queue.len() < DEFAULT_READINESS_QUEUE_THRESHOLD
    }

    /// True once the local operation queue holds anything unflushed; used to
    /// pick the shutdown exit code (§6).
    pub fn local_queue_has_unflushed(&self) -> bool {
        !self.local_queue.is_empty()
    }

    /// Run until `shutdown` is cancelled, then drain in-flight work within
    /// `grace_period` before returning. `force`, if cancelled during drain
    /// (a second shutdown signal), cancels remaining tasks immediately.
    pub async fn run(&mut self, shutdown: CancellationToken, force: CancellationToken, grace_period: Duration) -> ShutdownOutcome {
        let mut last_heartbeat = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return self.drain(grace_period, force).await;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.handle_completion(result).await;
                    continue;
                }
            }

            if last_heartbeat.elapsed() >= self.settings.heartbeat_interval {
                self.heartbeat_in_flight().await;
                last_heartbeat = tokio::time::Instant::now();
            }

            self.tick().await;
        }
    }

    /// One iteration: health check, local-queue flush, budgeted claim, dispatch.
    async fn tick(&mut self) {
        let health = self.health_probe.check(HealthCheckOptions { include_retry: false, include_migration_version: true }).await;
        if health.status == HealthStatus::Unhealthy {
            tracing::warn!(flow_kind = %self.flow_kind, "database unhealthy, skipping claim this tick");
            self.alert_sink
                .emit(Alert::new(Severity::Critical, "database unhealthy").with_detail(health.error.unwrap_or_default()))
                .await;
            return;
        }

        self.flush_local_queue().await;
        warn_on_utilization(self.flow_kind.as_str(), self.connection_pool.snapshot());

        let budget = self.settings.max_concurrent.saturating_sub(self.in_flight.len() as u32);
        if budget == 0 {
            return;
        }
        let limit = budget.min(self.settings.batch_size);

        match self
            .queue
            .claim(&self.flow_kind, &self.identity.as_claimed_by(), limit, self.settings.lease_duration_s)
            .await
        {
            Ok(records) => {
                for record in records {
                    self.dispatch(record);
                }
            }
            Err(QueueError::Transient(msg)) => {
                tracing::warn!(flow_kind = %self.flow_kind, error = %msg, "transient error claiming batch");
            }
            Err(err) => {
                tracing::error!(flow_kind = %self.flow_kind, error = %err, "error claiming batch");
            }
        }
    }

    /// Replay outcomes buffered while the database was unreachable.
    async fn flush_local_queue(&mut self) {
        if self.local_queue.is_empty() {
            return;
        }
        let entries = match self.local_queue.drain() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, "failed to drain local operation queue");
                return;
            }
        };

        let mut unresolved = Vec::new();
        for entry in entries {
            let applied = match &entry.operation {
                LocalOperationKind::Complete { record_id, worker_id, result } => {
                    self.queue.complete(*record_id, worker_id, result.clone()).await
                }
                LocalOperationKind::ApplyDisposition { record_id, worker_id, disposition, error_message } => {
                    self.queue
                        .apply_disposition(*record_id, worker_id, disposition.clone(), error_message)
                        .await
                }
            };
            if let Err(err) = applied {
                tracing::warn!(error = %err, "failed to replay buffered operation, re-queuing");
                unresolved.push(entry);
            }
        }

        if !unresolved.is_empty() {
            if let Err(err) = self.local_queue.requeue(unresolved) {
                tracing::error!(error = %err, "failed to persist unresolved local operation queue entries");
            }
        }
    }

    fn dispatch(&mut self, record: ProcessingQueueRecord) {
        let record_id = record.id;
        let attempts_before = record.attempts;
        let worker_id = self.identity.as_claimed_by();
        let cancellation = CancellationToken::new();
        self.in_flight.insert(record_id, cancellation.clone());

        let handler = match self.handlers.get(&record.flow_kind) {
            Some(handler) => handler,
            None => {
                tracing::error!(flow_kind = %record.flow_kind, "no handler registered for claimed flow_kind");
                self.in_flight.remove(&record_id);
                return;
            }
        };

        let queue = self.queue.clone();
        let db: Arc<dyn ErasedConnectionPool> = self.connection_pool.clone();
        let logger = tracing::info_span!("record", record_id = %record_id, flow_kind = %record.flow_kind);
        self.tasks.spawn(async move {
            if let Err(err) = queue.mark_processing(record_id, &worker_id).await {
                tracing::warn!(record_id = %record_id, error = %err, "failed to mark record processing");
            }
            let ctx = HandlerContext { record, cancellation, logger, db };
            let outcome = handler.handle(ctx).await;
            DispatchOutput { record_id, attempts_before, outcome: Ok(outcome) }
        });
    }

    async fn handle_completion(&mut self, result: Result<DispatchOutput, tokio::task::JoinError>) {
        let output = match result {
            Ok(output) => output,
            Err(join_err) => {
                tracing::error!(error = %join_err, "dispatch task join error");
                return;
            }
        };

        let record_id = output.record_id;
        self.in_flight.remove(&record_id);
        let worker_id = self.identity.as_claimed_by();

        let outcome = match output.outcome {
            Ok(outcome) => outcome,
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(record_id = %record_id, "handler panicked, treating as retryable failure");
                HandlerOutcome::Retryable("handler panicked".to_string())
            }
            Err(join_err) => {
                tracing::error!(record_id = %record_id, error = %join_err, "handler task failed");
                HandlerOutcome::Retryable(join_err.to_string())
            }
        };

        match outcome {
            HandlerOutcome::Success(payload) => {
                if let Err(err) = self.queue.complete(record_id, &worker_id, payload.clone()).await {
                    self.buffer_or_log(LocalOperationKind::Complete { record_id, worker_id, result: payload }, err).await;
                }
            }
            HandlerOutcome::Cancelled => {
                tracing::info!(record_id = %record_id, "handler cancelled, leaving lease to expire");
            }
            HandlerOutcome::Retryable(message) | HandlerOutcome::NonRetryable(message) => {
                let classification = if matches!(outcome_kind(&outcome), Kind::Retryable) {
                    FailureClassification::Retryable
                } else {
                    FailureClassification::NonRetryable
                };
                let disposition = failure::decide(
                    classification,
                    output.attempts_before,
                    self.settings.max_attempts,
                    self.settings.backoff,
                    Utc::now(),
                );
                self.apply_disposition(record_id, worker_id, disposition, message).await;
            }
        }
    }

    async fn apply_disposition(&mut self, record_id: RecordId, worker_id: String, disposition: Disposition, message: String) {
        if matches!(disposition, Disposition::Dead) {
            self.alert_sink
                .emit(Alert::new(Severity::Warning, "record dead-lettered").with_detail(format!("record_id={record_id}")))
                .await;
        }
        if let Err(err) = self
            .queue
            .apply_disposition(record_id, &worker_id, disposition.clone(), &message)
            .await
        {
            self.buffer_or_log(
                LocalOperationKind::ApplyDisposition { record_id, worker_id, disposition, error_message: message },
                err,
            )
            .await;
        }
    }

    async fn buffer_or_log(&mut self, operation: LocalOperationKind, err: QueueError) {
        tracing::warn!(error = %err, "queue unreachable, buffering outcome locally");
        if let Err(local_err) = self.local_queue.enqueue(operation) {
            tracing::error!(error = %local_err, "local operation queue rejected outcome, it is lost");
            self.alert_sink
                .emit(Alert::new(Severity::Critical, "local operation queue full, outcome dropped"))
                .await;
        }
    }

    async fn heartbeat_in_flight(&self) {
        let ids: Vec<RecordId> = self.in_flight.iter().map(|e| *e.key()).collect();
        if ids.is_empty() {
            return;
        }
        match self
            .queue
            .heartbeat(&ids, &self.identity.as_claimed_by(), self.settings.lease_duration_s)
            .await
        {
            Ok(renewed) => {
                if renewed.len() < ids.len() {
                    tracing::warn!(
                        renewed = renewed.len(),
                        expected = ids.len(),
                        "some in-flight leases were not renewed, likely already reclaimed"
                    );
                }
            }
            Err(err) => tracing::warn!(error = %err, "batched heartbeat failed"),
        }
    }

    /// Stop claiming, let in-flight tasks finish within `grace_period`, then
    /// cancel anything still running.
    async fn drain(&mut self, grace_period: Duration, force: CancellationToken) -> ShutdownOutcome {
        tracing::info!(flow_kind = %self.flow_kind, in_flight = self.in_flight.len(), "draining in-flight records");

        let deadline = tokio::time::sleep(grace_period);
        tokio::pin!(deadline);

        loop {
            if self.tasks.is_empty() {
                return ShutdownOutcome::Clean;
            }
            tokio::select! {
                Some(result) = self.tasks.join_next() => {
                    self.handle_completion(result).await;
                }
                _ = &mut deadline => {
                    for entry in self.in_flight.iter() {
                        entry.value().cancel();
                    }
                    tracing::warn!(remaining = self.tasks.len(), "drain grace period elapsed, cancelling remaining tasks");
                    self.tasks.shutdown().await;
                    return ShutdownOutcome::DrainTimedOut;
                }
                _ = force.cancelled() => {
                    for entry in self.in_flight.iter() {
                        entry.value().cancel();
                    }
                    tracing::warn!("forced shutdown requested, cancelling remaining tasks");
                    self.tasks.shutdown().await;
                    return ShutdownOutcome::Forced;
                }
            }
        }
    }
}

enum Kind {
    Retryable,
    NonRetryable,
}

fn outcome_kind(outcome: &HandlerOutcome) -> Kind {
    match outcome {
        HandlerOutcome::Retryable(_) => Kind::Retryable,
        _ => Kind::NonRetryable,
    }
}
