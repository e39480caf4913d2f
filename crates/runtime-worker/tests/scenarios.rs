//! End-to-end scenarios against the in-memory queue double, covering the
//! main loop's handling of success, retry, dead-lettering, lease recovery,
//! and graceful shutdown.

use runtime_core::failure::BackoffPolicy;
use runtime_core::handler::HandlerRegistry;
use runtime_core::identity::WorkerIdentity;
use runtime_core::queue_protocol::QueueProtocol;
use runtime_core::record::{FlowKind, ProcessingQueueRecord, RecordStatus};
use runtime_core::{AlertSink, TracingSink};
use runtime_local_queue::LocalOperationQueue;
use runtime_testing::{
    AlwaysFails, AlwaysHealthy, FailNTimesThenSucceed, InMemoryConnectionPool, InMemoryQueueProtocol, RecordingHandler,
};
use runtime_worker::{RuntimeSettings, WorkerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        max_concurrent: 4,
        batch_size: 4,
        poll_interval: Duration::from_millis(20),
        lease_duration_s: 60,
        heartbeat_interval: Duration::from_secs(3600),
        max_attempts: 3,
        backoff: BackoffPolicy { base_s: 0.01, max_s: 0.05, jitter: 0.0 },
    }
}

fn local_queue() -> LocalOperationQueue {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    std::mem::forget(dir);
    LocalOperationQueue::open(path, 100).unwrap()
}

async fn run_until_idle<Q, P, H>(runtime: &mut WorkerRuntime<Q, P, H>, ticks: usize)
where
    Q: runtime_core::queue_protocol::QueueProtocol + 'static,
    P: runtime_core::pool::ConnectionPool + 'static,
    H: runtime_core::health::HealthProbe + 'static,
{
    let shutdown = CancellationToken::new();
    let force = CancellationToken::new();
    let shutdown_after = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20) * ticks as u32).await;
        shutdown_after.cancel();
    });
    runtime.run(shutdown, force, Duration::from_secs(5)).await;
}

/// S1: a record that succeeds on the first attempt is marked `completed`.
#[tokio::test]
async fn scenario_success_completes_record() {
    let queue = Arc::new(InMemoryQueueProtocol::new());
    let record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({"ok": true}), 3);
    let id = record.id;
    queue.seed(record).await;

    let handler = Arc::new(RecordingHandler::new());
    let handlers = HandlerRegistry::new().register("demo", handler.clone());
    let identity = WorkerIdentity::new(FlowKind::new("demo"), "host", "1");
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingSink);

    let mut runtime = WorkerRuntime::new(
        identity,
        queue.clone(),
        Arc::new(InMemoryConnectionPool::new(5)),
        Arc::new(AlwaysHealthy),
        handlers,
        settings(),
        alert_sink,
        local_queue(),
    );

    run_until_idle(&mut runtime, 5).await;

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Completed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.result, Some(serde_json::json!({"ok": true})));
    assert_eq!(handler.seen_ids().await, vec![id]);
}

/// S2: a retryable failure goes back to `pending` with `attempts` incremented
/// and eventually succeeds once the handler stops failing.
#[tokio::test]
async fn scenario_retry_then_success() {
    let queue = Arc::new(InMemoryQueueProtocol::new());
    let record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({}), 5);
    let id = record.id;
    queue.seed(record).await;

    let handlers = HandlerRegistry::new().register("demo", Arc::new(FailNTimesThenSucceed::new(2)));
    let identity = WorkerIdentity::new(FlowKind::new("demo"), "host", "1");
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingSink);

    let mut runtime = WorkerRuntime::new(
        identity,
        queue.clone(),
        Arc::new(InMemoryConnectionPool::new(5)),
        Arc::new(AlwaysHealthy),
        handlers,
        settings(),
        alert_sink,
        local_queue(),
    );

    run_until_idle(&mut runtime, 20).await;

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Completed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.result, Some(serde_json::json!({"ok": true})));
}

/// S3: a non-retryable failure fails the record immediately, without
/// consuming the full attempt budget.
#[tokio::test]
async fn scenario_non_retryable_fails_immediately() {
    let queue = Arc::new(InMemoryQueueProtocol::new());
    let record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({}), 5);
    let id = record.id;
    queue.seed(record).await;

    let handlers = HandlerRegistry::new().register("demo", Arc::new(AlwaysFails::non_retryable()));
    let identity = WorkerIdentity::new(FlowKind::new("demo"), "host", "1");
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingSink);

    let mut runtime = WorkerRuntime::new(
        identity,
        queue.clone(),
        Arc::new(InMemoryConnectionPool::new(5)),
        Arc::new(AlwaysHealthy),
        handlers,
        settings(),
        alert_sink,
        local_queue(),
    );

    run_until_idle(&mut runtime, 5).await;

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Failed);
    assert_eq!(stored.attempts, 1);
}

/// S4: a record that keeps failing retryably is dead-lettered once its
/// attempt budget is exhausted, never retried past `max_attempts`.
#[tokio::test]
async fn scenario_exhausted_retries_dead_letters() {
    let queue = Arc::new(InMemoryQueueProtocol::new());
    let record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({}), 2);
    let id = record.id;
    queue.seed(record).await;

    let handlers = HandlerRegistry::new().register("demo", Arc::new(AlwaysFails::retryable()));
    let identity = WorkerIdentity::new(FlowKind::new("demo"), "host", "1");
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingSink);

    let mut runtime = WorkerRuntime::new(
        identity,
        queue.clone(),
        Arc::new(InMemoryConnectionPool::new(5)),
        Arc::new(AlwaysHealthy),
        handlers,
        settings(),
        alert_sink,
        local_queue(),
    );

    run_until_idle(&mut runtime, 20).await;

    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Dead);
    assert_eq!(stored.attempts, 2);
}

/// S5: a record whose lease has already expired is reclaimed back to
/// `pending` rather than left stuck, letting a fresh claim pick it up.
#[tokio::test]
async fn scenario_orphaned_lease_is_reclaimed() {
    let queue = InMemoryQueueProtocol::new();
    let mut record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({}), 3);
    record.status = RecordStatus::Processing;
    record.claimed_by = Some("dead-worker".to_string());
    record.lease_expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
    let id = record.id;
    queue.seed(record).await;

    let reclaimed = queue.reap_orphans(&FlowKind::new("demo"), chrono::Utc::now()).await.unwrap();

    assert_eq!(reclaimed, vec![id]);
    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Pending);
    assert!(stored.claimed_by.is_none());
}

/// S6: shutdown drains the in-flight record before returning `Clean`, rather
/// than abandoning it mid-processing.
#[tokio::test]
async fn scenario_graceful_shutdown_drains_in_flight() {
    let queue = Arc::new(InMemoryQueueProtocol::new());
    let record = ProcessingQueueRecord::new_pending(FlowKind::new("demo"), serde_json::json!({}), 3);
    let id = record.id;
    queue.seed(record).await;

    let handler = Arc::new(RecordingHandler::new());
    let handlers = HandlerRegistry::new().register("demo", handler.clone());
    let identity = WorkerIdentity::new(FlowKind::new("demo"), "host", "1");
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingSink);

    let mut runtime = WorkerRuntime::new(
        identity,
        queue.clone(),
        Arc::new(InMemoryConnectionPool::new(5)),
        Arc::new(AlwaysHealthy),
        handlers,
        settings(),
        alert_sink,
        local_queue(),
    );

    let shutdown = CancellationToken::new();
    let force = CancellationToken::new();
    let shutdown_after = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_after.cancel();
    });

    let outcome = runtime.run(shutdown, force, Duration::from_secs(5)).await;

    assert_eq!(outcome, runtime_worker::ShutdownOutcome::Clean);
    let stored = queue.get(id).await.unwrap();
    assert_eq!(stored.status, RecordStatus::Completed);
}
