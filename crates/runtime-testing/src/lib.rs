//! In-memory test doubles for the task-processing runtime.
//!
//! `InMemoryQueueProtocol` reproduces the claim/heartbeat/complete/dead-letter
//! contract of [`runtime_core::queue_protocol::QueueProtocol`] over a guarded
//! `HashMap` instead of Postgres, so the worker main loop and its scenario
//! tests can run without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runtime_core::failure::{Disposition, FailureClassification};
use runtime_core::handler::{Handler, HandlerContext, HandlerOutcome};
use runtime_core::health::{HealthCheckOptions, HealthProbe, HealthReport};
use runtime_core::pool::{ConnectionPool, PoolError, PoolSnapshot};
use runtime_core::queue_protocol::{QueueError, QueueProtocol};
use runtime_core::record::{FlowKind, ProcessingQueueRecord, RecordId, RecordStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Guarded in-memory stand-in for a Postgres-backed queue. Not concurrency-safe
/// in the lock-free sense Postgres is: it uses a single mutex rather than
/// row-level locks, which is sufficient for tests exercising the protocol's
/// observable behavior rather than its concurrency control.
#[derive(Default, Clone)]
pub struct InMemoryQueueProtocol {
    records: Arc<Mutex<HashMap<RecordId, ProcessingQueueRecord>>>,
}

impl InMemoryQueueProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, record: ProcessingQueueRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn get(&self, id: RecordId) -> Option<ProcessingQueueRecord> {
        self.records.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl QueueProtocol for InMemoryQueueProtocol {
    async fn claim(
        &self,
        flow_kind: &FlowKind,
        worker_id: &str,
        limit: u32,
        lease_duration_s: i64,
    ) -> Result<Vec<ProcessingQueueRecord>, QueueError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut claimed = Vec::new();

        let mut candidates: Vec<RecordId> = records
            .values()
            .filter(|r| r.flow_kind == *flow_kind && r.status == RecordStatus::Pending && r.next_visible_at <= now)
            .map(|r| r.id)
            .collect();
        candidates.sort_by_key(|id| (records[id].created_at, *id));
        candidates.truncate(limit as usize);

        for id in candidates {
            if let Some(record) = records.get_mut(&id) {
                record.status = RecordStatus::Claimed;
                record.claimed_by = Some(worker_id.to_string());
                record.claimed_at = Some(now);
                record.lease_expires_at = Some(now + chrono::Duration::seconds(lease_duration_s));
                record.updated_at = now;
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn heartbeat(
        &self,
        record_ids: &[RecordId],
        worker_id: &str,
        lease_duration_s: i64,
    ) -> Result<Vec<RecordId>, QueueError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut renewed = Vec::new();
        for id in record_ids {
            if let Some(record) = records.get_mut(id) {
                if record.claimed_by.as_deref() == Some(worker_id)
                    && matches!(record.status, RecordStatus::Claimed | RecordStatus::Processing)
                {
                    record.lease_expires_at = Some(now + chrono::Duration::seconds(lease_duration_s));
                    renewed.push(*id);
                }
            }
        }
        Ok(renewed)
    }

    async fn mark_processing(&self, record_id: RecordId, worker_id: &str) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&record_id).ok_or(QueueError::LeaseLost(record_id))?;
        if record.claimed_by.as_deref() != Some(worker_id) || record.status != RecordStatus::Claimed {
            return Err(QueueError::LeaseLost(record_id));
        }
        record.status = RecordStatus::Processing;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, record_id: RecordId, worker_id: &str, result: Option<Value>) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&record_id).ok_or(QueueError::LeaseLost(record_id))?;
        if record.claimed_by.as_deref() != Some(worker_id) {
            return Err(QueueError::LeaseLost(record_id));
        }
        let now = Utc::now();
        record.status = RecordStatus::Completed;
        record.attempts += 1;
        record.result = result;
        record.completed_at = Some(now);
        record.claimed_by = None;
        record.lease_expires_at = None;
        record.updated_at = now;
        Ok(())
    }

    async fn apply_disposition(
        &self,
        record_id: RecordId,
        worker_id: &str,
        disposition: Disposition,
        error_message: &str,
    ) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&record_id).ok_or(QueueError::LeaseLost(record_id))?;
        if record.claimed_by.as_deref() != Some(worker_id) {
            return Err(QueueError::LeaseLost(record_id));
        }
        let now = Utc::now();
        record.attempts += 1;
        record.last_error = Some(error_message.to_string());
        record.claimed_by = None;
        record.lease_expires_at = None;
        record.updated_at = now;
        match disposition {
            Disposition::Retry { next_visible_at } => {
                record.status = RecordStatus::Pending;
                record.next_visible_at = next_visible_at;
            }
            Disposition::Failed => {
                record.status = RecordStatus::Failed;
                record.completed_at = Some(now);
            }
            Disposition::Dead => {
                record.status = RecordStatus::Dead;
                record.completed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn reap_orphans(&self, flow_kind: &FlowKind, as_of: DateTime<Utc>) -> Result<Vec<RecordId>, QueueError> {
        let mut records = self.records.lock().await;
        let mut reclaimed = Vec::new();
        for record in records.values_mut() {
            if record.flow_kind == *flow_kind
                && matches!(record.status, RecordStatus::Claimed | RecordStatus::Processing)
                && record.lease_expires_at.map(|t| t < as_of).unwrap_or(false)
            {
                record.status = RecordStatus::Pending;
                record.claimed_by = None;
                record.lease_expires_at = None;
                record.updated_at = Utc::now();
                reclaimed.push(record.id);
            }
        }
        Ok(reclaimed)
    }

    async fn depth(&self, flow_kind: &FlowKind) -> Result<u64, QueueError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| r.flow_kind == *flow_kind && r.status == RecordStatus::Pending).count() as u64)
    }
}

/// Reports `healthy` unconditionally, for tests that aren't exercising health behavior.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn check(&self, _options: HealthCheckOptions) -> HealthReport {
        HealthReport::classify("in-memory", true, true, 0, None, false, None, 1000)
    }
}

/// Fixed-capacity pool double that never actually blocks.
pub struct InMemoryConnectionPool {
    size: u32,
    checked_out: std::sync::atomic::AtomicU32,
}

impl InMemoryConnectionPool {
    pub fn new(size: u32) -> Self {
        Self { size, checked_out: std::sync::atomic::AtomicU32::new(0) }
    }
}

#[async_trait]
impl ConnectionPool for InMemoryConnectionPool {
    type Handle = ();

    async fn acquire(&self, _timeout: Duration) -> Result<Self::Handle, PoolError> {
        self.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn snapshot(&self) -> PoolSnapshot {
        let checked_out = self.checked_out.load(Ordering::SeqCst);
        PoolSnapshot {
            size: self.size,
            checked_out,
            overflow: 0,
            max_overflow: 0,
            utilization_percent: (checked_out as f64 / self.size.max(1) as f64) * 100.0,
        }
    }
}

/// Always reports success, echoing the record's payload back as the result.
pub struct AlwaysSucceeds;

#[async_trait]
impl Handler for AlwaysSucceeds {
    async fn handle(&self, ctx: HandlerContext) -> HandlerOutcome {
        HandlerOutcome::Success(Some(ctx.record.payload))
    }
}

/// Fails retryably `n` times (by invocation count, not by record identity),
/// then succeeds. Useful for exercising the retry/backoff path end to end.
pub struct FailNTimesThenSucceed {
    remaining: AtomicU32,
}

impl FailNTimesThenSucceed {
    pub fn new(n: u32) -> Self {
        Self { remaining: AtomicU32::new(n) }
    }
}

#[async_trait]
impl Handler for FailNTimesThenSucceed {
    async fn handle(&self, _ctx: HandlerContext) -> HandlerOutcome {
        let prev = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 { Some(n - 1) } else { Some(0) }
        });
        match prev {
            Ok(n) if n > 0 => HandlerOutcome::Retryable("simulated transient failure".to_string()),
            _ => HandlerOutcome::Success(Some(serde_json::json!({"ok": true}))),
        }
    }
}

/// Always fails with the given classification.
pub struct AlwaysFails {
    pub classification: FailureClassification,
}

impl AlwaysFails {
    pub fn retryable() -> Self {
        Self { classification: FailureClassification::Retryable }
    }

    pub fn non_retryable() -> Self {
        Self { classification: FailureClassification::NonRetryable }
    }
}

#[async_trait]
impl Handler for AlwaysFails {
    async fn handle(&self, _ctx: HandlerContext) -> HandlerOutcome {
        match self.classification {
            FailureClassification::Retryable => HandlerOutcome::Retryable("simulated permanent retryable failure".to_string()),
            FailureClassification::NonRetryable => HandlerOutcome::NonRetryable("simulated non-retryable failure".to_string()),
        }
    }
}

/// Records every record id it was invoked with, for assertions about
/// dispatch order and redelivery counts.
#[derive(Default, Clone)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<RecordId>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seen_ids(&self) -> Vec<RecordId> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, ctx: HandlerContext) -> HandlerOutcome {
        self.seen.lock().await.push(ctx.record.id);
        HandlerOutcome::Success(Some(ctx.record.payload.clone()))
    }
}
