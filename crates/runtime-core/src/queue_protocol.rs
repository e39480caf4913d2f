//! Queue protocol (§4.F): the at-most-one-claimant contract every backend
//! must uphold, regardless of which database it runs against.

use crate::error::{Categorizable, ErrorClass, RuntimeError};
use crate::failure::Disposition;
use crate::record::{FlowKind, ProcessingQueueRecord, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transient queue error: {0}")]
    Transient(String),
    #[error("permanent queue error: {0}")]
    Permanent(String),
    #[error("record {0} has no outstanding lease for this worker")]
    LeaseLost(RecordId),
}

/// Lets `QueueError` flow straight through `RetryingExecutor::run` (§4.C):
/// transient errors are retried, permanent ones and lost leases are not.
impl Categorizable for QueueError {
    fn category(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::Transient,
            Self::Permanent(_) => ErrorClass::Permanent,
            Self::LeaseLost(_) => ErrorClass::Unknown,
        }
    }
}

/// Implemented once per storage backend (Postgres is the only shipped one).
/// Every method must be safe to call concurrently from many worker processes
/// without external locking: the backend is the sole arbiter of ownership.
#[async_trait]
pub trait QueueProtocol: Send + Sync {
    /// Atomically claim up to `limit` `pending` (or expired-lease) records of
    /// `flow_kind`, set them `claimed_by`/`lease_expires_at`, and return them.
    /// No two concurrent callers may receive the same record (§8 invariant 1).
    async fn claim(
        &self,
        flow_kind: &FlowKind,
        worker_id: &str,
        limit: u32,
        lease_duration_s: i64,
    ) -> Result<Vec<ProcessingQueueRecord>, QueueError>;

    /// Extend the lease of records still owned by `worker_id`. Records whose
    /// lease already expired and were reclaimed by another worker are skipped.
    async fn heartbeat(
        &self,
        record_ids: &[RecordId],
        worker_id: &str,
        lease_duration_s: i64,
    ) -> Result<Vec<RecordId>, QueueError>;

    /// Transition a claimed record to `processing`.
    async fn mark_processing(&self, record_id: RecordId, worker_id: &str) -> Result<(), QueueError>;

    /// Transition a record to `completed`, clearing its lease, storing `result`
    /// (set iff `status = completed`, §3.1) and incrementing `attempts` to
    /// count the attempt that just succeeded.
    async fn complete(&self, record_id: RecordId, worker_id: &str, result: Option<Value>) -> Result<(), QueueError>;

    /// Apply a failure disposition computed by `failure::decide`.
    async fn apply_disposition(
        &self,
        record_id: RecordId,
        worker_id: &str,
        disposition: Disposition,
        error_message: &str,
    ) -> Result<(), QueueError>;

    /// Sweep records whose lease has expired back to `pending` (§4.J).
    /// Returns the ids reclaimed.
    async fn reap_orphans(&self, flow_kind: &FlowKind, as_of: DateTime<Utc>) -> Result<Vec<RecordId>, QueueError>;

    /// Queue depth for `flow_kind`, used by health/readiness reporting.
    async fn depth(&self, flow_kind: &FlowKind) -> Result<u64, QueueError>;
}

/// Recover a `QueueError` from the `RuntimeError` a `RetryingExecutor::run`
/// call wraps a `QueueProtocol` operation's errors in. The retry budget
/// itself is already spent by the time this runs; what's left is mapping
/// the executor's taxonomy back onto the caller-visible one.
pub fn queue_error_from_runtime(err: RuntimeError) -> QueueError {
    match err {
        RuntimeError::TransientExhausted { source, .. } => QueueError::Transient(source),
        RuntimeError::PermanentDatabase(msg) => QueueError::Permanent(msg),
        other => QueueError::Permanent(other.to_string()),
    }
}
