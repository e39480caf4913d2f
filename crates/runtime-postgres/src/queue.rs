//! PostgreSQL implementation of `QueueProtocol` (§4.F).
//!
//! Claims use `SELECT ... FOR UPDATE SKIP LOCKED` inside a single statement
//! so that two concurrent claimants can never receive the same row.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runtime_core::failure::Disposition;
use runtime_core::queue_protocol::{queue_error_from_runtime, QueueError, QueueProtocol};
use runtime_core::record::{FlowKind, ProcessingQueueRecord, RecordId, RecordStatus};
use runtime_core::retry::{RetryPolicy, RetryingExecutor};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

fn classify(err: sqlx::Error) -> QueueError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => QueueError::Transient(err.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            tracing::error!(error = %err, "permanent database error");
            QueueError::Permanent(err.to_string())
        }
        _ => QueueError::Transient(err.to_string()),
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> Result<ProcessingQueueRecord, QueueError> {
    let status_str: String = row.get("status");
    let status = RecordStatus::from_str(&status_str)
        .map_err(|e| QueueError::Permanent(format!("unrecognized status in row: {e}")))?;
    let id: Uuid = row.get("id");
    let flow_kind: String = row.get("flow_kind");
    Ok(ProcessingQueueRecord {
        id: RecordId::from(id),
        flow_kind: FlowKind::new(flow_kind),
        payload: row.get("payload"),
        status,
        attempts: row.get::<i32, _>("attempts") as u32,
        max_attempts: row.get::<i32, _>("max_attempts") as u32,
        claimed_by: row.get("claimed_by"),
        claimed_at: row.get("claimed_at"),
        lease_expires_at: row.get("lease_expires_at"),
        next_visible_at: row.get("next_visible_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
        result: row.get("result"),
    })
}

/// Postgres-backed `QueueProtocol`. Cheap to clone: wraps a `PgPool` and a
/// `RetryingExecutor` (§4.C) that every statement runs through, so a
/// transient connection drop is retried before it ever reaches the worker
/// as a `QueueError::Transient`.
#[derive(Clone)]
pub struct PgQueueProtocol {
    pool: PgPool,
    executor: std::sync::Arc<RetryingExecutor>,
}

impl PgQueueProtocol {
    pub fn new(pool: PgPool, retry_policy: RetryPolicy) -> Self {
        Self { pool, executor: std::sync::Arc::new(RetryingExecutor::new(retry_policy)) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueueProtocol for PgQueueProtocol {
    async fn claim(
        &self,
        flow_kind: &FlowKind,
        worker_id: &str,
        limit: u32,
        lease_duration_s: i64,
    ) -> Result<Vec<ProcessingQueueRecord>, QueueError> {
        let lease_expires_at = Utc::now() + ChronoDuration::seconds(lease_duration_s);

        let rows = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    WITH claimable AS (
                        SELECT id
                        FROM processing_queue
                        WHERE flow_kind = $1
                          AND status = 'pending'
                          AND next_visible_at <= NOW()
                        ORDER BY created_at ASC, id ASC
                        LIMIT $2
                        FOR UPDATE SKIP LOCKED
                    )
                    UPDATE processing_queue
                    SET status = 'claimed',
                        claimed_by = $3,
                        claimed_at = NOW(),
                        lease_expires_at = $4,
                        updated_at = NOW()
                    WHERE id IN (SELECT id FROM claimable)
                    RETURNING id, flow_kind, payload, status, attempts, max_attempts,
                              claimed_by, claimed_at, lease_expires_at, next_visible_at,
                              last_error, created_at, updated_at, completed_at, result
                    "#,
                )
                .bind(flow_kind.as_str())
                .bind(limit as i64)
                .bind(worker_id)
                .bind(lease_expires_at)
                .fetch_all(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn heartbeat(
        &self,
        record_ids: &[RecordId],
        worker_id: &str,
        lease_duration_s: i64,
    ) -> Result<Vec<RecordId>, QueueError> {
        if record_ids.is_empty() {
            return Ok(Vec::new());
        }
        let lease_expires_at = Utc::now() + ChronoDuration::seconds(lease_duration_s);
        let ids: Vec<Uuid> = record_ids.iter().map(|r| r.0).collect();

        let rows = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    UPDATE processing_queue
                    SET lease_expires_at = $1,
                        updated_at = NOW()
                    WHERE id = ANY($2)
                      AND claimed_by = $3
                      AND status IN ('claimed', 'processing')
                    RETURNING id
                    "#,
                )
                .bind(lease_expires_at)
                .bind(&ids)
                .bind(worker_id)
                .fetch_all(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        Ok(rows.into_iter().map(|row| RecordId::from(row.get::<Uuid, _>("id"))).collect())
    }

    async fn mark_processing(&self, record_id: RecordId, worker_id: &str) -> Result<(), QueueError> {
        let result = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    UPDATE processing_queue
                    SET status = 'processing',
                        updated_at = NOW()
                    WHERE id = $1 AND claimed_by = $2 AND status = 'claimed'
                    "#,
                )
                .bind(record_id.0)
                .bind(worker_id)
                .execute(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(record_id));
        }
        Ok(())
    }

    async fn complete(&self, record_id: RecordId, worker_id: &str, result: Option<Value>) -> Result<(), QueueError> {
        let outcome = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    UPDATE processing_queue
                    SET status = 'completed',
                        attempts = attempts + 1,
                        result = $1,
                        completed_at = NOW(),
                        claimed_by = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $2 AND claimed_by = $3
                    "#,
                )
                .bind(result.clone())
                .bind(record_id.0)
                .bind(worker_id)
                .execute(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        if outcome.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(record_id));
        }
        Ok(())
    }

    async fn apply_disposition(
        &self,
        record_id: RecordId,
        worker_id: &str,
        disposition: Disposition,
        error_message: &str,
    ) -> Result<(), QueueError> {
        let result = self
            .executor
            .run(|| async {
                match disposition.clone() {
                    Disposition::Retry { next_visible_at } => sqlx::query(
                        r#"
                        UPDATE processing_queue
                        SET status = 'pending',
                            attempts = attempts + 1,
                            next_visible_at = $1,
                            last_error = $2,
                            claimed_by = NULL,
                            lease_expires_at = NULL,
                            updated_at = NOW()
                        WHERE id = $3 AND claimed_by = $4
                        "#,
                    )
                    .bind(next_visible_at)
                    .bind(error_message)
                    .bind(record_id.0)
                    .bind(worker_id)
                    .execute(&self.pool)
                    .await,
                    Disposition::Failed => sqlx::query(
                        r#"
                        UPDATE processing_queue
                        SET status = 'failed',
                            attempts = attempts + 1,
                            last_error = $1,
                            completed_at = NOW(),
                            claimed_by = NULL,
                            lease_expires_at = NULL,
                            updated_at = NOW()
                        WHERE id = $2 AND claimed_by = $3
                        "#,
                    )
                    .bind(error_message)
                    .bind(record_id.0)
                    .bind(worker_id)
                    .execute(&self.pool)
                    .await,
                    Disposition::Dead => sqlx::query(
                        r#"
                        UPDATE processing_queue
                        SET status = 'dead',
                            attempts = attempts + 1,
                            last_error = $1,
                            completed_at = NOW(),
                            claimed_by = NULL,
                            lease_expires_at = NULL,
                            updated_at = NOW()
                        WHERE id = $2 AND claimed_by = $3
                        "#,
                    )
                    .bind(error_message)
                    .bind(record_id.0)
                    .bind(worker_id)
                    .execute(&self.pool)
                    .await,
                }
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(record_id));
        }
        Ok(())
    }

    async fn reap_orphans(&self, flow_kind: &FlowKind, as_of: DateTime<Utc>) -> Result<Vec<RecordId>, QueueError> {
        let rows = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    UPDATE processing_queue
                    SET status = 'pending',
                        claimed_by = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE flow_kind = $1
                      AND status IN ('claimed', 'processing')
                      AND lease_expires_at < $2
                    RETURNING id
                    "#,
                )
                .bind(flow_kind.as_str())
                .bind(as_of)
                .fetch_all(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        let reclaimed: Vec<RecordId> = rows.into_iter().map(|row| RecordId::from(row.get::<Uuid, _>("id"))).collect();
        if !reclaimed.is_empty() {
            tracing::warn!(flow_kind = %flow_kind, count = reclaimed.len(), "reclaimed orphaned leases");
        }
        Ok(reclaimed)
    }

    async fn depth(&self, flow_kind: &FlowKind) -> Result<u64, QueueError> {
        let row = self
            .executor
            .run(|| async {
                sqlx::query(
                    r#"
                    SELECT COUNT(*) AS depth
                    FROM processing_queue
                    WHERE flow_kind = $1 AND status = 'pending'
                    "#,
                )
                .bind(flow_kind.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(classify)
            })
            .await
            .map_err(queue_error_from_runtime)?;

        Ok(row.get::<i64, _>("depth") as u64)
    }
}
