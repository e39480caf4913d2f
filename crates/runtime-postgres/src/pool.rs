//! Postgres `ConnectionPool` (§4.B), backed by `sqlx::PgPool`.
//!
//! `sqlx::PgPool` already owns its own internal pooling; this wrapper exists
//! to surface `PoolSnapshot`/`UtilizationTier` in the shape the rest of the
//! runtime expects, and to give `acquire` the documented timeout semantics.

use async_trait::async_trait;
use runtime_core::pool::{ConnectionPool, PoolError, PoolSnapshot};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::time::Duration;

#[derive(Clone)]
pub struct PgConnectionPool {
    pool: PgPool,
    max_overflow: u32,
}

impl PgConnectionPool {
    pub fn new(pool: PgPool, max_overflow: u32) -> Self {
        Self { pool, max_overflow }
    }

    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionPool for PgConnectionPool {
    type Handle = PoolConnection<Postgres>;

    async fn acquire(&self, timeout: Duration) -> Result<Self::Handle, PoolError> {
        tokio::time::timeout(timeout, self.pool.acquire())
            .await
            .map_err(|_| PoolError::Exhausted(timeout))?
            .map_err(|e| PoolError::Connection(e.to_string()))
    }

    fn snapshot(&self) -> PoolSnapshot {
        let size = self.pool.size();
        let checked_out = size.saturating_sub(self.pool.num_idle() as u32);
        let capacity = size.max(1);
        PoolSnapshot {
            size,
            checked_out,
            overflow: 0,
            max_overflow: self.max_overflow,
            utilization_percent: (checked_out as f64 / capacity as f64) * 100.0,
        }
    }
}
