//! Connection pool supervisor (§4.B): bounded pool per logical database,
//! vending scoped handles and publishing utilization.

use async_trait::async_trait;
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool exhausted after waiting {0:?}")]
    Exhausted(Duration),
    #[error("pool connection error: {0}")]
    Connection(String),
}

/// Utilization tier, reported by `snapshot()` (§4.B policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilizationTier {
    Normal,
    Moderate,
    High,
}

/// In-memory, per-process pool state (§3.4). Rebuilt each process, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSnapshot {
    pub size: u32,
    pub checked_out: u32,
    pub overflow: u32,
    pub max_overflow: u32,
    pub utilization_percent: f64,
}

impl PoolSnapshot {
    pub fn tier(&self) -> UtilizationTier {
        if self.utilization_percent >= 95.0 {
            UtilizationTier::High
        } else if self.utilization_percent >= 80.0 {
            UtilizationTier::Moderate
        } else {
            UtilizationTier::Normal
        }
    }
}

/// A connection pool vending scoped handles to a logical database.
///
/// Implementors cap total concurrent handles at `pool_size + pool_max_overflow`,
/// expire idle connections, and validate before vending.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    type Handle: Send;

    /// Acquire a handle, failing with `PoolError::Exhausted` after `timeout`.
    async fn acquire(&self, timeout: Duration) -> Result<Self::Handle, PoolError>;

    /// Current utilization snapshot. Emits a structured warning at moderate/high tiers.
    fn snapshot(&self) -> PoolSnapshot;
}

/// Object-safe erasure of a `ConnectionPool`, handed to handlers through
/// `HandlerContext::db` (§4.G: "each handler has its own transactional
/// database handle if it needs one, requested via the Pool Supervisor").
/// `ConnectionPool` itself can't be a trait object because its `Handle` type
/// differs per backend; a handler that needs a typed handle downcasts the
/// boxed value back to its backend's concrete handle type.
#[async_trait]
pub trait ErasedConnectionPool: Send + Sync {
    async fn acquire_erased(&self, timeout: Duration) -> Result<Box<dyn Any + Send>, PoolError>;
    fn snapshot(&self) -> PoolSnapshot;
}

#[async_trait]
impl<T> ErasedConnectionPool for T
where
    T: ConnectionPool,
    T::Handle: 'static,
{
    async fn acquire_erased(&self, timeout: Duration) -> Result<Box<dyn Any + Send>, PoolError> {
        let handle = self.acquire(timeout).await?;
        Ok(Box::new(handle))
    }

    fn snapshot(&self) -> PoolSnapshot {
        ConnectionPool::snapshot(self)
    }
}

/// Emit the moderate/high utilization warning for a snapshot, shared by every
/// `ConnectionPool` implementation so the 80%/95% policy can't drift between them.
pub fn warn_on_utilization(pool_name: &str, snapshot: PoolSnapshot) {
    match snapshot.tier() {
        UtilizationTier::High => tracing::warn!(
            pool = pool_name,
            utilization_percent = snapshot.utilization_percent,
            checked_out = snapshot.checked_out,
            size = snapshot.size,
            "connection pool utilization high"
        ),
        UtilizationTier::Moderate => tracing::warn!(
            pool = pool_name,
            utilization_percent = snapshot.utilization_percent,
            checked_out = snapshot.checked_out,
            size = snapshot.size,
            "connection pool utilization moderate"
        ),
        UtilizationTier::Normal => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_match_documented_thresholds() {
        let mk = |pct: f64| PoolSnapshot {
            size: 10,
            checked_out: 0,
            overflow: 0,
            max_overflow: 5,
            utilization_percent: pct,
        };
        assert_eq!(mk(50.0).tier(), UtilizationTier::Normal);
        assert_eq!(mk(80.0).tier(), UtilizationTier::Moderate);
        assert_eq!(mk(95.0).tier(), UtilizationTier::High);
    }
}
