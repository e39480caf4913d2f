//! Retrying executor (§4.C): wraps a callable with retry over a classified
//! predicate of transient errors.

use crate::backoff;
use crate::config::{keys, ConfigError, ConfigProvider};
use crate::error::{Categorizable, ErrorClass, RuntimeError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for a `RetryingExecutor` (mirrors the `db_retry_*` keys in §4.A).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration, jitter: f64) -> Self {
        Self { max_attempts, min_wait, max_wait, jitter }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        backoff::compute(
            attempt,
            self.min_wait.as_secs_f64(),
            self.max_wait.as_secs_f64(),
            self.jitter,
        )
    }

    /// Read the `db_retry_*` keys (§4.A) a `RetryingExecutor` is configured from.
    pub fn from_config(config: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        Ok(Self {
            max_attempts: config.get_u64(keys::DB_RETRY_ATTEMPTS, 5)? as u32,
            min_wait: config.get_duration_s(keys::DB_RETRY_MIN_WAIT_S, 1)?,
            max_wait: config.get_duration_s(keys::DB_RETRY_MAX_WAIT_S, 30)?,
            jitter: config.get_f64(keys::DB_RETRY_JITTER, 0.2)?,
        })
    }
}

/// Wraps operations with exponential-backoff retry over a classified error predicate.
pub struct RetryingExecutor {
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `f` until it succeeds, `f`'s error classifies as non-transient, or
    /// the retry budget (`db_retry_attempts`) is exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut f: F) -> Result<T, RuntimeError>
    where
        E: Categorizable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => match err.category() {
                    ErrorClass::Transient => {
                        if attempt >= self.policy.max_attempts {
                            return Err(RuntimeError::TransientExhausted {
                                attempts: attempt,
                                source: err.to_string(),
                            });
                        }
                        let delay = self.policy.delay_for(attempt);
                        warn!(attempt, ?delay, error = %err, "retrying transient database error");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    ErrorClass::Permanent => {
                        return Err(RuntimeError::PermanentDatabase(err.to_string()));
                    }
                    ErrorClass::Unknown => {
                        return Err(RuntimeError::PermanentDatabase(err.to_string()));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Flaky(&'static str, ErrorClass);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl Categorizable for Flaky {
        fn category(&self) -> ErrorClass {
            self.1
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5), 0.0);
        let executor = RetryingExecutor::new(policy);
        let calls = Cell::new(0);

        let result = executor
            .run(|| {
                calls.set(calls.get() + 1);
                async move {
                    if calls.get() < 3 {
                        Err(Flaky("connection drop", ErrorClass::Transient))
                    } else {
                        Ok::<_, Flaky>(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5), 0.0);
        let executor = RetryingExecutor::new(policy);
        let calls = Cell::new(0);

        let result: Result<(), _> = executor
            .run(|| {
                calls.set(calls.get() + 1);
                async move { Err(Flaky("constraint violation", ErrorClass::Permanent)) }
            })
            .await;

        assert!(matches!(result.unwrap_err(), RuntimeError::PermanentDatabase(_)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn exhausted_transient_wraps_last_cause() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2), 0.0);
        let executor = RetryingExecutor::new(policy);

        let result: Result<(), _> = executor
            .run(|| async { Err(Flaky("lock timeout", ErrorClass::Transient)) })
            .await;

        match result.unwrap_err() {
            RuntimeError::TransientExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected TransientExhausted, got {other:?}"),
        }
    }
}
