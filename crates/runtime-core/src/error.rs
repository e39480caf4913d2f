//! Error taxonomy (§7) and the transient/permanent classification used by
//! the retrying executor (§4.C) and the failure state machine (§4.H).

use thiserror::Error;

/// Classification of an error for retry purposes (§4.C decision table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection drop, lock timeout, serialization failure, pool-exhausted: retried.
    Transient,
    /// Constraint violation, parse/syntax error, authorization failure: never retried.
    Permanent,
    /// Anything unclassified: surfaced, not retried.
    Unknown,
}

/// Implemented by error types that know how to classify themselves for retry.
pub trait Categorizable {
    fn category(&self) -> ErrorClass;
}

/// The full error taxonomy from §7.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Fatal at startup: a required config key has neither override nor default.
    #[error("configuration missing required key `{0}`")]
    ConfigurationMissing(String),

    /// Retried by the executor; becomes `TransientExhausted` if the retry budget is exceeded.
    #[error("transient database error: {0}")]
    TransientDatabase(String),

    /// Not retried; the triggering record transitions to `failed` and an alert is emitted.
    #[error("permanent database error: {0}")]
    PermanentDatabase(String),

    /// Retry budget exceeded; the triggering outcome is queued locally rather than lost.
    #[error("transient error exhausted after {attempts} attempts: {source}")]
    TransientExhausted { attempts: u32, source: String },

    /// Handler-classified retryable failure, feeds §4.H.
    #[error("handler reported a retryable failure: {0}")]
    HandlerRetryable(String),

    /// Handler-classified non-retryable failure, feeds §4.H.
    #[error("handler reported a non-retryable failure: {0}")]
    HandlerNonRetryable(String),

    /// The lease was lost mid-handler; the handler is cancelled, no outcome is recorded.
    #[error("lease lost for record {0}")]
    LeaseLost(String),

    /// The local operation queue is at capacity; new claims are refused until drained.
    #[error("local operation queue is full")]
    LocalQueueFull,

    /// Clean shutdown in progress.
    #[error("shutdown in progress")]
    Shutdown,
}

impl Categorizable for RuntimeError {
    fn category(&self) -> ErrorClass {
        match self {
            Self::TransientDatabase(_) | Self::TransientExhausted { .. } => ErrorClass::Transient,
            Self::PermanentDatabase(_) => ErrorClass::Permanent,
            Self::ConfigurationMissing(_)
            | Self::HandlerRetryable(_)
            | Self::HandlerNonRetryable(_)
            | Self::LeaseLost(_)
            | Self::LocalQueueFull
            | Self::Shutdown => ErrorClass::Unknown,
        }
    }
}
