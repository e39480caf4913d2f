//! Core traits and types for the distributed task-processing runtime.
//!
//! This crate is storage-agnostic: it defines the queue protocol, failure
//! policy, handler registry, configuration, and connection-pool contracts
//! that `runtime-postgres` implements and `runtime-worker` drives. Nothing
//! here talks to a database directly.

pub mod alert;
pub mod backoff;
pub mod config;
pub mod error;
pub mod failure;
pub mod handler;
pub mod health;
pub mod identity;
pub mod pool;
pub mod queue_protocol;
pub mod record;
pub mod retry;

pub use alert::{Alert, AlertSink, CompositeSink, FileSink, Severity, TracingSink};
pub use config::{ConfigError, ConfigProvider, Environment, LayeredConfig};
pub use error::{Categorizable, ErrorClass, RuntimeError};
pub use failure::{BackoffPolicy, Disposition, FailureClassification};
pub use handler::{Handler, HandlerContext, HandlerOutcome, HandlerRegistry};
pub use health::{HealthCheckOptions, HealthProbe, HealthReport, HealthStatus, HealthSummary};
pub use identity::WorkerIdentity;
pub use pool::{ConnectionPool, ErasedConnectionPool, PoolError, PoolSnapshot, UtilizationTier};
pub use queue_protocol::{queue_error_from_runtime, QueueError, QueueProtocol};
pub use record::{FlowKind, ProcessingQueueRecord, RecordId, RecordStatus};
pub use retry::{RetryPolicy, RetryingExecutor};
