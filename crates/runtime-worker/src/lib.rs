//! The worker process: claims records of one `flow_kind`, dispatches them
//! to a registered handler, and keeps the queue backend's view of ownership
//! current via batched heartbeats, retries, and lease recovery.

pub mod recovery;
pub mod runtime;
pub mod shutdown;

pub use recovery::RecoveryController;
pub use runtime::{RuntimeSettings, WorkerRuntime};
pub use shutdown::ShutdownOutcome;
