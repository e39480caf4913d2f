//! Shutdown outcomes (§4.G, §6): how the main loop exits and the process
//! exit code that should follow.

/// Result of a graceful-shutdown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight record drained before the grace period elapsed.
    Clean,
    /// The grace period elapsed with records still in flight; their tasks
    /// were cancelled and their leases are left to expire naturally.
    DrainTimedOut,
    /// A second shutdown signal arrived during drain; tasks were cancelled immediately.
    Forced,
}

impl ShutdownOutcome {
    /// Process exit code, matching the external interface in §6: 0 for a
    /// clean drain, 2 if the grace period elapsed or a second shutdown
    /// signal forced cancellation, 3 if the local operation queue still has
    /// unflushed entries at exit — `local_queue_has_unflushed` is an
    /// orthogonal condition, not implied by how the drain itself went.
    pub fn exit_code(self, local_queue_has_unflushed: bool) -> i32 {
        if local_queue_has_unflushed {
            return 3;
        }
        match self {
            Self::Clean => 0,
            Self::DrainTimedOut | Self::Forced => 2,
        }
    }
}
