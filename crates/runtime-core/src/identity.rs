//! Worker identity and lease (§3.3).

use crate::record::FlowKind;
use std::fmt;

/// `<flow_kind>-<host>-<instance>`, stable across restarts for a deployment slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    flow_kind: FlowKind,
    host: String,
    instance: String,
}

impl WorkerIdentity {
    pub fn new(flow_kind: FlowKind, host: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            flow_kind,
            host: host.into(),
            instance: instance.into(),
        }
    }

    /// Resolve the identity for the current process: host from the environment
    /// (`HOSTNAME`, falling back to `unknown-host`), instance from the caller
    /// (typically a deployment slot id) or the process id as a last resort.
    pub fn resolve(flow_kind: FlowKind, instance: Option<String>) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
        let instance = instance.unwrap_or_else(|| std::process::id().to_string());
        Self::new(flow_kind, host, instance)
    }

    pub fn flow_kind(&self) -> &FlowKind {
        &self.flow_kind
    }

    pub fn as_claimed_by(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.flow_kind, self.host, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_flow_host_instance() {
        let id = WorkerIdentity::new(FlowKind::new("file-processing"), "host-a", "1");
        assert_eq!(id.to_string(), "file-processing-host-a-1");
    }
}
