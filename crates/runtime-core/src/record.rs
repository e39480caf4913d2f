//! The processing queue record: the central entity of the runtime (see §3.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque unique identifier for a processing queue record. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A short identifier naming which worker class processes a record.
///
/// Non-empty by construction; a worker process binds to exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowKind(String);

impl FlowKind {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        assert!(!value.is_empty(), "flow_kind must be non-empty");
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FlowKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FlowKind {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Lifecycle status of a processing queue record (§3.1, §4.H).
///
/// `Completed`, `Failed`, and `Dead` are terminal sinks: no transition
/// leaves them (invariant 3 in §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl RecordStatus {
    /// Terminal statuses are sinks: `completed`, `failed`, `dead`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(format!("{other} is not a valid RecordStatus")),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `processing_queue` table (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingQueueRecord {
    pub id: RecordId,
    pub flow_kind: FlowKind,
    pub payload: serde_json::Value,
    pub status: RecordStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub next_visible_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

impl ProcessingQueueRecord {
    /// Construct a fresh `pending` record, as an external producer would.
    pub fn new_pending(flow_kind: FlowKind, payload: serde_json::Value, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            flow_kind,
            payload,
            status: RecordStatus::Pending,
            attempts: 0,
            max_attempts,
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            next_visible_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
        }
    }

    /// True iff `claimed_by` is present, matching the status ∈ {claimed, processing} invariant.
    pub fn has_lease(&self) -> bool {
        self.claimed_by.is_some()
    }
}
