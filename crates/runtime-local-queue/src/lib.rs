//! Local operation queue (§4.E): a durable outbox that buffers the
//! completion/failure outcomes a worker cannot apply to the database during
//! a partition, so in-flight work is never silently lost.
//!
//! Entries are held in memory and mirrored to disk as a single JSON array,
//! rewritten atomically (temp file + rename) on every mutation. On startup
//! a queue file that fails to parse is moved aside rather than discarded,
//! so an operator can inspect what was lost.

use chrono::{DateTime, Utc};
use runtime_core::failure::Disposition;
use runtime_core::record::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Soft threshold (percent of `max_entries`) above which `enqueue` logs a warning.
pub const CAPACITY_WARNING_PERCENT: f64 = 80.0;

#[derive(Debug, Error)]
pub enum LocalQueueError {
    #[error("local operation queue is full ({0} entries)")]
    Full(usize),
    #[error("failed to persist local operation queue: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize local operation queue entry: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The queue-protocol outcome a worker could not apply while the database
/// was unreachable. Buffers exactly the two state-changing calls on
/// `QueueProtocol` that can be replayed later without losing ordering
/// information: completion and failure disposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalOperationKind {
    Complete { record_id: RecordId, worker_id: String, result: Option<Value> },
    ApplyDisposition {
        record_id: RecordId,
        worker_id: String,
        disposition: Disposition,
        error_message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalQueueEntry {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub operation: LocalOperationKind,
}

impl LocalQueueEntry {
    fn new(operation: LocalOperationKind) -> Self {
        Self { id: Uuid::new_v4(), enqueued_at: Utc::now(), operation }
    }
}

/// A single-writer, append-mostly outbox persisted as a JSON array.
pub struct LocalOperationQueue {
    path: PathBuf,
    max_entries: usize,
    entries: Vec<LocalQueueEntry>,
}

impl LocalOperationQueue {
    /// Load `path` if present. A file that fails to parse is renamed to
    /// `<path>.corrupt-<timestamp>` and the queue starts empty rather than
    /// propagating the parse error: losing an already-applied outcome is
    /// preferable to refusing to start.
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Result<Self, LocalQueueError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<LocalQueueEntry>>(&bytes) {
                Ok(entries) => entries,
                Err(err) => {
                    let quarantine = path.with_extension(format!("corrupt-{}", Utc::now().timestamp()));
                    tracing::error!(
                        path = %path.display(),
                        quarantine = %quarantine.display(),
                        error = %err,
                        "local operation queue file is corrupt, quarantining"
                    );
                    let _ = std::fs::rename(&path, &quarantine);
                    Vec::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self { path, max_entries, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity_percent(&self) -> f64 {
        (self.entries.len() as f64 / self.max_entries.max(1) as f64) * 100.0
    }

    /// Buffer `operation`. Fails once `max_entries` is reached: a caller that
    /// cannot enqueue should treat the outcome as lost and alert, rather than
    /// growing the queue without bound.
    pub fn enqueue(&mut self, operation: LocalOperationKind) -> Result<(), LocalQueueError> {
        if self.entries.len() >= self.max_entries {
            return Err(LocalQueueError::Full(self.entries.len()));
        }
        self.entries.push(LocalQueueEntry::new(operation));
        self.persist()?;

        if self.capacity_percent() >= CAPACITY_WARNING_PERCENT {
            tracing::warn!(
                path = %self.path.display(),
                entries = self.entries.len(),
                max_entries = self.max_entries,
                capacity_percent = self.capacity_percent(),
                "local operation queue nearing capacity"
            );
        }
        Ok(())
    }

    /// Remove and return every buffered entry, in enqueue order, clearing the
    /// in-memory and on-disk state. The caller is responsible for re-enqueuing
    /// entries it fails to apply (see `runtime-worker`'s flush loop).
    pub fn drain(&mut self) -> Result<Vec<LocalQueueEntry>, LocalQueueError> {
        let drained = std::mem::take(&mut self.entries);
        self.persist()?;
        Ok(drained)
    }

    /// Re-buffer entries that failed to apply during a flush, preserving
    /// their original order ahead of anything enqueued since.
    pub fn requeue(&mut self, mut entries: Vec<LocalQueueEntry>) -> Result<(), LocalQueueError> {
        entries.append(&mut self.entries);
        self.entries = entries;
        self.persist()
    }

    fn persist(&self) -> Result<(), LocalQueueError> {
        atomic_write(&self.path, &self.entries)
    }
}

fn atomic_write(path: &Path, entries: &[LocalQueueEntry]) -> Result<(), LocalQueueError> {
    let body = serde_json::to_vec_pretty(entries)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::record::RecordId;

    fn op() -> LocalOperationKind {
        LocalOperationKind::Complete { record_id: RecordId::new(), worker_id: "w-1".into(), result: None }
    }

    #[test]
    fn enqueue_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let mut queue = LocalOperationQueue::open(&path, 10).unwrap();
        queue.enqueue(op()).unwrap();
        queue.enqueue(op()).unwrap();
        assert_eq!(queue.len(), 2);

        let reloaded = LocalOperationQueue::open(&path, 10).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn enqueue_fails_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = LocalOperationQueue::open(dir.path().join("queue.json"), 1).unwrap();
        queue.enqueue(op()).unwrap();
        let err = queue.enqueue(op()).unwrap_err();
        assert!(matches!(err, LocalQueueError::Full(1)));
    }

    #[test]
    fn drain_empties_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = LocalOperationQueue::open(&path, 10).unwrap();
        queue.enqueue(op()).unwrap();

        let drained = queue.drain().unwrap();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());

        let reloaded = LocalOperationQueue::open(&path, 10).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, b"not json").unwrap();

        let queue = LocalOperationQueue::open(&path, 10).unwrap();
        assert!(queue.is_empty());
        assert!(!path.exists());
    }
}
