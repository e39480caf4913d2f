//! Alert sink (ambient: §4.K): the escape hatch for conditions an operator
//! should notice without tailing logs — pool exhaustion, dead-letters,
//! unhealthy databases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub summary: String,
    pub detail: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self { severity, summary: summary.into(), detail: None, emitted_at: Utc::now() }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Implementors must not block the caller for long; a sink backed by a slow
/// external service should buffer or drop rather than stall the worker loop.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: Alert);
}

/// Forwards every alert to `tracing` at a level matching its severity.
/// The default sink; always present even when another sink is layered on.
pub struct TracingSink;

#[async_trait]
impl AlertSink for TracingSink {
    async fn emit(&self, alert: Alert) {
        match alert.severity {
            Severity::Critical => tracing::error!(detail = ?alert.detail, "{}", alert.summary),
            Severity::Warning => tracing::warn!(detail = ?alert.detail, "{}", alert.summary),
            Severity::Info => tracing::info!(detail = ?alert.detail, "{}", alert.summary),
        }
    }
}

/// Appends every alert as one line of newline-delimited JSON to a file.
/// Opened once at construction and kept open for the sink's lifetime;
/// writes are serialized behind a mutex so concurrent emits don't interleave.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl FileSink {
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl AlertSink for FileSink {
    async fn emit(&self, alert: Alert) {
        let line = match serde_json::to_string(&alert) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize alert for file sink");
                return;
            }
        };
        let mut file = self.file.lock().await;
        if let Err(err) = file.write_all(line.as_bytes()).await {
            tracing::error!(error = %err, path = %self.path.display(), "failed to append alert to file sink");
            return;
        }
        if let Err(err) = file.write_all(b"\n").await {
            tracing::error!(error = %err, path = %self.path.display(), "failed to append alert to file sink");
        }
    }
}

/// Fans an alert out to every sink in order. A sink panicking would take
/// down the worker, so sinks are expected to swallow their own errors.
pub struct CompositeSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for CompositeSink {
    async fn emit(&self, alert: Alert) {
        for sink in &self.sinks {
            sink.emit(alert.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn emit(&self, _alert: Alert) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn composite_forwards_to_every_sink() {
        let counter = Arc::new(AtomicUsize::new(0));
        let composite = CompositeSink::new(vec![
            Box::new(CountingSink(counter.clone())),
            Box::new(CountingSink(counter.clone())),
        ]);
        composite.emit(Alert::new(Severity::Warning, "pool exhausted")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn file_sink_appends_one_json_line_per_alert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = FileSink::open(&path).await.unwrap();

        sink.emit(Alert::new(Severity::Critical, "database unhealthy")).await;
        sink.emit(Alert::new(Severity::Warning, "record dead-lettered").with_detail("record_id=1")).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["summary"], "database unhealthy");
        assert_eq!(first["severity"], "critical");
    }
}
