//! Metrics and feedback sinks
//!
//! Structured per-query records appended for offline analysis, plus user
//! feedback correlated to queries by id. Both sinks are append-only
//! streams; the JSONL implementations write line-delimited JSON under the
//! configured log directory.

use crate::pipeline::{Intent, Quality, StageTimings};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open sink file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to append record: {0}")]
    Append(#[from] std::io::Error),

    #[error("Failed to serialise record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Which path served the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Main,
    Fallback,
}

/// One per-query metrics record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub timestamp: String,
    pub domain: String,
    pub intent: Intent,
    pub quality: Quality,
    pub timings: StageTimings,
    pub doc_count: usize,
    pub top_score: f32,
    pub endpoint: Endpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Thumbs up / thumbs down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

/// One user-feedback record, correlated to a query by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub query_id: String,
    pub rating: Rating,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

/// Append-only metrics stream
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: &QueryRecord);

    /// Flush buffered records (called during teardown)
    fn flush(&self) {}
}

/// Append-only feedback stream
pub trait FeedbackSink: Send + Sync {
    fn record(&self, record: &FeedbackRecord);

    fn flush(&self) {}
}

/// Line-delimited JSON file sink shared by metrics and feedback
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlSink {
    /// Open (creating parents as needed) in append mode
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SinkError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn append<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Failed to serialise record: {}", e);
                return;
            }
        };

        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::error!(path = %self.path.display(), "Failed to append record: {}", e);
        }
    }

    fn flush_file(&self) {
        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.flush() {
            tracing::error!(path = %self.path.display(), "Failed to flush sink: {}", e);
        }
    }
}

impl MetricsSink for JsonlSink {
    fn record(&self, record: &QueryRecord) {
        self.append(record);
    }

    fn flush(&self) {
        self.flush_file();
    }
}

impl FeedbackSink for JsonlSink {
    fn record(&self, record: &FeedbackRecord) {
        self.append(record);
    }

    fn flush(&self) {
        self.flush_file();
    }
}

/// In-memory sink for tests and ad-hoc inspection
#[derive(Default)]
pub struct MemorySink {
    pub queries: Mutex<Vec<QueryRecord>>,
    pub feedback: Mutex<Vec<FeedbackRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, record: &QueryRecord) {
        self.queries.lock().unwrap().push(record.clone());
    }
}

impl FeedbackSink for MemorySink {
    fn record(&self, record: &FeedbackRecord) {
        self.feedback.lock().unwrap().push(record.clone());
    }
}

/// RFC 3339 timestamp for sink records
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
