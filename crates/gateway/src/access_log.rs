//! JSONL access log — one record per request.
//!
//! Writes are best-effort: the file is opened per append and failures are
//! the caller's to swallow. Keeping the descriptor open across requests is
//! a throughput optimization this gateway does not need.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// One access log line.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub ts: String,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    pub method: String,
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    pub status: String,
    pub http_status: u16,
    pub latency_ms: u64,
}

pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, record: &AccessRecord) -> std::io::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}
