use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::persist::{AtomicFileWriter, PersistError};
use crate::types::{SourceOutcome, SourceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Completed,
    Error,
    Cancelled,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: usize,
    pub snapshot: usize,
    pub snapshot_skipped: usize,
    pub preserved: usize,
    pub fresh: usize,
    pub survivors: usize,
    pub duplicates: usize,
    pub keyless_skipped: usize,
    pub total: usize,
    pub bucket_files: usize,
    pub search_files: usize,
    pub list_pages: usize,
    pub files_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub status: SourceStatus,
    pub total_pages: u32,
    pub pages_fetched: usize,
    pub pages_dropped: usize,
    pub records: usize,
}

impl From<&SourceOutcome> for SourceSummary {
    fn from(outcome: &SourceOutcome) -> Self {
        Self {
            source: outcome.source.clone(),
            status: outcome.status,
            total_pages: outcome.total_pages,
            pages_fetched: outcome.pages_fetched,
            pages_dropped: outcome.pages_dropped,
            records: outcome.records.len(),
        }
    }
}

/// Terminal result of one run, persisted for external monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub elapsed_secs: f64,
    pub counts: RunCounts,
    #[serde(default)]
    pub sources: Vec<SourceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(state: RunState, started_at: impl Into<String>) -> Self {
        Self {
            state,
            started_at: started_at.into(),
            finished_at: None,
            elapsed_secs: 0.0,
            counts: RunCounts::default(),
            sources: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Write the status artifact atomically, creating its directory if needed.
pub fn write_status(path: &Path, status: &RunStatus) -> Result<PathBuf, PersistError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PersistError::OutputDir(format!("{:?} is not a file path", path)))?;
    AtomicFileWriter::new(dir).write(filename, status.to_json().as_bytes())
}
