use std::fmt;

use serde::{Deserialize, Serialize};

use catalog_core::Record;

pub type PageNumber = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    Network,
    Timeout,
    HttpStatus(u16),
    RateLimited,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Malformed,
    ApiStatus(i64),
    Cancelled,
}

impl FailureKind {
    /// Whether another attempt within the retry budget can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Network
                | FailureKind::Timeout
                | FailureKind::HttpStatus(_)
                | FailureKind::RateLimited
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Malformed => write!(f, "malformed payload"),
            FailureKind::ApiStatus(code) => write!(f, "api status {code}"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress notifications emitted while a source is being fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    PageFetched {
        source: String,
        page: PageNumber,
        items: usize,
        total_pages: PageNumber,
    },
    PageDropped {
        source: String,
        page: PageNumber,
        error: FetchError,
    },
    SourceFinished {
        source: String,
        status: SourceStatus,
        records: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Every page was fetched.
    Complete,
    /// Some pages were dropped or the source deadline cut scheduling short.
    Partial,
    /// Page 1 could not be fetched; nothing was contributed.
    Failed,
    /// The global deadline expired before the source completed; nothing was contributed.
    TimedOut,
    /// The run was cancelled before the source completed.
    Cancelled,
}

/// Result of fetching every page of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    pub total_pages: PageNumber,
    pub pages_fetched: usize,
    pub pages_dropped: usize,
    /// Records in page order, independent of completion order.
    pub records: Vec<Record>,
}

impl SourceOutcome {
    pub(crate) fn failed(source: &str) -> Self {
        Self {
            source: source.to_string(),
            status: SourceStatus::Failed,
            total_pages: 0,
            pages_fetched: 0,
            pages_dropped: 0,
            records: Vec::new(),
        }
    }
}
