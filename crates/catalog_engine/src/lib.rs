//! Catalog engine: upstream fetching, snapshot IO and pipeline execution.
mod fetch;
mod lock;
mod normalize;
mod paginate;
mod payload;
mod persist;
mod pipeline;
mod snapshot;
mod source;
mod status;
mod types;

pub use fetch::{FetchSettings, LogProgressSink, PageClient, ProgressSink, ReqwestPageClient};
pub use lock::{LockError, LockOwner, RunLock};
pub use normalize::{
    category_for, clean_title, parse_duration, parse_size, DefaultNormalizer, Normalizer,
};
pub use paginate::{fetch_all, fetch_source, fetch_with_retry};
pub use payload::{decode_page, PageEnvelope, RawItem};
pub use persist::{ensure_output_dir, publish_tree, AtomicFileWriter, PersistError, PublishSummary};
pub use pipeline::{Clock, Pipeline, PipelineConfig, PipelineError};
pub use snapshot::{load_snapshot, Snapshot};
pub use source::{Dialect, SourceConfig, UrlTemplates};
pub use status::{write_status, RunCounts, RunState, RunStatus, SourceSummary};
pub use types::{FailureKind, FetchError, FetchEvent, PageNumber, SourceOutcome, SourceStatus};

pub use tokio_util::sync::CancellationToken;
