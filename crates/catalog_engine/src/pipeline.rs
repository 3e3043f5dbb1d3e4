use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use engine_logging::{engine_error, engine_info, engine_warn};
use tokio_util::sync::CancellationToken;

use catalog_core::{build_tree, dedupe_and_sort, merge, Record, ShardError, ShardParams};

use crate::fetch::{FetchSettings, LogProgressSink, PageClient, ProgressSink, ReqwestPageClient};
use crate::lock::{LockError, RunLock};
use crate::normalize::{DefaultNormalizer, Normalizer};
use crate::paginate::fetch_all;
use crate::persist::{publish_tree, PersistError};
use crate::snapshot::load_snapshot;
use crate::source::SourceConfig;
use crate::status::{write_status, RunState, RunStatus, SourceSummary};
use crate::types::FetchError;

/// Produces the timestamps written into status and list files.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

/// Immutable run configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub status_path: PathBuf,
    pub lock_path: PathBuf,
    /// Recorded in the lock file to identify the run holding it.
    pub owner: String,
    pub sources: Vec<SourceConfig>,
    pub fetch: FetchSettings,
    pub shard: ShardParams,
    /// Wall-clock budget for fetching all sources.
    pub deadline: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("http client setup failed: {0}")]
    Client(#[from] FetchError),
    #[error("no records fetched and no snapshot available")]
    NoData,
    #[error("run cancelled")]
    Cancelled,
    #[error("shard build failed: {0}")]
    Shard(#[from] ShardError),
    #[error("publishing output failed: {0}")]
    Persist(#[from] PersistError),
}

pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<dyn PageClient>,
    normalizer: Arc<dyn Normalizer>,
    sink: Arc<dyn ProgressSink>,
    clock: Clock,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let client = ReqwestPageClient::new(config.fetch.clone())?;
        Ok(Self {
            config,
            client: Arc::new(client),
            normalizer: Arc::new(DefaultNormalizer),
            sink: Arc::new(LogProgressSink),
            clock: Arc::new(|| Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_client(mut self, client: Arc<dyn PageClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that cancels the run: scheduling stops and nothing is published.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole pipeline once and report its terminal status.
    ///
    /// Only a failure in merge, shard build or publish ends the run with
    /// `Error`; fetch problems degrade the result instead. A concurrent run
    /// yields `AlreadyRunning` without touching the output or status file.
    pub async fn run(&self) -> RunStatus {
        let started = Instant::now();
        let started_at = (self.clock)();

        let lock = match RunLock::acquire(&self.config.lock_path, &self.config.owner, &started_at) {
            Ok(lock) => lock,
            Err(err @ LockError::AlreadyHeld { .. }) => {
                engine_warn!("{}", err);
                let mut status = RunStatus::new(RunState::AlreadyRunning, started_at);
                status.finished_at = Some((self.clock)());
                status.error = Some(err.to_string());
                return status;
            }
            Err(err) => {
                let mut status = RunStatus::new(RunState::Error, started_at);
                status.error = Some(err.to_string());
                return self.finish(status, started);
            }
        };

        let mut status = RunStatus::new(RunState::Completed, started_at);
        match self.execute(&mut status).await {
            Ok(()) => {}
            Err(PipelineError::Cancelled) => {
                engine_warn!("Run cancelled; output left untouched");
                status.state = RunState::Cancelled;
            }
            Err(err) => {
                engine_error!("Run failed: {}", err);
                status.state = RunState::Error;
                status.error = Some(err.to_string());
            }
        }

        let status = self.finish(status, started);
        drop(lock);
        status
    }

    async fn execute(&self, status: &mut RunStatus) -> Result<(), PipelineError> {
        let snapshot = load_snapshot(&self.config.output_dir);
        status.counts.snapshot = snapshot.records.len();
        status.counts.snapshot_skipped = snapshot.skipped;

        let outcomes = fetch_all(
            self.client.as_ref(),
            self.normalizer.as_ref(),
            &self.config.sources,
            self.config.deadline,
            &self.cancel,
            self.sink.as_ref(),
        )
        .await;
        status.sources = outcomes.iter().map(SourceSummary::from).collect();
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let fetched: Vec<Record> = outcomes
            .into_iter()
            .flat_map(|outcome| outcome.records)
            .collect();
        status.counts.fetched = fetched.len();
        if fetched.is_empty() && snapshot.records.is_empty() {
            return Err(PipelineError::NoData);
        }

        let merged = merge(fetched, snapshot.records);
        status.counts.preserved = merged.preserved;
        status.counts.fresh = merged.fresh;
        status.counts.survivors = merged.survivors;
        engine_info!(
            "Merged: {} preserved, {} fresh, {} survivors",
            merged.preserved,
            merged.fresh,
            merged.survivors
        );

        let ordered = dedupe_and_sort(merged.records);
        status.counts.duplicates = ordered.duplicates;
        status.counts.keyless_skipped = ordered.keyless;
        status.counts.total = ordered.records.len();
        if ordered.keyless > 0 {
            engine_warn!("Dropped {} records without an identity key", ordered.keyless);
        }

        let generated_at = (self.clock)();
        let built = build_tree(&ordered.records, &self.config.shard, &generated_at)?;
        status.counts.bucket_files = built.stats.bucket_files;
        status.counts.search_files = built.stats.search_files;
        status.counts.list_pages = built.stats.list_pages;

        let published = publish_tree(&self.config.output_dir, &built.tree)?;
        status.counts.files_written = published.files_written;
        Ok(())
    }

    fn finish(&self, mut status: RunStatus, started: Instant) -> RunStatus {
        status.finished_at = Some((self.clock)());
        status.elapsed_secs = started.elapsed().as_secs_f64();
        if let Err(err) = write_status(&self.config.status_path, &status) {
            engine_error!(
                "Failed to write run status to {:?}: {}",
                self.config.status_path,
                err
            );
        }
        engine_info!(
            "Run finished: {:?}, {} records in {:.2}s",
            status.state,
            status.counts.total,
            status.elapsed_secs
        );
        status
    }
}
