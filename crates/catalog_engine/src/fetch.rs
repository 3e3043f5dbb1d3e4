use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;

use crate::payload::{decode_page, PageEnvelope};
use crate::source::SourceConfig;
use crate::types::{FailureKind, FetchError, FetchEvent, PageNumber};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 32 * 1024 * 1024,
            user_agent: concat!("catalog-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: FetchEvent);
}

/// Sink that reports fetch progress through the logging facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn emit(&self, event: FetchEvent) {
        match event {
            FetchEvent::PageFetched {
                source,
                page,
                items,
                total_pages,
            } => engine_debug!("{source}: page {page}/{total_pages} fetched, {items} items"),
            FetchEvent::PageDropped {
                source,
                page,
                error,
            } => engine_warn!("{source}: page {page} dropped: {error}"),
            FetchEvent::SourceFinished {
                source,
                status,
                records,
            } => engine_info!("{source}: finished {status:?} with {records} records"),
        }
    }
}

/// One attempt at one page of one source. Retrying is the caller's job.
#[async_trait::async_trait]
pub trait PageClient: Send + Sync {
    async fn fetch_page(
        &self,
        source: &SourceConfig,
        page: PageNumber,
    ) -> Result<PageEnvelope, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPageClient {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ReqwestPageClient {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn too_large(&self, actual: u64) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl PageClient for ReqwestPageClient {
    async fn fetch_page(
        &self,
        source: &SourceConfig,
        page: PageNumber,
    ) -> Result<PageEnvelope, FetchError> {
        let url = source
            .page_url(page)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, self.settings.user_agent.as_str())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::new(FailureKind::RateLimited, status.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            body.extend_from_slice(&chunk);
        }

        decode_page(source.dialect, &body)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return FetchError::new(FailureKind::Malformed, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
