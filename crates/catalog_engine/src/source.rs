use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::PageNumber;

/// Field-naming convention of an upstream file-list API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `result.total_pages`, `size`, `single_img` / `splash_img`.
    Doodstream,
    /// `result.pages`, `file_size`, `file_views`, `player_img`.
    Lulustream,
}

/// Fallback URL patterns for items that omit them. `{id}` is replaced by the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlTemplates {
    pub embed: Option<String>,
    pub download: Option<String>,
    pub thumbnail: Option<String>,
    pub splash: Option<String>,
}

impl UrlTemplates {
    pub(crate) fn render(template: Option<&str>, id: &str) -> String {
        template
            .map(|t| t.replace("{id}", id))
            .unwrap_or_default()
    }
}

/// Static per-source parameters, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub dialect: Dialect,
    pub endpoint: String,
    pub credential: String,
    pub per_page: u32,
    /// Total tries per page, including the first one.
    pub max_attempts: u32,
    /// Pages in flight at once.
    pub concurrency: usize,
    /// Pause after every successful page fetch.
    pub request_delay: Duration,
    /// First retry delay; doubles on every further attempt.
    pub backoff_base: Duration,
    /// Delay unit after a rate-limit response, multiplied by the attempt number.
    pub rate_limit_backoff: Duration,
    /// Wall-clock budget for the whole source.
    pub deadline: Duration,
    pub templates: UrlTemplates,
}

impl SourceConfig {
    pub fn new(
        name: impl Into<String>,
        dialect: Dialect,
        endpoint: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        let per_page = match dialect {
            Dialect::Doodstream => 200,
            Dialect::Lulustream => 500,
        };
        Self {
            name: name.into(),
            dialect,
            endpoint: endpoint.into(),
            credential: credential.into(),
            per_page,
            max_attempts: 3,
            concurrency: 5,
            request_delay: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(300),
            templates: UrlTemplates::default(),
        }
    }

    /// `GET <endpoint>?key=<credential>&per_page=<n>&page=<p>`.
    pub fn page_url(&self, page: PageNumber) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut()
            .append_pair("key", &self.credential)
            .append_pair("per_page", &self.per_page.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Delay before retrying after a failed attempt (0-based).
    ///
    /// Rate-limited attempts wait `rate_limit_backoff × (attempt + 1)` on top
    /// of the exponential delay, so they always wait longer than other retries.
    pub(crate) fn retry_delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponential = self.backoff_base.saturating_mul(1u32 << attempt.min(16));
        if rate_limited {
            let extra = self
                .rate_limit_backoff
                .saturating_mul(attempt.saturating_add(1));
            exponential.saturating_add(extra)
        } else {
            exponential
        }
    }
}
