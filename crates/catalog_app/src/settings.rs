//! RON settings file for catalog_app.
//!
//! Every field has a default, so a missing file (or a file that only sets a
//! few fields) still yields a runnable configuration with the two built-in
//! sources. Credentials are never stored in defaults; they come from the
//! environment unless the file spells them out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use catalog_core::ShardParams;
use catalog_engine::{Dialect, FetchSettings, PipelineConfig, SourceConfig, UrlTemplates};
use engine_logging::LogDestination;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SETTINGS_FILE: &str = "catalog.ron";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings from {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("source {source_name:?}: {message}")]
    Source {
        source_name: String,
        message: String,
    },
    #[error("invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Where a source's API key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub enum Credential {
    /// `CATALOG_<NAME>_KEY`, derived from the source name.
    #[default]
    FromEnv,
    /// A named environment variable.
    Env(String),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LogTarget {
    #[default]
    Terminal,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub target: LogTarget,
    pub file: PathBuf,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            target: LogTarget::Terminal,
            file: PathBuf::from("catalog.log"),
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    pub fn destination(&self) -> LogDestination {
        match self.target {
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::File => LogDestination::File(self.file.clone()),
            LogTarget::Both => LogDestination::Both(self.file.clone()),
        }
    }

    pub fn level_filter(&self) -> Result<LevelFilter, SettingsError> {
        LevelFilter::from_str(self.level.trim()).map_err(|_| SettingsError::Invalid {
            field: "logging.level",
            message: format!("unknown level {:?}", self.level),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_bytes: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
            max_bytes: defaults.max_bytes,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShardSection {
    pub per_page: usize,
    pub prefix_ceiling: usize,
}

impl Default for ShardSection {
    fn default() -> Self {
        let defaults = ShardParams::default();
        Self {
            per_page: defaults.per_page,
            prefix_ceiling: defaults.prefix_ceiling,
        }
    }
}

/// One upstream source. Unset tuning fields fall back to the dialect defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceSettings {
    pub name: String,
    pub dialect: Dialect,
    pub endpoint: String,
    #[serde(default)]
    pub credential: Credential,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,
    #[serde(default)]
    pub rate_limit_backoff_ms: Option<u64>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub templates: UrlTemplates,
}

impl SourceSettings {
    fn builtin(name: &str, dialect: Dialect, endpoint: &str, templates: UrlTemplates) -> Self {
        Self {
            name: name.to_string(),
            dialect,
            endpoint: endpoint.to_string(),
            credential: Credential::FromEnv,
            per_page: None,
            max_attempts: None,
            concurrency: None,
            request_delay_ms: None,
            backoff_base_ms: None,
            rate_limit_backoff_ms: None,
            deadline_ms: None,
            templates,
        }
    }

    /// Name of the environment variable consulted for `Credential::FromEnv`.
    pub fn env_key(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("CATALOG_{name}_KEY")
    }

    fn credential(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<String, SettingsError> {
        let (value, origin) = match &self.credential {
            Credential::Literal(value) => (Some(value.clone()), "literal".to_string()),
            Credential::Env(var) => (env(var), var.clone()),
            Credential::FromEnv => {
                let var = self.env_key();
                (env(&var), var)
            }
        };
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| self.error(format!("no credential found ({origin})")))
    }

    fn error(&self, message: impl Into<String>) -> SettingsError {
        SettingsError::Source {
            source_name: self.name.clone(),
            message: message.into(),
        }
    }

    fn to_source_config(
        &self,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<SourceConfig, SettingsError> {
        if self.name.trim().is_empty() {
            return Err(self.error("name must not be empty"));
        }
        url::Url::parse(&self.endpoint)
            .map_err(|err| self.error(format!("endpoint {:?}: {err}", self.endpoint)))?;

        let mut source = SourceConfig::new(
            self.name.trim(),
            self.dialect,
            self.endpoint.clone(),
            self.credential(env)?,
        );
        if let Some(per_page) = self.per_page {
            source.per_page = per_page;
        }
        if let Some(max_attempts) = self.max_attempts {
            source.max_attempts = max_attempts;
        }
        if let Some(concurrency) = self.concurrency {
            source.concurrency = concurrency;
        }
        if let Some(ms) = self.request_delay_ms {
            source.request_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.backoff_base_ms {
            source.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = self.rate_limit_backoff_ms {
            source.rate_limit_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = self.deadline_ms {
            source.deadline = Duration::from_millis(ms);
        }
        source.templates = self.templates.clone();

        if source.per_page == 0 {
            return Err(self.error("per_page must be at least 1"));
        }
        if source.max_attempts == 0 {
            return Err(self.error("max_attempts must be at least 1"));
        }
        if source.concurrency == 0 {
            return Err(self.error("concurrency must be at least 1"));
        }
        Ok(source)
    }
}

pub fn builtin_sources() -> Vec<SourceSettings> {
    vec![
        SourceSettings::builtin(
            "doodstream",
            Dialect::Doodstream,
            "https://doodapi.com/api/file/list",
            UrlTemplates {
                embed: Some("https://dodl.pages.dev/{id}".into()),
                download: Some("https://doodstream.com/d/{id}".into()),
                thumbnail: None,
                splash: None,
            },
        ),
        SourceSettings::builtin(
            "lulustream",
            Dialect::Lulustream,
            "https://api.lulustream.com/api/file/list",
            UrlTemplates {
                embed: Some("https://luvluv.pages.dev/{id}".into()),
                download: Some("https://lulustream.com/d/{id}".into()),
                thumbnail: Some("https://img.lulucdn.com/{id}_t.jpg".into()),
                splash: Some("https://img.lulucdn.com/{id}_xt.jpg".into()),
            },
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub status_path: PathBuf,
    pub lock_path: PathBuf,
    pub owner: String,
    /// Global fetch deadline across all sources.
    pub deadline_ms: u64,
    pub shard: ShardSection,
    pub fetch: FetchSection,
    pub logging: LoggingSettings,
    pub sources: Vec<SourceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            status_path: PathBuf::from("state/status.json"),
            lock_path: PathBuf::from("state/run.lock"),
            owner: "catalog_app".to_string(),
            deadline_ms: 300_000,
            shard: ShardSection::default(),
            fetch: FetchSection::default(),
            logging: LoggingSettings::default(),
            sources: builtin_sources(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. `Ok(None)` means there is no such file;
    /// the caller falls back to the defaults once logging is up.
    pub fn load(path: &Path) -> Result<Option<Self>, SettingsError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content).map(Some).map_err(|message| SettingsError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        ron::from_str(content).map_err(|err| err.to_string())
    }

    /// Validate and resolve into the immutable pipeline configuration.
    ///
    /// `env` looks up environment variables; callers pass `std::env::var`
    /// in production and a fixed map in tests.
    pub fn to_pipeline_config(
        &self,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<PipelineConfig, SettingsError> {
        if self.sources.is_empty() {
            return Err(SettingsError::Invalid {
                field: "sources",
                message: "at least one source is required".into(),
            });
        }
        let mut names = std::collections::BTreeSet::new();
        for source in &self.sources {
            if !names.insert(source.name.trim()) {
                return Err(source.error("duplicate source name"));
            }
        }
        if self.shard.per_page == 0 {
            return Err(SettingsError::Invalid {
                field: "shard.per_page",
                message: "must be at least 1".into(),
            });
        }
        if self.shard.prefix_ceiling == 0 {
            return Err(SettingsError::Invalid {
                field: "shard.prefix_ceiling",
                message: "must be at least 1".into(),
            });
        }
        if self.deadline_ms == 0 {
            return Err(SettingsError::Invalid {
                field: "deadline_ms",
                message: "must be positive".into(),
            });
        }

        let sources = self
            .sources
            .iter()
            .map(|source| source.to_source_config(env))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fetch = FetchSettings {
            connect_timeout: Duration::from_millis(self.fetch.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.fetch.request_timeout_ms),
            max_bytes: self.fetch.max_bytes,
            ..FetchSettings::default()
        };
        if let Some(agent) = &self.fetch.user_agent {
            fetch.user_agent = agent.clone();
        }

        Ok(PipelineConfig {
            output_dir: self.output_dir.clone(),
            status_path: self.status_path.clone(),
            lock_path: self.lock_path.clone(),
            owner: self.owner.clone(),
            sources,
            fetch,
            shard: ShardParams {
                per_page: self.shard.per_page,
                prefix_ceiling: self.shard.prefix_ceiling,
            },
            deadline: Duration::from_millis(self.deadline_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env_with(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn missing_file_yields_builtin_sources() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(&dir.path().join("absent.ron")).unwrap(), None);

        let settings = Settings::default();

        let names: Vec<&str> = settings.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["doodstream", "lulustream"]);
    }

    #[test]
    fn builtin_credentials_come_from_environment() {
        let env = env_with(&[
            ("CATALOG_DOODSTREAM_KEY", "dood-key"),
            ("CATALOG_LULUSTREAM_KEY", " lulu-key "),
        ]);
        let config = Settings::default().to_pipeline_config(&env).unwrap();

        assert_eq!(config.sources[0].credential, "dood-key");
        assert_eq!(config.sources[0].per_page, 200);
        assert_eq!(config.sources[1].credential, "lulu-key");
        assert_eq!(config.sources[1].per_page, 500);
        assert_eq!(config.deadline, Duration::from_secs(300));
        assert_eq!(config.shard, ShardParams::default());
    }

    #[test]
    fn missing_credential_names_the_variable() {
        let env = env_with(&[("CATALOG_DOODSTREAM_KEY", "dood-key")]);
        let err = Settings::default().to_pipeline_config(&env).unwrap_err();
        assert!(err.to_string().contains("CATALOG_LULUSTREAM_KEY"), "{err}");
    }

    #[test]
    fn parses_partial_file_with_overrides() {
        let text = r#"(
            output_dir: "public/data",
            deadline_ms: 60000,
            shard: (per_page: 50),
            logging: (target: Both, level: "debug"),
            sources: [
                (
                    name: "mirror",
                    dialect: lulustream,
                    endpoint: "https://mirror.test/api/file/list",
                    credential: Literal("abc"),
                    concurrency: Some(2),
                    request_delay_ms: Some(0),
                    templates: (thumbnail: Some("https://img.test/{id}.jpg")),
                ),
            ],
        )"#;
        let settings = Settings::parse(text).unwrap();
        assert_eq!(settings.shard.per_page, 50);
        assert_eq!(settings.shard.prefix_ceiling, 500);
        assert_eq!(settings.logging.target, LogTarget::Both);
        assert_eq!(settings.logging.level_filter().unwrap(), LevelFilter::Debug);

        let config = settings.to_pipeline_config(&env_with(&[])).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("public/data"));
        assert_eq!(config.deadline, Duration::from_secs(60));
        let mirror = &config.sources[0];
        assert_eq!(mirror.dialect, Dialect::Lulustream);
        assert_eq!(mirror.credential, "abc");
        assert_eq!(mirror.concurrency, 2);
        assert_eq!(mirror.request_delay, Duration::ZERO);
        assert_eq!(mirror.max_attempts, 3);
        assert_eq!(
            mirror.templates.thumbnail.as_deref(),
            Some("https://img.test/{id}.jpg")
        );
    }

    #[test]
    fn named_environment_variable_is_used() {
        let text = r#"(sources: [(name: "a", dialect: doodstream, endpoint: "https://a.test/list", credential: Env("A_TOKEN"))])"#;
        let config = Settings::parse(text)
            .unwrap()
            .to_pipeline_config(&env_with(&[("A_TOKEN", "tok")]))
            .unwrap();
        assert_eq!(config.sources[0].credential, "tok");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let env = env_with(&[("CATALOG_A_KEY", "k")]);
        let source = |extra: &str| {
            format!(r#"(sources: [(name: "a", dialect: doodstream, endpoint: "https://a.test/list"{extra})])"#)
        };

        for extra in [", per_page: Some(0)", ", concurrency: Some(0)", ", max_attempts: Some(0)"] {
            let settings = Settings::parse(&source(extra)).unwrap();
            assert!(matches!(
                settings.to_pipeline_config(&env),
                Err(SettingsError::Source { .. })
            ));
        }

        let bad_endpoint = r#"(sources: [(name: "a", dialect: doodstream, endpoint: "not a url")])"#;
        let settings = Settings::parse(bad_endpoint).unwrap();
        assert!(settings.to_pipeline_config(&env).is_err());

        let mut settings = Settings::parse(&source("")).unwrap();
        settings.shard.prefix_ceiling = 0;
        assert!(matches!(
            settings.to_pipeline_config(&env),
            Err(SettingsError::Invalid { field: "shard.prefix_ceiling", .. })
        ));

        let mut settings = Settings::parse(&source("")).unwrap();
        settings.sources.push(settings.sources[0].clone());
        assert!(settings.to_pipeline_config(&env).is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let logging = LoggingSettings {
            level: "chatty".into(),
            ..LoggingSettings::default()
        };
        assert!(logging.level_filter().is_err());
    }

    #[test]
    fn existing_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        fs::write(&path, "(owner: \"nightly\")").unwrap();
        let settings = Settings::load(&path).unwrap().unwrap();
        assert_eq!(settings.owner, "nightly");
        assert_eq!(settings.sources, builtin_sources());
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        fs::write(&path, "(output_dir: ").unwrap();
        match Settings::load(&path) {
            Err(SettingsError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
