//! Configuration management for Skyrelay
//!
//! One TOML file describes a curation job. Every section has defaults, so a
//! file only needs a `[source]`. Durations are humantime strings ("8h",
//! "30m", "2s") and are parsed by [`Config::validate`] and the builders
//! below.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::executor::ExecutorConfig;
use crate::filter::FilterPolicy;
use crate::pacing::{Pacer, PacingPolicy};
use crate::plan::{QuotaConfig, SortOrder};
use crate::store::StoreMode;

/// Largest page the feed endpoints accept
pub const MAX_FETCH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    pub source: SourceConfig,
    pub filter: FilterConfig,
    pub plan: PlanConfig,
    pub pacing: PacingConfig,
    pub run: RunConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Handle or DID; `BSKY_USERNAME` takes precedence
    pub identifier: Option<String>,
    /// App password; `BSKY_PASSWORD` takes precedence (not serialized)
    #[serde(skip_serializing)]
    pub app_password: Option<String>,
    /// PDS / XRPC base URL
    pub service: String,
    /// Per-request timeout
    pub timeout: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            identifier: None,
            app_password: None,
            service: "https://bsky.social".to_string(),
            timeout: "30s".to_string(),
        }
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("identifier", &self.identifier)
            .field(
                "app_password",
                &self.app_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("service", &self.service)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A feed generator
    #[default]
    Feed,
    /// Every member of a list, one author feed each
    List,
    /// An explicit set of authors
    Authors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Feed generator or list uri
    pub uri: Option<String>,
    /// Handles or DIDs for `kind = "authors"`
    pub authors: Vec<String>,
    /// Items requested per fetch
    pub limit: u32,
    /// Passed to author feed requests (e.g. "posts_no_replies")
    pub author_filter: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Feed,
            uri: None,
            authors: Vec::new(),
            limit: MAX_FETCH_LIMIT,
            author_filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub max_age: String,
    pub require_media: bool,
    pub external_counts_as_media: bool,
    pub allow_indexed_at_fallback: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_age: "8h".to_string(),
            require_media: false,
            external_counts_as_media: false,
            allow_indexed_at_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub order: SortOrder,
    pub global_cap: usize,
    pub per_author_cap: usize,
    pub exempt_author: Option<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            order: SortOrder::OldestFirst,
            global_cap: 30,
            per_author_cap: 2,
            exempt_author: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    #[default]
    Fixed,
    Spread,
    Escalating,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub mode: PacingMode,
    /// Fixed mode: pause before each write
    pub delay: String,
    /// Spread mode: wall-clock window shared by all planned writes
    pub window: String,
    /// Escalating mode
    pub base: String,
    pub step: String,
    pub every: u32,
    pub max: String,
    /// Random extra delay, uniformly drawn from 0..=jitter
    pub jitter: String,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            mode: PacingMode::Fixed,
            delay: "2s".to_string(),
            window: "30m".to_string(),
            base: "2s".to_string(),
            step: "1s".to_string(),
            every: 10,
            max: "30s".to_string(),
            jitter: "0s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Safety ceiling on write calls per run; 0 disables it
    pub max_actions: usize,
    /// Like every reposted item
    pub like: bool,
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_actions: 0,
            like: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub mode: StoreMode,
    /// Prune entries older than this; enables timestamped lines
    pub retention: Option<String>,
}

fn default_store_path() -> String {
    resolve_data_path()
        .map(|dir| dir.join("reposted.txt").to_string_lossy().into_owned())
        .unwrap_or_else(|_| "~/.local/share/skyrelay/reposted.txt".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            mode: StoreMode::Append,
            retention: None,
        }
    }
}

/// Login credentials for the acting account
#[derive(Debug)]
pub struct Credentials {
    pub identifier: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(identifier: &str, password: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value that cannot be expressed in the types alone
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let service = self.account.service.trim();
        if !(service.starts_with("https://") || service.starts_with("http://")) {
            return Err(ConfigError::invalid(
                "account.service",
                format!("'{}' is not an http(s) URL", self.account.service),
            ));
        }
        parse_duration("account.timeout", &self.account.timeout)?;

        match self.source.kind {
            SourceKind::Feed | SourceKind::List => {
                let uri = self.source.uri.as_deref().unwrap_or("").trim();
                if uri.is_empty() {
                    return Err(ConfigError::MissingField("source.uri".to_string()));
                }
            }
            SourceKind::Authors => {
                if self.source.authors.iter().all(|a| a.trim().is_empty()) {
                    return Err(ConfigError::MissingField("source.authors".to_string()));
                }
            }
        }
        if !(1..=MAX_FETCH_LIMIT).contains(&self.source.limit) {
            return Err(ConfigError::invalid(
                "source.limit",
                format!("must be between 1 and {}", MAX_FETCH_LIMIT),
            ));
        }

        if self.plan.global_cap == 0 {
            return Err(ConfigError::invalid("plan.global_cap", "must be at least 1"));
        }
        if self.plan.per_author_cap == 0 {
            return Err(ConfigError::invalid(
                "plan.per_author_cap",
                "must be at least 1",
            ));
        }

        let policy = self.filter_policy()?;
        self.pacer()?;

        if let Some(retention) = self.store_retention()? {
            if retention < policy.max_age {
                return Err(ConfigError::invalid(
                    "store.retention",
                    format!(
                        "must be at least filter.max_age ({}), or pruned items could be reposted again",
                        self.filter.max_age
                    ),
                ));
            }
        }
        if self.store.path.trim().is_empty() {
            return Err(ConfigError::MissingField("store.path".to_string()));
        }

        Ok(())
    }

    pub fn filter_policy(&self) -> std::result::Result<FilterPolicy, ConfigError> {
        Ok(FilterPolicy {
            max_age: parse_duration("filter.max_age", &self.filter.max_age)?,
            require_media: self.filter.require_media,
            external_counts_as_media: self.filter.external_counts_as_media,
            allow_indexed_at_fallback: self.filter.allow_indexed_at_fallback,
        })
    }

    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            order: self.plan.order,
            global_cap: self.plan.global_cap,
            per_author_cap: self.plan.per_author_cap,
            exempt_author: self
                .plan
                .exempt_author
                .as_ref()
                .filter(|a| !a.trim().is_empty())
                .cloned(),
        }
    }

    pub fn pacer(&self) -> std::result::Result<Pacer, ConfigError> {
        let pacing = &self.pacing;
        let policy = match pacing.mode {
            PacingMode::Fixed => PacingPolicy::Fixed {
                delay: parse_duration("pacing.delay", &pacing.delay)?,
            },
            PacingMode::Spread => {
                let window = parse_duration("pacing.window", &pacing.window)?;
                if window.is_zero() {
                    return Err(ConfigError::invalid(
                        "pacing.window",
                        "spread pacing needs a non-zero window",
                    ));
                }
                PacingPolicy::Spread { window }
            }
            PacingMode::Escalating => {
                if pacing.every == 0 {
                    return Err(ConfigError::invalid("pacing.every", "must be at least 1"));
                }
                let base = parse_duration("pacing.base", &pacing.base)?;
                let max = parse_duration("pacing.max", &pacing.max)?;
                if max < base {
                    return Err(ConfigError::invalid(
                        "pacing.max",
                        "must not be shorter than pacing.base",
                    ));
                }
                PacingPolicy::Escalating {
                    base,
                    step: parse_duration("pacing.step", &pacing.step)?,
                    every: pacing.every,
                    max,
                }
            }
        };
        let jitter = parse_duration("pacing.jitter", &pacing.jitter)?;
        Ok(Pacer::new(policy, jitter))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            like: self.run.like,
            max_actions: (self.run.max_actions > 0).then_some(self.run.max_actions),
        }
    }

    pub fn request_timeout(&self) -> std::result::Result<Duration, ConfigError> {
        parse_duration("account.timeout", &self.account.timeout)
    }

    pub fn store_retention(&self) -> std::result::Result<Option<Duration>, ConfigError> {
        self.store
            .retention
            .as_deref()
            .map(|r| parse_duration("store.retention", r))
            .transpose()
    }

    /// Store path with `~` and environment variables expanded
    pub fn store_path(&self) -> std::result::Result<PathBuf, ConfigError> {
        shellexpand::full(&self.store.path)
            .map(|p| PathBuf::from(p.as_ref()))
            .map_err(|e| ConfigError::invalid("store.path", e.to_string()))
    }

    /// Resolve credentials from the environment, falling back to the file
    ///
    /// `BSKY_USERNAME` and `BSKY_PASSWORD` win over `account.identifier` and
    /// `account.app_password`.
    pub fn credentials(&self) -> std::result::Result<Credentials, ConfigError> {
        let identifier = env_non_empty("BSKY_USERNAME")
            .or_else(|| self.account.identifier.clone().filter(|i| !i.trim().is_empty()))
            .ok_or_else(|| {
                ConfigError::MissingField("account.identifier (or BSKY_USERNAME)".to_string())
            })?;

        let password = match env_non_empty("BSKY_PASSWORD") {
            Some(password) => {
                tracing::debug!("Using app password from BSKY_PASSWORD environment variable");
                password
            }
            None => self
                .account
                .app_password
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    ConfigError::MissingField("account.app_password (or BSKY_PASSWORD)".to_string())
                })?,
        };

        Ok(Credentials {
            identifier: identifier.trim().to_string(),
            password: SecretString::from(password),
        })
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_duration(field: &str, value: &str) -> std::result::Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::invalid(field, format!("'{}' is not a duration: {}", value, e)))
}

/// Resolve the configuration file path using the XDG base directories
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SKYRELAY_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("skyrelay").join("config.toml"))
}

/// Resolve the data directory path using the XDG base directories
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("skyrelay"))
}
