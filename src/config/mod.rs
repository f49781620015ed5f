//! Configuration management for the worldtally harvester
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Credentials are kept apart from [`Config`] so they
//! are never serialized or logged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote platform endpoint settings
    pub platform: PlatformConfig,

    /// Pagination and pacing of a harvest run
    pub harvest: HarvestConfig,

    /// Authentication backoff policy
    pub retry: RetryConfig,

    /// Timer loop settings
    pub scheduler: SchedulerConfig,

    /// Where durable state and datasets live
    pub storage: StorageConfig,

    /// Control surface
    pub server: ServerConfig,

    /// Run-completion hand-off
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Remote platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// API base URL (no trailing slash)
    pub base_url: String,

    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://api.vrchat.cloud/api/1"),
            user_agent: format!("worldtally/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

/// Harvest pagination and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Ordering dimensions to harvest, in order
    pub orderings: Vec<String>,

    /// Records requested per page
    pub page_size: u32,

    /// Pages requested per ordering dimension
    pub page_count: u32,

    /// Delay between pages of one dimension (milliseconds)
    pub inter_page_delay_ms: u64,

    /// Delay between ordering dimensions (milliseconds)
    pub inter_dimension_delay_ms: u64,

    /// Cooldown before re-requesting a rate-limited page (milliseconds)
    pub rate_limit_cooldown_ms: u64,

    /// Cooldowns allowed for one page before it is recorded as failed
    pub max_rate_limit_retries: u32,

    /// Delay between companion-detail requests (milliseconds)
    pub companion_delay_ms: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            orderings: vec![
                String::from("popularity"),
                String::from("heat"),
                String::from("hotness"),
            ],
            page_size: 100,
            page_count: 5,
            inter_page_delay_ms: 2000,
            inter_dimension_delay_ms: 3000,
            rate_limit_cooldown_ms: 30_000,
            max_rate_limit_retries: 5,
            companion_delay_ms: 1000,
        }
    }
}

impl HarvestConfig {
    /// Config with every pacing delay set to zero (tests, one-shot runs against mocks)
    pub fn without_delays(mut self) -> Self {
        self.inter_page_delay_ms = 0;
        self.inter_dimension_delay_ms = 0;
        self.rate_limit_cooldown_ms = 0;
        self.companion_delay_ms = 0;
        self
    }
}

/// Timer loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between timer-triggered runs (seconds)
    pub interval_secs: u64,

    /// Delay before the first timer run after startup (seconds)
    pub startup_delay_secs: u64,

    /// Run once shortly after startup instead of waiting a full interval
    pub immediate_start: bool,

    /// Delay before the single re-attempt of a failed timer run (seconds)
    pub failure_retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            startup_delay_secs: 5,
            immediate_start: true,
            failure_retry_delay_secs: 600,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    /// Directory holding one dataset file per calendar day
    pub fn daily_dir(&self) -> PathBuf {
        self.data_dir.join("daily-data")
    }

    /// Directory holding retry state, run log and resume marker
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }
}

/// Control surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: SocketAddr,

    /// Allow cross-origin requests
    pub enable_cors: bool,

    /// Log every request through `TraceLayer`
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook receiving run summaries; log-only when unset
    pub webhook_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WORLDTALLY_BASE_URL") {
            self.platform.base_url = url;
        }
        if let Ok(agent) = std::env::var("WORLDTALLY_USER_AGENT") {
            self.platform.user_agent = agent;
        }
        if let Some(timeout) = env_parse("WORLDTALLY_REQUEST_TIMEOUT") {
            self.platform.request_timeout_secs = timeout;
        }
        if let Some(pages) = env_parse("WORLDTALLY_PAGE_COUNT") {
            self.harvest.page_count = pages;
        }
        if let Some(interval) = env_parse("WORLDTALLY_INTERVAL_SECS") {
            self.scheduler.interval_secs = interval;
        }
        if let Ok(value) = std::env::var("IMMEDIATE_START") {
            self.scheduler.immediate_start = value != "false";
        }
        if let Ok(dir) = std::env::var("WORLDTALLY_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.bind_address.set_port(port);
        }
        if let Ok(url) = std::env::var("WORLDTALLY_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(level) = std::env::var("WORLDTALLY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("WORLDTALLY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.platform.base_url.is_empty() {
            anyhow::bail!("platform.base_url must not be empty");
        }

        if !self.platform.base_url.starts_with("http://")
            && !self.platform.base_url.starts_with("https://")
        {
            anyhow::bail!("platform.base_url must start with http:// or https://");
        }

        if self.harvest.orderings.is_empty() {
            anyhow::bail!("harvest.orderings must name at least one ordering");
        }

        if self.harvest.page_size == 0 {
            anyhow::bail!("harvest.page_size must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be greater than 0");
        }

        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.platform.request_timeout_secs)
    }
}

/// Username/password pair for the credential exchange
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read credentials from the environment
    ///
    /// `WORLDTALLY_USERNAME`/`WORLDTALLY_PASSWORD` take precedence over
    /// `VRCHAT_USERNAME`/`VRCHAT_PASSWORD`. Missing values yield empty strings;
    /// [`Credentials::is_complete`] reports whether both are present.
    pub fn from_env() -> Self {
        let username = std::env::var("WORLDTALLY_USERNAME")
            .or_else(|_| std::env::var("VRCHAT_USERNAME"))
            .unwrap_or_default();
        let password = std::env::var("WORLDTALLY_PASSWORD")
            .or_else(|_| std::env::var("VRCHAT_PASSWORD"))
            .unwrap_or_default();

        Self { username, password }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
