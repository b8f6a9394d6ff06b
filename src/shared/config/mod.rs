//! Sync configuration module
//!
//! Provides [`SyncConfig`], its builder, and loaders for environment
//! variables and TOML files.
//!
//! # Environment
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `FARMSYNC_API_URL` | Base URL of the farm API | `http://127.0.0.1:3000` |
//! | `FARMSYNC_DB_PATH` | SQLite file for cache and queue | `<data dir>/farmsync/offline.db` |
//! | `FARMSYNC_TOKEN` | Bearer token | none |
//! | `FARMSYNC_MAX_ATTEMPTS` | Retry ceiling | `3` |
//! | `FARMSYNC_BACKOFF_BASE_MS` | First backoff delay | `2000` |
//! | `FARMSYNC_BACKOFF_CAP_MS` | Backoff cap | `60000` |
//! | `FARMSYNC_BATCH_SIZE` | Operations per drain batch | `25` |
//! | `FARMSYNC_REQUEST_TIMEOUT_SECS` | Per request timeout | `30` |

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default API base URL
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
/// Default retry ceiling
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default first backoff delay
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
/// Default backoff cap
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Default drain batch size
pub const DEFAULT_BATCH_SIZE: usize = 25;
/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default capacity of the sync event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Where the local SQLite database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// A file on disk, survives restarts
    File(PathBuf),
    /// A private in-memory database (tests, ephemeral sessions)
    InMemory,
}

impl DatabaseLocation {
    /// Platform-specific default file location
    pub fn default_file() -> Self {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("farmsync");
        path.push("offline.db");
        DatabaseLocation::File(path)
    }
}

/// Configuration of the offline synchronization layer
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL every queued path is resolved against
    pub api_url: String,
    /// Bearer token attached to replayed requests
    pub auth_token: Option<String>,
    /// Local database location
    pub database: DatabaseLocation,
    /// Attempts after which a transiently failing operation is dead-lettered
    pub max_attempts: u32,
    /// Delay before the first backoff retry
    pub backoff_base: Duration,
    /// Upper bound on the backoff delay
    pub backoff_cap: Duration,
    /// Jitter factor (0.0 to 1.0) added on top of the backoff delay
    pub backoff_jitter: f64,
    /// Maximum operations fetched per drain batch
    pub batch_size: usize,
    /// Timeout applied to each HTTP request
    pub request_timeout: Duration,
    /// Capacity of the sync event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            database: DatabaseLocation::default_file(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            backoff_jitter: 0.0,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Build a configuration from `FARMSYNC_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = SyncConfig::builder();

        if let Ok(url) = std::env::var("FARMSYNC_API_URL") {
            builder = builder.api_url(url);
        }
        if let Ok(path) = std::env::var("FARMSYNC_DB_PATH") {
            builder = builder.database_path(path);
        }
        if let Ok(token) = std::env::var("FARMSYNC_TOKEN") {
            if !token.is_empty() {
                builder = builder.auth_token(token);
            }
        }
        if let Some(value) = env_number::<u32>("FARMSYNC_MAX_ATTEMPTS")? {
            builder = builder.max_attempts(value);
        }
        if let Some(value) = env_number::<u64>("FARMSYNC_BACKOFF_BASE_MS")? {
            builder = builder.backoff_base(Duration::from_millis(value));
        }
        if let Some(value) = env_number::<u64>("FARMSYNC_BACKOFF_CAP_MS")? {
            builder = builder.backoff_cap(Duration::from_millis(value));
        }
        if let Some(value) = env_number::<usize>("FARMSYNC_BATCH_SIZE")? {
            builder = builder.batch_size(value);
        }
        if let Some(value) = env_number::<u64>("FARMSYNC_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout(Duration::from_secs(value));
        }

        builder.build()
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(source)?;
        file.into_builder().build()
    }

    /// Load a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Get the full URL for an API path
    pub fn api_url_for(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.api_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                self.api_url
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::invalid(
                "backoff_cap",
                "must not be smaller than backoff_base",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::invalid("backoff_jitter", "must be between 0.0 and 1.0"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a valid number", raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    api_url: Option<String>,
    auth_token: Option<String>,
    database: Option<DatabaseLocation>,
    max_attempts: Option<u32>,
    backoff_base: Option<Duration>,
    backoff_cap: Option<Duration>,
    backoff_jitter: Option<f64>,
    batch_size: Option<usize>,
    request_timeout: Option<Duration>,
    event_capacity: Option<usize>,
}

impl SyncConfigBuilder {
    /// Set the API base URL
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    /// Set the bearer token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Store cache and queue in this SQLite file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(DatabaseLocation::File(path.into()));
        self
    }

    /// Keep cache and queue in memory only
    pub fn in_memory(mut self) -> Self {
        self.database = Some(DatabaseLocation::InMemory);
        self
    }

    /// Set the retry ceiling
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the first backoff delay
    pub fn backoff_base(mut self, delay: Duration) -> Self {
        self.backoff_base = Some(delay);
        self
    }

    /// Set the backoff cap
    pub fn backoff_cap(mut self, delay: Duration) -> Self {
        self.backoff_cap = Some(delay);
        self
    }

    /// Set the backoff jitter factor
    pub fn backoff_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = Some(jitter);
        self
    }

    /// Set the drain batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        let defaults = SyncConfig::default();
        let config = SyncConfig {
            api_url: self.api_url.unwrap_or(defaults.api_url),
            auth_token: self.auth_token.or(defaults.auth_token),
            database: self.database.unwrap_or(defaults.database),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base: self.backoff_base.unwrap_or(defaults.backoff_base),
            backoff_cap: self.backoff_cap.unwrap_or(defaults.backoff_cap),
            backoff_jitter: self.backoff_jitter.unwrap_or(defaults.backoff_jitter),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        };
        config.validate()?;
        Ok(config)
    }
}

/// On-disk TOML layout
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    api_url: Option<String>,
    auth_token: Option<String>,
    database_path: Option<PathBuf>,
    in_memory: bool,
    max_attempts: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    backoff_jitter: Option<f64>,
    batch_size: Option<usize>,
    request_timeout_secs: Option<u64>,
    event_capacity: Option<usize>,
}

impl FileConfig {
    fn into_builder(self) -> SyncConfigBuilder {
        let mut builder = SyncConfigBuilder {
            api_url: self.api_url,
            auth_token: self.auth_token,
            database: self.database_path.map(DatabaseLocation::File),
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base_ms.map(Duration::from_millis),
            backoff_cap: self.backoff_cap_ms.map(Duration::from_millis),
            backoff_jitter: self.backoff_jitter,
            batch_size: self.batch_size,
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            event_capacity: self.event_capacity,
        };
        if self.in_memory {
            builder = builder.in_memory();
        }
        builder
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}
