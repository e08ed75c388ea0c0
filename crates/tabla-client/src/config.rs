//! Client configuration.
//!
//! Values are layered from an optional TOML file and environment variables
//! with the `TABLA` prefix and `__` separator, e.g.
//! `TABLA__CACHE__STALE_TIME=30s` overrides `[cache] stale_time`.
//! Durations use humantime syntax (`90s`, `5m`, `24h`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tabla.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config build error: {0}")]
    Build(String),

    #[error("Config deserialize error: {0}")]
    Deserialize(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub geolocation: GeolocationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.api.base_url)
            .map_err(|e| ConfigError::Validation(format!("api.base_url is invalid: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "api.base_url must use http or https".into(),
            ));
        }
        if self.api.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "api.request_timeout must be > 0".into(),
            ));
        }
        if self.session.refresh_interval.is_zero() {
            return Err(ConfigError::Validation(
                "session.refresh_interval must be > 0".into(),
            ));
        }
        if self.cache.gc_time < self.cache.stale_time {
            return Err(ConfigError::Validation(
                "cache.gc_time must not be shorter than cache.stale_time".into(),
            ));
        }
        if self.cache.retry_base_delay > self.cache.retry_max_delay {
            return Err(ConfigError::Validation(
                "cache.retry_base_delay must not exceed cache.retry_max_delay".into(),
            ));
        }
        if self.geolocation.storage_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "geolocation.storage_key must not be empty".into(),
            ));
        }
        crate::logging::parse_filter(&self.logging.level)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the remote REST API.
    pub base_url: String,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tabla.app".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Token lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refresh proactively once the remaining token lifetime drops below this.
    #[serde(with = "humantime_serde")]
    pub refresh_threshold: Duration,
    /// Period of the background validity check while authenticated.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(5 * 60), // 5 minutes
            refresh_interval: Duration::from_secs(4 * 60),  // 4 minutes
        }
    }
}

/// Query cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Data younger than this is served without reloading.
    #[serde(with = "humantime_serde")]
    pub stale_time: Duration,
    /// Unobserved entries idle for longer than this are evicted.
    #[serde(with = "humantime_serde")]
    pub gc_time: Duration,
    /// Maximum retries for retryable load failures.
    pub retry_attempts: u32,
    /// First retry delay; doubles on each retry.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Upper bound for a single retry delay.
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Period for re-validating mounted queries. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub refetch_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60), // 5 minutes
            gc_time: Duration::from_secs(30 * 60),   // 30 minutes
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            refetch_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Storage key of the last known coordinate.
    pub storage_key: String,
    /// Stored coordinates older than this are treated as absent.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Default timeout for a position request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub high_accuracy: bool,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            storage_key: "tabla_user_location".to_string(),
            max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
            timeout: Duration::from_secs(10),
            high_accuracy: true,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage file. Defaults to `~/.tabla/storage.json`.
    pub path: Option<PathBuf>,
    pub token_key: String,
    pub user_key: String,
    pub theme_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            token_key: "tabla_auth_token".to_string(),
            user_key: "tabla_user".to_string(),
            theme_key: "tabla_theme".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::*;

    /// Load configuration from `path` (or `tabla.toml` when present) plus
    /// `TABLA__*` environment overrides, then validate it.
    pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if p.exists() {
                    builder = builder.add_source(File::from(p.to_path_buf()));
                } else {
                    tracing::warn!(path = %p.display(), "Config file not found, using defaults");
                }
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., TABLA__API__BASE_URL=http://localhost:8000
        builder = builder.add_source(
            Environment::with_prefix("TABLA")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: ClientConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }
}
