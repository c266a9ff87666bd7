//! Configuration management for the check service.
//!
//! Configuration is loaded from, in increasing precedence:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables
//!
//! # Example
//!
//! ```ignore
//! use fgacheck_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "FGACHECK";

/// Service configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Check resolution limits
    #[serde(default)]
    pub check: CheckSettings,

    /// Check query cache
    #[serde(default)]
    pub check_query_cache: CheckQueryCacheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Limits applied to every check.
///
/// ```yaml
/// check:
///   resolve_node_limit: 25
///   resolve_node_breadth_limit: 100
///   request_timeout_ms: 3000
///   max_contextual_tuples: 100
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CheckSettings {
    /// Maximum recursion depth of a check.
    /// Environment variable: `FGACHECK_CHECK__RESOLVE_NODE_LIMIT`
    #[serde(default = "default_resolve_node_limit")]
    pub resolve_node_limit: u32,

    /// Maximum sub-checks evaluated concurrently per set operation.
    /// Environment variable: `FGACHECK_CHECK__RESOLVE_NODE_BREADTH_LIMIT`
    #[serde(default = "default_resolve_node_breadth_limit")]
    pub resolve_node_breadth_limit: usize,

    /// Deadline of a whole check in milliseconds.
    /// Environment variable: `FGACHECK_CHECK__REQUEST_TIMEOUT_MS`
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum contextual tuples accepted with one check.
    #[serde(default = "default_max_contextual_tuples")]
    pub max_contextual_tuples: usize,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            resolve_node_limit: default_resolve_node_limit(),
            resolve_node_breadth_limit: default_resolve_node_breadth_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            max_contextual_tuples: default_max_contextual_tuples(),
        }
    }
}

impl CheckSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_resolve_node_limit() -> u32 {
    fgacheck_domain::resolver::DEFAULT_RESOLVE_NODE_LIMIT
}

fn default_resolve_node_breadth_limit() -> usize {
    fgacheck_domain::resolver::DEFAULT_CONCURRENCY_LIMIT
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_max_contextual_tuples() -> usize {
    100
}

/// Check query cache settings.
///
/// Disabled by default: cached decisions can be served for up to `ttl_ms`
/// after the tuples behind them change.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CheckQueryCacheSettings {
    /// Environment variable: `FGACHECK_CHECK_QUERY_CACHE__ENABLED`
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of cached sub-problems.
    #[serde(default = "default_cache_limit")]
    pub limit: u64,

    /// Time-to-live of a cached entry in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CheckQueryCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: default_cache_limit(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CheckQueryCacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_cache_limit() -> u64 {
    fgacheck_domain::cache::DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_ms() -> u64 {
    10_000
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format (true for production, false for development)
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

fn invalid(message: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        message: message.into(),
    }
}

fn environment() -> Environment {
    // FGACHECK_CHECK__REQUEST_TIMEOUT_MS -> check.request_timeout_ms
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(environment())
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.check.resolve_node_limit == 0 {
            return Err(invalid("check.resolve_node_limit must be greater than 0"));
        }
        if self.check.resolve_node_breadth_limit == 0 {
            return Err(invalid(
                "check.resolve_node_breadth_limit must be greater than 0",
            ));
        }
        if self.check.request_timeout_ms == 0 {
            return Err(invalid("check.request_timeout_ms must be greater than 0"));
        }

        if self.check_query_cache.enabled {
            if self.check_query_cache.limit == 0 {
                return Err(invalid(
                    "check_query_cache.limit must be greater than 0 when the cache is enabled",
                ));
            }
            if self.check_query_cache.ttl_ms == 0 {
                return Err(invalid(
                    "check_query_cache.ttl_ms must be greater than 0 when the cache is enabled",
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level must be one of: {:?}, got: {}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
