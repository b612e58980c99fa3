//! Shared configuration loader for LiveFeed services
//!
//! All configuration is read from environment variables with the `LIVEFEED_` prefix,
//! optionally seeded from a `.env` file through dotenvy. Each configuration struct
//! implements [`ConfigLoader`] so services load and validate it the same way.
//!
//! # Example
//!
//! ```no_run
//! use livefeed_core::config::{ConfigLoader, DatabaseConfig, RedisConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! livefeed_core::config::load_dotenv();
//!
//! let db_config = DatabaseConfig::from_env()?;
//! let redis_config = RedisConfig::from_env()?;
//!
//! db_config.validate()?;
//! redis_config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::LiveFeedError;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Provides standardized methods for loading and validating configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a required variable is missing or a value
    /// cannot be parsed.
    fn from_env() -> Result<Self, LiveFeedError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any validation check fails.
    fn validate(&self) -> Result<(), LiveFeedError>;
}

/// PostgreSQL connection settings
///
/// # Environment Variables
///
/// - `LIVEFEED_DATABASE_URL` (required, falls back to `DATABASE_URL`)
/// - `LIVEFEED_DATABASE_MAX_CONNECTIONS` (default: 20)
/// - `LIVEFEED_DATABASE_MIN_CONNECTIONS` (default: 2)
/// - `LIVEFEED_DATABASE_ACQUIRE_TIMEOUT` seconds (default: 30)
/// - `LIVEFEED_DATABASE_IDLE_TIMEOUT` seconds (default: 600)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/livefeed".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, LiveFeedError> {
        let url = std::env::var("LIVEFEED_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                LiveFeedError::config(
                    "DATABASE_URL or LIVEFEED_DATABASE_URL must be set",
                    "LIVEFEED_DATABASE_URL",
                )
            })?;

        let defaults = DatabaseConfig::default();
        let max_connections =
            parse_env_var("LIVEFEED_DATABASE_MAX_CONNECTIONS", defaults.max_connections)?;
        let min_connections =
            parse_env_var("LIVEFEED_DATABASE_MIN_CONNECTIONS", defaults.min_connections)?;
        let acquire_timeout_secs = parse_env_var("LIVEFEED_DATABASE_ACQUIRE_TIMEOUT", 30u64)?;
        let idle_timeout_secs = parse_env_var("LIVEFEED_DATABASE_IDLE_TIMEOUT", 600u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), LiveFeedError> {
        Url::parse(&self.url).map_err(|e| {
            LiveFeedError::config(
                format!("Invalid DATABASE_URL: {}", e),
                "LIVEFEED_DATABASE_URL",
            )
        })?;

        if self.max_connections == 0 {
            return Err(LiveFeedError::config(
                "max_connections must be greater than 0",
                "LIVEFEED_DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(LiveFeedError::config(
                format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                "LIVEFEED_DATABASE_MIN_CONNECTIONS",
            ));
        }

        if self.acquire_timeout.as_secs() == 0 {
            return Err(LiveFeedError::config(
                "acquire_timeout must be greater than 0 seconds",
                "LIVEFEED_DATABASE_ACQUIRE_TIMEOUT",
            ));
        }

        Ok(())
    }
}

/// Redis connection settings
///
/// # Environment Variables
///
/// - `LIVEFEED_REDIS_URL` (required, falls back to `REDIS_URL`)
/// - `LIVEFEED_REDIS_CONNECTION_TIMEOUT` seconds (default: 10)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl ConfigLoader for RedisConfig {
    fn from_env() -> Result<Self, LiveFeedError> {
        let url = std::env::var("LIVEFEED_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .map_err(|_| {
                LiveFeedError::config(
                    "REDIS_URL or LIVEFEED_REDIS_URL must be set",
                    "LIVEFEED_REDIS_URL",
                )
            })?;

        let connection_timeout_secs = parse_env_var("LIVEFEED_REDIS_CONNECTION_TIMEOUT", 10u64)?;

        Ok(Self {
            url,
            connection_timeout: Duration::from_secs(connection_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), LiveFeedError> {
        let parsed = Url::parse(&self.url).map_err(|e| {
            LiveFeedError::config(format!("Invalid REDIS_URL: {}", e), "LIVEFEED_REDIS_URL")
        })?;

        if parsed.scheme() != "redis" && parsed.scheme() != "rediss" {
            return Err(LiveFeedError::config(
                format!("Unsupported Redis scheme '{}'", parsed.scheme()),
                "LIVEFEED_REDIS_URL",
            ));
        }

        Ok(())
    }
}

/// HTTP service settings for the health endpoint and log level
///
/// # Environment Variables
///
/// - `LIVEFEED_SERVICE_HOST` (default: "0.0.0.0")
/// - `LIVEFEED_SERVICE_PORT` (default: 8085)
/// - `LIVEFEED_LOG_LEVEL` (default: "info", falls back to `RUST_LOG`)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            log_level: "info".to_string(),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, LiveFeedError> {
        let defaults = ServiceConfig::default();

        let host = std::env::var("LIVEFEED_SERVICE_HOST").unwrap_or(defaults.host);
        let port = parse_env_var("LIVEFEED_SERVICE_PORT", defaults.port)?;
        let log_level = std::env::var("LIVEFEED_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(defaults.log_level);

        Ok(Self {
            host,
            port,
            log_level,
        })
    }

    fn validate(&self) -> Result<(), LiveFeedError> {
        if self.port == 0 {
            return Err(LiveFeedError::config(
                "port must be greater than 0",
                "LIVEFEED_SERVICE_PORT",
            ));
        }

        if self.log_level.trim().is_empty() {
            return Err(LiveFeedError::config(
                "log level must not be empty",
                "LIVEFEED_LOG_LEVEL",
            ));
        }

        Ok(())
    }
}

/// Parse an environment variable, falling back to `default` when unset
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value is set but cannot be parsed
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, LiveFeedError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| LiveFeedError::config(format!("Failed to parse {}: {}", key, e), key))
        })
        .unwrap_or(Ok(default))
}

/// Load a `.env` file if present
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
