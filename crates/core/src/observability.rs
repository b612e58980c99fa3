//! Structured logging bootstrap
//!
//! Services call [`init_logging`] once at startup. JSON output is the default so log
//! lines can be shipped as-is; `Pretty` is meant for local runs.

use crate::error::LiveFeedError;
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = LiveFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(LiveFeedError::config(
                format!("Unknown log format '{}'", other),
                "LIVEFEED_LOG_FORMAT",
            )),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `livefeed_ingestion=debug,info`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    /// Build from a filter directive and the optional `LIVEFEED_LOG_FORMAT` variable
    pub fn from_env(filter: impl Into<String>) -> Result<Self, LiveFeedError> {
        let format = match std::env::var("LIVEFEED_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::Json,
        };

        Ok(Self {
            filter: filter.into(),
            format,
        })
    }
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Returns `LoggingError` if the filter is malformed or a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), LiveFeedError> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| LiveFeedError::LoggingError(format!("invalid filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    result.map_err(|e| LiveFeedError::LoggingError(e.to_string()))
}
