//! Error types shared by LiveFeed crates

use thiserror::Error;

/// Errors raised by the shared core utilities
#[derive(Debug, Error)]
pub enum LiveFeedError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        /// Environment variable that caused the error, when known
        key: Option<String>,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Logging initialization failed: {0}")]
    LoggingError(String),
}

impl LiveFeedError {
    /// Shorthand for a configuration error tied to an environment key
    pub fn config(message: impl Into<String>, key: &str) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
