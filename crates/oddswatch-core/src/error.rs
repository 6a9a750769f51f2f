//! Error types for Oddswatch

use thiserror::Error;

/// Result type alias using Oddswatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Oddswatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Acquisition error for a tracked source
    #[error("Acquisition failed for {source_name}: {message}")]
    Acquisition {
        /// Tracked source name
        source_name: String,
        /// What went wrong
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout {
        /// What was running
        operation: String,
        /// Deadline in seconds
        seconds: u64,
    },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an acquisition error
    pub fn acquisition(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acquisition {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
