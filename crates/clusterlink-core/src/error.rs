//! Error types for the clusterlink core library.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for clusterlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A log level string that does not name a level
    #[error("Invalid log level {0:?}")]
    InvalidLevel(String),

    /// The global tracing subscriber could not be installed or reloaded
    #[error("Tracing error: {0}")]
    Tracing(String),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
