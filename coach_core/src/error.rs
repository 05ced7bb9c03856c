//! Error types for the coach_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for coach_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog or input validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session run state error (wrong step, missing draft, ...)
    #[error("State error: {0}")]
    State(String),

    /// Writing a finalized result or session record failed.
    ///
    /// The data is kept in memory; callers may retry.
    #[error("Persistence error: {message}")]
    Persistence { message: String, retryable: bool },

    /// An external collaborator (history, schedule, notifier) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller can retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Persistence { retryable: true, .. })
    }

    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        Error::Persistence {
            message: err.to_string(),
            retryable: true,
        }
    }
}
