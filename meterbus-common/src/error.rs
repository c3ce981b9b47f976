//! Error types.

use thiserror::Error;

/// Common error type for meterbus components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid topic '{topic}': {reason}")]
    Topic { topic: String, reason: String },

    #[error("Invalid payload: {0}")]
    Payload(String),
}

impl Error {
    /// Create a topic validation error.
    pub fn topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Topic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using meterbus's Error.
pub type Result<T> = std::result::Result<T, Error>;
