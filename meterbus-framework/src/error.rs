//! Error types for the framework.

use thiserror::Error;

/// Result type alias using [`FrameworkError`].
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Errors raised by the shared runtime plumbing.
#[derive(Error, Debug)]
pub enum FrameworkError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Bus connection error.
    #[error("{transport} connection error: {message}")]
    Connection { transport: String, message: String },

    /// Publishing error.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Subscription error.
    #[error("Failed to subscribe to {pattern}: {message}")]
    Subscribe { pattern: String, message: String },

    /// Error while closing a connection.
    #[error("Failed to close {transport} connection: {message}")]
    Close { transport: String, message: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameworkError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a connection error for a transport.
    pub fn connection(transport: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            transport: transport.into(),
            message: message.to_string(),
        }
    }
}

impl From<json5::Error> for FrameworkError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<meterbus_common::Error> for FrameworkError {
    fn from(err: meterbus_common::Error) -> Self {
        match err {
            meterbus_common::Error::Config(msg) => Self::ConfigValidation(msg),
            other => Self::Config(other.to_string()),
        }
    }
}
