//! meterbus Common Library
//!
//! This crate provides shared types and utilities for the meterbus emulator,
//! bridge and distributor:
//!
//! - [`codec`] - Float to register-pair encoding (`encode`, `decode`, `EncodedPair`)
//! - [`measurement`] - Meter register map (`Measurement`) and `MeterReading`
//! - [`payload`] - Rendering of polled registers into bus payloads
//! - [`topic`] - Topic builders, wildcard patterns and filter matching
//! - [`config`] - Bus transport and logging configuration
//! - [`error`] - Error types

pub mod codec;
pub mod config;
pub mod error;
pub mod measurement;
pub mod payload;
pub mod topic;

// Re-export commonly used types at the crate root
pub use codec::{EncodedPair, decode, encode};
pub use config::{
    BusConfig, LogFormat, LoggingConfig, MqttConfig, MqttQos, NatsConfig, Transport, ZenohConfig,
};
pub use error::{Error, Result};
pub use measurement::{DEFAULT_REGISTER_COUNT, Measurement, MeterReading};
pub use payload::{BridgeMessage, PayloadFormat, RegisterSample, parse_raw_words};
pub use topic::{
    DEFAULT_TOPIC, DEFAULT_TOPIC_ROOT, default_topic, default_topic_root, subtree_pattern,
    topic_matches,
};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use meterbus_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
