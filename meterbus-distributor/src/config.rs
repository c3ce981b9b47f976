//! Configuration for the distributor.

use serde::{Deserialize, Serialize};

use meterbus_common::topic::{validate_pattern, validate_topic};
use meterbus_common::{BusConfig, LoggingConfig, default_topic_root, subtree_pattern};
use meterbus_framework::{ComponentConfig, FrameworkError};

/// Complete distributor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Bus transport to subscribe on
    #[serde(default)]
    pub bus: BusConfig,

    /// What to subscribe to
    #[serde(default)]
    pub subscribe: SubscribeConfig,

    /// First sequence number handed out (default: 1)
    #[serde(default = "default_initial_sequence")]
    pub initial_sequence: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_initial_sequence() -> u64 {
    1
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            subscribe: SubscribeConfig::default(),
            initial_sequence: default_initial_sequence(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeConfig {
    /// Topic root; the whole subtree below it is subscribed
    /// (default: "openfmb/metermodule/MeterReadingProfile", `.`-separated on NATS)
    #[serde(default)]
    pub topic_root: Option<String>,

    /// Literal pattern used instead of the topic root subtree
    #[serde(default)]
    pub pattern: Option<String>,

    /// Messages buffered between the transport and the consumer (default: 256)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            topic_root: None,
            pattern: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DistributorConfig {
    /// The topic root, defaulting to the reading root of the bus transport.
    pub fn topic_root(&self) -> String {
        self.subscribe
            .topic_root
            .clone()
            .unwrap_or_else(|| default_topic_root(self.bus.transport()))
    }

    /// The subscription pattern for the configured transport.
    pub fn pattern(&self) -> String {
        match &self.subscribe.pattern {
            Some(pattern) => pattern.clone(),
            None => subtree_pattern(&self.topic_root(), self.bus.transport()),
        }
    }
}

impl ComponentConfig for DistributorConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> meterbus_framework::Result<()> {
        self.bus.validate()?;

        if self.subscribe.channel_capacity == 0 {
            return Err(FrameworkError::validation(
                "subscribe.channel_capacity must be > 0",
            ));
        }

        match &self.subscribe.pattern {
            Some(pattern) => validate_pattern(pattern, self.bus.transport())?,
            None => validate_topic(&self.topic_root(), self.bus.transport())?,
        }

        Ok(())
    }
}
