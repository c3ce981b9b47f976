//! Configuration for the Modbus bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use meterbus_common::topic::validate_topic;
use meterbus_common::{BusConfig, LoggingConfig, Measurement, PayloadFormat, default_topic};
use meterbus_framework::{ComponentConfig, FrameworkError};

/// Largest register count a single Read Holding Registers request may ask for.
pub const MAX_POLL_COUNT: u16 = 125;

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bus transport the readings are published on
    #[serde(default)]
    pub bus: BusConfig,

    /// Modbus device to poll
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Register range and poll period
    #[serde(default)]
    pub poll: PollConfig,

    /// Destination topic and payload format
    #[serde(default)]
    pub publish: PublishConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus TCP device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Device host (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,

    /// Device port (default: 1502)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit id to read from (default: 1)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and request timeout in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ModbusConfig {
    /// `host:port` of the device.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which registers to poll and how often.
///
/// `address` and `count` default to the selected measurement's range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Measurement to poll (default: current)
    #[serde(default = "default_measurement")]
    pub measurement: Measurement,

    /// Explicit first register, overriding the measurement's address
    #[serde(default)]
    pub address: Option<u16>,

    /// Explicit register count, overriding the measurement's width
    #[serde(default)]
    pub count: Option<u16>,

    /// Poll period in milliseconds (default: 1000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_measurement() -> Measurement {
    Measurement::Current
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            measurement: default_measurement(),
            address: None,
            count: None,
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollConfig {
    pub fn address(&self) -> u16 {
        self.address.unwrap_or_else(|| self.measurement.address())
    }

    pub fn count(&self) -> u16 {
        self.count.unwrap_or(Measurement::WIDTH)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Publishing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Destination topic (default: "openfmb/metermodule/MeterReadingProfile/modbus",
    /// `.`-separated on NATS)
    #[serde(default)]
    pub topic: Option<String>,

    /// Payload format: "raw", "value" or "json" (default: "raw")
    #[serde(default)]
    pub format: PayloadFormat,
}

impl BridgeConfig {
    /// Destination topic, defaulting to the reading topic of the bus transport.
    pub fn topic(&self) -> String {
        self.publish
            .topic
            .clone()
            .unwrap_or_else(|| default_topic(self.bus.transport()))
    }
}

impl ComponentConfig for BridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> meterbus_framework::Result<()> {
        self.bus.validate()?;

        if self.modbus.host.is_empty() {
            return Err(FrameworkError::validation("modbus.host must not be empty"));
        }
        if self.modbus.port == 0 {
            return Err(FrameworkError::validation("modbus.port must be > 0"));
        }
        if !(1..=247).contains(&self.modbus.unit_id) {
            return Err(FrameworkError::validation(format!(
                "modbus.unit_id {} is outside 1..=247",
                self.modbus.unit_id
            )));
        }
        if self.modbus.timeout_ms == 0 {
            return Err(FrameworkError::validation("modbus.timeout_ms must be > 0"));
        }

        let count = self.poll.count();
        if count == 0 || count > MAX_POLL_COUNT {
            return Err(FrameworkError::validation(format!(
                "poll.count must be within 1..={}, got {}",
                MAX_POLL_COUNT, count
            )));
        }
        if self.poll.address() as u32 + count as u32 > u16::MAX as u32 + 1 {
            return Err(FrameworkError::validation(format!(
                "poll range {}+{} exceeds the register address space",
                self.poll.address(),
                count
            )));
        }
        if self.poll.interval_ms == 0 {
            return Err(FrameworkError::validation("poll.interval_ms must be > 0"));
        }

        validate_topic(&self.topic(), self.bus.transport())?;
        if self.publish.format.requires_pair() && count != Measurement::WIDTH {
            return Err(FrameworkError::validation(format!(
                "publish.format 'value' needs poll.count = 2, got {}",
                count
            )));
        }

        Ok(())
    }
}
