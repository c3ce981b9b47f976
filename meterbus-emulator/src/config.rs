//! Configuration for the meter emulator.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use meterbus_common::{DEFAULT_REGISTER_COUNT, LoggingConfig, Measurement};
use meterbus_framework::{ComponentConfig, FrameworkError};

use crate::generator::SamplingRanges;

/// Complete emulator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Modbus TCP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Register address spaces
    #[serde(default)]
    pub registers: RegistersConfig,

    /// Measurement update schedule and sampling
    #[serde(default)]
    pub update: UpdateConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modbus TCP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (default: 1502, 0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1502
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Register address space settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistersConfig {
    /// Registers per unit id (default: 5000)
    #[serde(default = "default_count")]
    pub count: usize,

    /// Served unit ids (default: [1, 2])
    #[serde(default = "default_unit_ids")]
    pub unit_ids: Vec<u8>,
}

fn default_count() -> usize {
    DEFAULT_REGISTER_COUNT
}

fn default_unit_ids() -> Vec<u8> {
    vec![1, 2]
}

impl Default for RegistersConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            unit_ids: default_unit_ids(),
        }
    }
}

/// Update loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Update period in milliseconds (default: 1000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// RNG seed for reproducible measurements
    #[serde(default)]
    pub seed: Option<u64>,

    /// Sampling intervals for the generated quantities
    #[serde(default)]
    pub ranges: SamplingRanges,
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            seed: None,
            ranges: SamplingRanges::default(),
        }
    }
}

impl UpdateConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ComponentConfig for EmulatorConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> meterbus_framework::Result<()> {
        if self.server.host.is_empty() {
            return Err(FrameworkError::validation("server.host must not be empty"));
        }

        let registers = &self.registers;
        if registers.count > u16::MAX as usize + 1 {
            return Err(FrameworkError::validation(format!(
                "registers.count must be <= 65536, got {}",
                registers.count
            )));
        }
        if let Some(m) = Measurement::ALL
            .iter()
            .find(|m| m.end_address() as usize > registers.count)
        {
            return Err(FrameworkError::validation(format!(
                "registers.count ({}) is too small for {} at {}",
                registers.count,
                m,
                m.address()
            )));
        }

        if registers.unit_ids.is_empty() {
            return Err(FrameworkError::validation(
                "registers.unit_ids must not be empty",
            ));
        }
        let mut seen = HashSet::new();
        for id in &registers.unit_ids {
            if !(1..=247).contains(id) {
                return Err(FrameworkError::validation(format!(
                    "unit id {} is outside 1..=247",
                    id
                )));
            }
            if !seen.insert(*id) {
                return Err(FrameworkError::validation(format!(
                    "unit id {} is listed twice",
                    id
                )));
            }
        }

        if self.update.interval_ms == 0 {
            return Err(FrameworkError::validation(
                "update.interval_ms must be > 0",
            ));
        }
        self.update
            .ranges
            .validate()
            .map_err(|e| FrameworkError::validation(format!("update.ranges: {}", e)))?;

        Ok(())
    }
}
