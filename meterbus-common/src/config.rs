//! Bus transport and logging configuration shared by every component.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Pub/sub transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Zenoh,
    Mqtt,
    Nats,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Zenoh => "zenoh",
            Transport::Mqtt => "mqtt",
            Transport::Nats => "nats",
        }
    }

    /// Segment separator of topics on this transport.
    pub fn separator(&self) -> char {
        match self {
            Transport::Zenoh | Transport::Mqtt => '/',
            Transport::Nats => '.',
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message bus connection settings, tagged by `transport`.
///
/// ```json5
/// bus: { transport: "zenoh", mode: "client", connect: ["tcp/localhost:7447"] }
/// bus: { transport: "mqtt", host: "localhost", port: 1883 }
/// bus: { transport: "nats", url: "nats://localhost:4222" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum BusConfig {
    Zenoh(ZenohConfig),
    Mqtt(MqttConfig),
    Nats(NatsConfig),
}

impl BusConfig {
    /// The transport this configuration selects.
    pub fn transport(&self) -> Transport {
        match self {
            BusConfig::Zenoh(_) => Transport::Zenoh,
            BusConfig::Mqtt(_) => Transport::Mqtt,
            BusConfig::Nats(_) => Transport::Nats,
        }
    }

    /// Validate transport-specific settings.
    pub fn validate(&self) -> Result<()> {
        match self {
            BusConfig::Zenoh(zenoh) => match zenoh.mode.as_str() {
                "client" | "peer" | "router" => Ok(()),
                other => Err(Error::Config(format!(
                    "Invalid Zenoh mode: '{}'. Expected 'client', 'peer', or 'router'",
                    other
                ))),
            },
            BusConfig::Mqtt(mqtt) => {
                if mqtt.host.is_empty() {
                    return Err(Error::Config("MQTT host cannot be empty".to_string()));
                }
                if mqtt.port == 0 {
                    return Err(Error::Config("MQTT port cannot be 0".to_string()));
                }
                if mqtt.keep_alive_secs < 5 {
                    // rumqttc rejects keep-alive intervals below 5 seconds
                    return Err(Error::Config(
                        "MQTT keep_alive_secs must be at least 5".to_string(),
                    ));
                }
                Ok(())
            }
            BusConfig::Nats(nats) => {
                if nats.url.trim().is_empty() {
                    return Err(Error::Config("NATS url cannot be empty".to_string()));
                }
                Ok(())
            }
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig::Zenoh(ZenohConfig::default())
    }
}

/// Zenoh connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// Zenoh mode: "client", "peer", or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Endpoints to connect to (for client mode).
    #[serde(default)]
    pub connect: Vec<String>,

    /// Endpoints to listen on (for peer/router mode).
    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MqttQos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// MQTT broker connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Client id; generated from the component name when absent.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Delay before the event loop retries after a connection error.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// QoS for publishes and subscriptions.
    #[serde(default)]
    pub qos: MqttQos,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_delay() -> u64 {
    1000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_ms: default_reconnect_delay(),
            qos: MqttQos::default(),
        }
    }
}

impl MqttConfig {
    /// Get the keep-alive interval as Duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Get the reconnect delay as Duration.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// NATS server connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Server URL, or a comma-separated list of URLs.
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Connection name shown by the server; generated from the component
    /// name when absent.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            name: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        bus: BusConfig,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_config() {
        let config: Sample = json5::from_str("{}").unwrap();

        assert_eq!(config.bus, BusConfig::Zenoh(ZenohConfig::default()));
        assert_eq!(config.bus.transport(), Transport::Zenoh);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_zenoh_bus() {
        let input = r#"
        {
            bus: {
                transport: "zenoh",
                mode: "client",
                connect: ["tcp/localhost:7447"],
            },
        }
        "#;

        let config: Sample = json5::from_str(input).unwrap();
        match &config.bus {
            BusConfig::Zenoh(zenoh) => {
                assert_eq!(zenoh.mode, "client");
                assert_eq!(zenoh.connect, vec!["tcp/localhost:7447"]);
            }
            other => panic!("Expected Zenoh bus, got {:?}", other),
        }
        assert!(config.bus.validate().is_ok());
    }

    #[test]
    fn test_parse_mqtt_bus_defaults() {
        let config: Sample = json5::from_str(r#"{ bus: { transport: "mqtt" } }"#).unwrap();
        match &config.bus {
            BusConfig::Mqtt(mqtt) => {
                assert_eq!(mqtt.host, "localhost");
                assert_eq!(mqtt.port, 1883);
                assert_eq!(mqtt.qos, MqttQos::AtMostOnce);
                assert_eq!(mqtt.keep_alive(), Duration::from_secs(60));
            }
            other => panic!("Expected MQTT bus, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_mqtt_bus() {
        let input = r#"
        {
            bus: {
                transport: "mqtt",
                host: "broker.local",
                port: 8883,
                client_id: "meter-bridge",
                qos: "at_least_once",
            },
            logging: { level: "debug", format: "json" },
        }
        "#;

        let config: Sample = json5::from_str(input).unwrap();
        assert_eq!(config.bus.transport(), Transport::Mqtt);
        if let BusConfig::Mqtt(mqtt) = &config.bus {
            assert_eq!(mqtt.host, "broker.local");
            assert_eq!(mqtt.port, 8883);
            assert_eq!(mqtt.client_id.as_deref(), Some("meter-bridge"));
            assert_eq!(mqtt.qos, MqttQos::AtLeastOnce);
        }
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_bus() {
        let bad_mode = BusConfig::Zenoh(ZenohConfig {
            mode: "satellite".to_string(),
            ..ZenohConfig::default()
        });
        assert!(bad_mode.validate().is_err());

        let bad_keep_alive = BusConfig::Mqtt(MqttConfig {
            keep_alive_secs: 1,
            ..MqttConfig::default()
        });
        assert!(bad_keep_alive.validate().is_err());

        assert!(BusConfig::Mqtt(MqttConfig::default()).validate().is_ok());
    }

    #[test]
    fn test_parse_nats_bus() {
        let config: Sample = json5::from_str(r#"{ bus: { transport: "nats" } }"#).unwrap();
        assert_eq!(config.bus.transport(), Transport::Nats);
        assert_eq!(config.bus, BusConfig::Nats(NatsConfig::default()));
        assert!(config.bus.validate().is_ok());

        let config: Sample = json5::from_str(
            r#"{ bus: { transport: "nats", url: "nats://10.0.0.2:4222", name: "meter-a" } }"#,
        )
        .unwrap();
        if let BusConfig::Nats(nats) = &config.bus {
            assert_eq!(nats.url, "nats://10.0.0.2:4222");
            assert_eq!(nats.name.as_deref(), Some("meter-a"));
        }

        let empty = BusConfig::Nats(NatsConfig {
            url: " ".to_string(),
            name: None,
        });
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: std::result::Result<Sample, _> =
            json5::from_str(r#"{ bus: { transport: "kafka" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_transport_separator() {
        assert_eq!(Transport::Zenoh.separator(), '/');
        assert_eq!(Transport::Mqtt.separator(), '/');
        assert_eq!(Transport::Nats.separator(), '.');
    }
}
