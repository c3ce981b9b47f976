//! meterbus Framework
//!
//! Runtime plumbing shared by the meterbus binaries.
//!
//! # Overview
//!
//! This framework provides:
//! - [`ComponentConfig`] trait for configuration loading and validation
//! - [`Bus`] for connecting to Zenoh, MQTT or NATS, with [`Publisher`] and
//!   [`Subscription`] handles
//! - [`MessageSink`] trait, the seam the bridge publishes through
//! - [`Shutdown`] / [`ShutdownSignal`] for cooperative cancellation
//! - [`ComponentArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use meterbus_framework::{Bus, ComponentArgs, ComponentConfig, Shutdown};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let (path, explicit) = args.common.config_path("distributor.json5");
//!     let config = MyConfig::load_or_default(&path, explicit)?;
//!
//!     let bus = Bus::connect(&config.bus, "distributor").await?;
//!     let subscription = bus.subscribe("openfmb/**", 256).await?;
//!
//!     let shutdown = Shutdown::new();
//!     tokio::spawn(consume(subscription, shutdown.signal()));
//!
//!     meterbus_framework::wait_for_signal().await;
//!     shutdown.trigger();
//!     bus.close().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod bus;
mod config;
mod error;
mod mqtt;
mod nats;
mod shutdown;

pub use args::ComponentArgs;
pub use bus::{Bus, BusMessage, MessageSink, Publisher, Subscription};
pub use config::ComponentConfig;
pub use error::{FrameworkError, Result};
pub use shutdown::{Shutdown, ShutdownSignal, wait_for_signal};

// Re-export commonly used types from meterbus-common
pub use meterbus_common::{
    BusConfig, LoggingConfig, MqttConfig, NatsConfig, Transport, ZenohConfig,
};
