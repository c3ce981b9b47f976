//! Modbus to pub/sub bridge.
//!
//! Connects to the Modbus device first; if that fails the process exits with
//! an error without polling. Later connection losses are retried every poll
//! interval until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use meterbus_bridge::{Bridge, BridgeConfig, ModbusSource, PollSettings};
use meterbus_framework::{Bus, ComponentArgs, ComponentConfig, Shutdown, wait_for_signal};

/// Modbus to pub/sub bridge.
#[derive(Parser, Debug)]
#[command(name = "meterbus-bridge")]
#[command(about = "Polls a Modbus meter and republishes its registers on Zenoh, MQTT or NATS")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: ComponentArgs,

    /// Override the Modbus device port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the Modbus unit id.
    #[arg(long)]
    unit_id: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (path, explicit) = args.common.config_path("bridge.json5");
    let mut config = BridgeConfig::load_or_default(&path, explicit)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    if let Some(port) = args.port {
        config.modbus.port = port;
    }
    if let Some(unit_id) = args.unit_id {
        config.modbus.unit_id = unit_id;
    }
    config.validate()?;

    config.init_logging(args.common.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting meterbus-bridge");

    let source = ModbusSource::connect(&config.modbus).await?;

    let bus = Bus::connect(&config.bus, "bridge")
        .await
        .with_context(|| format!("Failed to connect to {}", config.bus.transport()))?;

    let mut bridge = Bridge::new(source, bus.publisher(), PollSettings::from_config(&config));

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    let report = bridge.run(signal).await;

    if let Err(e) = bus.close().await {
        warn!(error = %e, "Failed to close bus connection");
    }

    info!(
        cycles = report.cycles,
        published = report.published,
        skipped = report.skipped,
        publish_failures = report.publish_failures,
        disconnects = report.disconnects,
        reconnects = report.reconnects,
        "meterbus-bridge stopped"
    );

    Ok(())
}
