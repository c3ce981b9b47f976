//! Pub/sub distributor for meter readings.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use meterbus_distributor::{Distributor, DistributorConfig};
use meterbus_framework::{Bus, ComponentArgs, ComponentConfig, Shutdown, wait_for_signal};

/// Pub/sub distributor for meter readings.
#[derive(Parser, Debug)]
#[command(name = "meterbus-distributor")]
#[command(about = "Subscribes to meter readings on Zenoh, MQTT or NATS and logs them in sequence")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: ComponentArgs,

    /// Subscribe to this pattern instead of the configured topic root.
    #[arg(long)]
    pattern: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (path, explicit) = args.common.config_path("distributor.json5");
    let mut config = DistributorConfig::load_or_default(&path, explicit)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    if args.pattern.is_some() {
        config.subscribe.pattern = args.pattern;
        config.validate()?;
    }

    config.init_logging(args.common.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting meterbus-distributor");

    let bus = Bus::connect(&config.bus, "distributor")
        .await
        .with_context(|| format!("Failed to connect to {}", config.bus.transport()))?;
    let subscription = bus
        .subscribe(&config.pattern(), config.subscribe.channel_capacity)
        .await?;

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    let mut distributor = Distributor::new(config.initial_sequence);
    let handled = distributor.run(subscription, signal).await;

    if let Err(e) = bus.close().await {
        warn!(error = %e, "Failed to close bus connection");
    }
    info!(handled, "meterbus-distributor stopped");

    Ok(())
}
