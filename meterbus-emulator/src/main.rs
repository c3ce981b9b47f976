//! Modbus TCP meter emulator.
//!
//! Serves synthetic meter readings as holding registers until Ctrl+C or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use meterbus_emulator::config::EmulatorConfig;
use meterbus_emulator::{DeviceEmulator, RandomMeter, RegisterStore};
use meterbus_framework::{ComponentArgs, ComponentConfig, Shutdown, wait_for_signal};

/// Modbus TCP meter emulator.
#[derive(Parser, Debug)]
#[command(name = "meterbus-emulator")]
#[command(about = "Emulates a Modbus TCP power meter with synthetic readings")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: ComponentArgs,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Seed the measurement generator.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (path, explicit) = args.common.config_path("emulator.json5");
    let mut config = EmulatorConfig::load_or_default(&path, explicit)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.seed.is_some() {
        config.update.seed = args.seed;
    }

    config.init_logging(args.common.log_level.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting meterbus-emulator");

    let store = RegisterStore::new(&config.registers.unit_ids, config.registers.count);
    let source = RandomMeter::new(config.update.ranges, config.update.seed);
    let mut emulator = DeviceEmulator::new(store, source, config.update.interval());
    emulator.bind(&config.server.bind_addr()).await?;

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    let report = emulator.run(signal).await?;
    info!(
        cycles = report.update.cycles,
        failed_writes = report.update.failed_writes,
        "meterbus-emulator stopped"
    );

    Ok(())
}
