//! MQTT bridge for Heliotherm heat pumps.
//!
//! Polls the heat-pump controller over its serial connection once per minute
//! and publishes normalized register values to an MQTT broker, with Home
//! Assistant auto-discovery metadata republished on every (re)connect.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use mqtt_bridge_heliotherm::bridge::Bridge;
use mqtt_bridge_heliotherm::config::BridgeConfig;
use mqtt_bridge_heliotherm::device::DeviceIdentity;
use mqtt_bridge_heliotherm::logging;
use mqtt_bridge_heliotherm::serial::SerialConnector;

/// MQTT bridge for Heliotherm heat pumps.
#[derive(Parser, Debug)]
#[command(name = "mqtt-bridge-heliotherm")]
#[command(about = "Polls a Heliotherm heat pump and publishes to MQTT")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "heliotherm.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init_tracing(&config.logging)?;

    info!("Starting mqtt-bridge-heliotherm");
    info!("Loaded configuration from {:?}", args.config);

    let connector = Arc::new(SerialConnector::from_config(&config.heatpump));

    // Captured once; a device that is unreachable right now degrades to an
    // identity with model "Unknown" rather than aborting startup.
    let identity = DeviceIdentity::read(connector.as_ref()).await;
    info!(
        model = %identity.model,
        serial = ?identity.serial_number,
        version = ?identity.sw_version,
        "device identity established"
    );

    let bridge = Bridge::new(&config, identity, connector);
    bridge.run().await;

    info!("mqtt-bridge-heliotherm stopped");
    Ok(())
}
