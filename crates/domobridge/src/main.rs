use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use domobridge::Bridge;
use domobridge::Category;
use domobridge::Command;
use domobridge::Config;
use domobridge::DeviceId;
use domobridge::DeviceRecord;
use domobridge::RegistryError;
use domobridge::config::LoggingConfig;
use domobridge::mqtt;
use domobridge::mqtt::MqttBridge;
use domobridge::mqtt::NetworkEvent;
use domobridge::mqtt::RumqttcBus;
use domobridge::mqtt::TokioTimer;
use tokio::sync::mpsc;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

/// Capacity for queued outbound commands
const COMMAND_CHANNEL_SIZE: usize = 32;

/// Relay Domoticz device updates over MQTT
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(default_value = "domobridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    init_logging(&config.logging);

    info!("domobridge starting");
    info!("Loaded config from: {}", args.config.display());
    info!(
        "Broker: {}:{} (client id: {})",
        config.mqtt.broker, config.mqtt.port, config.mqtt.client_id
    );

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let mut bridge = Bridge::new(
        config.bridge_config(),
        RumqttcBus::new(&config.mqtt),
        TokioTimer::new(),
    );
    register_listeners(&mut bridge, &config.bridge.watch, command_tx)
        .context("Failed to register listeners")?;

    // The host network is up by the time we run; there is no link monitor
    let (network_tx, network_rx) = mpsc::channel(1);
    network_tx
        .send(NetworkEvent::Available)
        .await
        .context("Failed to signal network availability")?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    };

    info!("Press Ctrl+C to exit");
    mqtt::run(&mut bridge, network_rx, command_rx, shutdown).await;

    info!("domobridge shutdown complete");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Log connection changes and watched devices, and refresh watched devices
/// every time the session comes up.
fn register_listeners(
    bridge: &mut MqttBridge,
    watch: &[DeviceId],
    commands: mpsc::Sender<Command>,
) -> Result<(), RegistryError> {
    let refresh: Vec<Command> = watch.iter().copied().map(Command::request_data).collect();
    bridge.add_connected_listener(move |_: Category, _: &DeviceRecord| {
        info!("Connected to Domoticz");
        for request in &refresh {
            if let Err(e) = commands.try_send(request.clone()) {
                warn!("Failed to queue refresh for device {}: {}", request.idx(), e);
            }
        }
    })?;

    bridge.add_disconnected_listener(|_: Category, _: &DeviceRecord| {
        warn!("Disconnected from Domoticz");
    })?;

    for &idx in watch {
        bridge.add_device_listener(idx, |_: Category, record: &DeviceRecord| {
            info!(
                "Device {}: nvalue={} svalue=[{}, {}, {}, {}] battery={} rssi={}",
                record.idx,
                record.nvalue,
                record.svalue1,
                record.svalue2,
                record.svalue3,
                record.svalue4,
                record.battery,
                record.rssi
            );
        })?;
    }

    Ok(())
}
