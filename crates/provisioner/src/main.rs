//! adb-provisioner
//!
//! Provisions Android devices as they are plugged in: reinstalls the
//! companion app, forwards its streaming ports and launches it.

use anyhow::{Context, Result};
use clap::Parser;
use common::{EVENT_CHANNEL_CAPACITY, create_event_channel, setup_logging};
use provisioner::{
    AdbClient, AllowList, Dispatcher, DeviceWatcher, Orchestrator, ProvisionerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "adb-provisioner")]
#[command(
    author,
    version,
    about = "ADB provisioner - Set up the companion app on every allow-listed device"
)]
#[command(long_about = "
Watches the local ADB server for devices coming online. For each device whose
product is listed in the allow-list, the companion app is reinstalled (when
the APK is present), its ports are forwarded and the app is launched.

EXAMPLES:
    # Run with default config and ./devices.conf
    adb-provisioner

    # Use another allow-list
    adb-provisioner --devices /path/to/devices.conf

    # List attached devices and exit
    adb-provisioner --list-devices

    # Run with debug logging
    adb-provisioner --log-level debug

CONFIGURATION:
    The provisioner looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/adb-provisioner/provisioner.toml
    3. /etc/adb-provisioner/provisioner.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Allow-list file (overrides the configured one)
    #[arg(short, long, value_name = "PATH")]
    devices: Option<PathBuf>,

    /// ADB server address (overrides the configured one)
    #[arg(long, value_name = "HOST:PORT")]
    adb_server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List devices known to the ADB server and exit
    #[arg(long)]
    list_devices: bool,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ProvisionerConfig::default();
        let path = ProvisionerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ProvisionerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ProvisionerConfig::load_or_default()
    };

    config
        .apply_overrides(args.devices, args.adb_server, args.log_level)
        .context("Invalid command line option")?;

    let log_level = config.daemon.log_level.as_str();
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("adb-provisioner v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let client = AdbClient::new(config.adb.server_addr.clone());
    match client.server_version().await {
        Ok(version) => info!("ADB server {} (version {})", client.server_addr(), version),
        Err(e) => warn!("ADB server not reachable yet: {}", e),
    }

    if args.list_devices {
        return list_devices_mode(&client).await;
    }

    let allow_list = AllowList::load(&config.devices_file()).with_context(|| {
        format!(
            "Failed to read allow-list: {}",
            config.devices_file().display()
        )
    })?;

    run(config, client, allow_list).await
}

/// Print the devices known to the ADB server and exit
async fn list_devices_mode(client: &AdbClient) -> Result<()> {
    let devices = client
        .devices()
        .await
        .context("Failed to query device list")?;

    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for device in devices {
        println!("  {:<22} {}", device.serial, device.state);
        if !device.product.is_empty() {
            println!(
                "      product: {}  model: {}  device: {}",
                device.product, device.model, device.device
            );
        }
        if let Some(id) = device.transport_id {
            println!("      transport: {}", id);
        }
        println!();
    }

    Ok(())
}

/// Watch and provision until Ctrl+C
async fn run(config: ProvisionerConfig, client: AdbClient, allow_list: AllowList) -> Result<()> {
    let settings = config.provision_settings();
    info!(
        "Provisioning {} for {} product(s), artifact {}",
        settings.package,
        allow_list.len(),
        settings.apk_path.display()
    );

    let orchestrator = Orchestrator::new(
        Arc::new(client.clone()),
        Arc::new(allow_list),
        Arc::new(settings),
    );

    let (publisher, subscriber) = create_event_channel(EVENT_CHANNEL_CAPACITY);

    let watcher = DeviceWatcher::new(
        client,
        publisher,
        Duration::from_millis(config.timing.watcher_max_backoff_ms),
    );
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run().await {
            error!("Device watcher error: {:#}", e);
        }
    });

    let dispatcher_events = subscriber.clone();
    let dispatcher_handle =
        tokio::spawn(async move { Dispatcher::new(orchestrator).run(dispatcher_events).await });

    info!("Press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    subscriber.close();
    watcher_handle.abort();
    dispatcher_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
