//! xppen-tablet-driver
//!
//! Userspace driver for XP-Pen pen tablets. Binds matching tablets over
//! libusb and publishes pen position, pressure and buttons to an input
//! backend.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DriverBridge, DriverEvent, WorkerCommand, create_driver_bridge, setup_logging};
use driver::config::{self, ConfigSource, DriverConfig};
use driver::input::registry_for_backend;
use driver::usb::{list_tablets, spawn_driver_worker};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "xppen-tablet-driver")]
#[command(author, version, about = "Userspace driver for XP-Pen pen tablets")]
#[command(long_about = "
Userspace driver for XP-Pen pen tablets (G540 report layout).

EXAMPLES:
    # Run with default config
    xppen-tablet-driver

    # Run with custom config
    xppen-tablet-driver --config /path/to/driver.toml

    # List connected tablets and exit
    xppen-tablet-driver --list-devices

    # Run with debug logging
    xppen-tablet-driver --log-level debug

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/xppen-tablet/driver.toml
    3. /etc/xppen-tablet/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching tablets and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let (config, source) = if let Some(ref path) = args.config {
        let config = config::load_config(path).context("Failed to load configuration")?;
        (config, ConfigSource::File(PathBuf::from(path)))
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("xppen-tablet-driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    match &source {
        ConfigSource::Fallback { error, .. } => {
            warn!("Failed to load config: {}, using defaults", error);
        }
        source => info!("Configuration: {}", source),
    }

    let worker_config = config.worker_config()?;

    if args.list_devices {
        return list_devices_mode(&worker_config.filters);
    }

    let registry = registry_for_backend(config.input.backend)
        .with_context(|| format!("Input backend '{}' unavailable", config.input.backend))?;
    info!("Input backend: {}", config.input.backend);

    let (bridge, worker) = create_driver_bridge();
    let worker_handle = spawn_driver_worker(worker, registry, worker_config)
        .context("Failed to spawn USB worker thread")?;

    let mut events = tokio::spawn(log_events(bridge.clone()));

    info!("Press Ctrl+C to shutdown");
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        },
        // The event channel closes when the worker thread exits
        _ = &mut events => warn!("USB worker exited unexpectedly"),
    }

    report_sessions(&bridge).await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = bridge.send_command(WorkerCommand::Shutdown).await {
        error!("Error shutting down USB worker: {:#}", e);
    }

    let result = tokio::task::spawn_blocking(move || worker_handle.join())
        .await
        .context("Failed to wait for USB worker thread")?;
    events.abort();

    match result {
        Ok(Ok(())) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e).context("USB worker failed"),
        Err(_) => Err(anyhow!("USB worker thread panicked")),
    }
}

/// Print matching tablets and exit
fn list_devices_mode(filters: &[driver::usb::DeviceFilter]) -> Result<()> {
    let tablets = list_tablets(filters).context("Failed to enumerate USB devices")?;

    if tablets.is_empty() {
        println!("No matching tablets found.");
    } else {
        println!("Found {} tablet(s):\n", tablets.len());
        for tablet in tablets {
            println!(
                "  {:04x}:{:04x} - Bus {:03} Device {:03}",
                tablet.vendor_id, tablet.product_id, tablet.key.bus, tablet.key.address
            );
            println!("      Path: {}", tablet.phys());
            println!();
        }
    }

    Ok(())
}

/// Log worker events until the channel closes
async fn log_events(bridge: DriverBridge) {
    while let Ok(event) = bridge.recv_event().await {
        match event {
            DriverEvent::TabletAttached { bus, address, phys } => {
                info!("Tablet attached: bus {} device {} ({})", bus, address, phys);
            }
            DriverEvent::TabletDetached {
                bus,
                address,
                reason,
            } => {
                info!(
                    "Tablet detached: bus {} device {} ({:?})",
                    bus, address, reason
                );
            }
            DriverEvent::AttachFailed {
                bus,
                address,
                error,
            } => {
                warn!(
                    "Tablet on bus {} device {} could not be attached: {}",
                    bus, address, error
                );
            }
        }
    }
}

/// Log per-session statistics before shutdown
async fn report_sessions(bridge: &DriverBridge) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    if let Err(e) = bridge
        .send_command(WorkerCommand::ListSessions { response: tx })
        .await
    {
        warn!("Failed to query sessions: {:#}", e);
        return;
    }

    match rx.await {
        Ok(sessions) => {
            for session in sessions {
                info!(
                    "Session {:04x}:{:04x} at {}: {} frames, {}",
                    session.vendor_id,
                    session.product_id,
                    session.phys,
                    session.frames_published,
                    session.state
                );
            }
        }
        Err(e) => warn!("No session list from USB worker: {}", e),
    }
}
