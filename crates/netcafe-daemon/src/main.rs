//! Netcafe Daemon - Main entry point
//!
//! Tracks which venue computers are online, derives room occupancy and
//! serves both over HTTP and WebSocket.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "netcafe")]
#[command(about = "Venue computer presence and room occupancy daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netcafe.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single presence cycle, print device states and exit
    #[arg(long)]
    scan_once: bool,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Netcafe v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        rooms = config.rooms.len(),
        devices = config.to_device_configs().len(),
        interval_secs = config.daemon.poll_interval_secs,
        "Configuration loaded"
    );

    // Setup may wait for a neighbor table; let Ctrl-C abort it
    let state = tokio::select! {
        state = state::AppState::new(config.clone(), args.config.clone()) => state?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during setup");
            return Ok(());
        }
    };

    if args.scan_once {
        // Single cycle mode
        info!("Running single presence cycle");
        state.scanner.force_cycle().await?;
        let devices = state.devices().await;
        let online = devices.iter().filter(|d| d.online).count();
        println!("{}/{} devices online:", online, devices.len());
        for device in devices {
            println!(
                "  - {} [{}]",
                device.label,
                if device.online { "online" } else { "offline" }
            );
        }
        for room in state.rooms().await {
            println!(
                "  Room {}: {} ({}/{})",
                room.name,
                if room.occupied { "occupied" } else { "vacant" },
                room.online,
                room.total
            );
        }
    } else {
        // Daemon mode - run web server and presence polling
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
