//! Ports Daemon - Long-Running Port Host
//!
//! Loads a TOML file of ports, enables them, and keeps them alive until
//! told to stop. Each port reconnects on its own after failures.
//!
//! # Usage
//!
//! ```bash
//! # Default config ($XDG_CONFIG_HOME/ports/ports.toml)
//! portsd
//!
//! # Explicit config file
//! portsd --config /etc/ports/ports.toml
//!
//! # Verbose logging
//! RUST_LOG=debug portsd
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Log a statistics report

mod host;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use host::PortHost;
use ports_core::{default_config_path, load_config_from_path, PortsToml};

/// Ports Daemon - hosts reconnecting TCP and serial ports
#[derive(Parser, Debug)]
#[command(name = "portsd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "PORTS_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PORTS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("portsd={level},ports_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn load(path: Option<&Path>) -> Result<PortsToml> {
    let config = load_config_from_path(path).context("Failed to load port configuration")?;
    if config.ports.is_empty() {
        warn!("No ports configured");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Ports daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config_path = args.config.or_else(default_config_path);
    if let Some(ref path) = config_path {
        info!(config_path = ?path, "Config file");
    }
    let config = load(config_path.as_deref())?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let mut host = PortHost::new();
    if let Err(e) = host.start(&config) {
        error!(error = %e, "Failed to start ports");
        host.shutdown().await;
        return Err(e);
    }

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
                break;
            }
            _ = sighup.recv() => match host.statistics_json() {
                Ok(report) => info!(ports = host.port_count(), "Statistics\n{report}"),
                Err(e) => warn!(error = %e, "Failed to build statistics report"),
            },
        }
    }

    host.shutdown().await;
    info!("Ports daemon stopped cleanly");
    Ok(())
}
