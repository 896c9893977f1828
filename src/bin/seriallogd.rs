//! seriallogd - serial line logger and live broadcaster
//!
//! Reads up to three serial devices, timestamps every line, appends it to
//! `<prefix>_<index>.<ext>` and broadcasts it to WebSocket subscribers.
//!
//! # Usage
//!
//! ```bash
//! # Log two devices with the defaults (0.0.0.0:9669, logs in the cwd)
//! seriallogd -p /dev/ttyUSB0 -p /dev/ttyUSB1
//!
//! # Use a config file and write Latin-1 logs
//! seriallogd --config /etc/seriallog.toml --encoding latin-1
//!
//! # Enable debug logging (prints every device line)
//! RUST_LOG=seriallogd=debug seriallogd -p /dev/ttyACM0
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seriallog_core::LogEncoding;
use seriallogd::{Daemon, DaemonConfig};

/// Serial line logger with live WebSocket broadcast
#[derive(Parser, Debug)]
#[command(name = "seriallogd", version, about)]
struct Args {
    /// Serial ports to read; may be repeated (at most three are used)
    #[arg(short = 'p', long = "port", value_name = "PATH")]
    ports: Vec<String>,

    /// TOML configuration file
    #[arg(short = 'c', long, env = "SERIALLOG_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP/WebSocket listen address
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Directory for the per-device logs
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log file encoding: utf-8 or latin-1
    #[arg(long)]
    encoding: Option<LogEncoding>,

    /// Baud rate of every port
    #[arg(long)]
    baud: Option<u32>,
}

impl Args {
    /// Loads the config file (if any) and applies command line overrides.
    fn into_config(self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if !self.ports.is_empty() {
            config.ports = self.ports;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(log_dir) = self.log_dir {
            config.log_dir = log_dir;
        }
        if let Some(encoding) = self.encoding {
            config.log_encoding = encoding;
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config()?;

    if config.ports.is_empty() {
        Args::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "at least one --port (or `ports` in the config file) is required",
            )
            .exit();
    }

    run_daemon(config)
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("seriallogd=info".parse()?)
                .add_directive("seriallog_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        ports = ?config.ports,
        "seriallogd starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    Daemon::new(config)
        .run(cancel_token)
        .await
        .context("Daemon failed")?;

    info!("seriallogd stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
