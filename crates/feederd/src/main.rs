//! feederd — the feeder daemon.
//!
//! One binary for both ends of the pipeline:
//! - `device`: drives the feeder hardware, buffers undelivered feed logs
//! - `backend`: keeps the feeder registry and feed history
//!
//! # Usage
//!
//! ```text
//! feederd device  --config /etc/feeder/device.toml
//! feederd backend --config /etc/feeder/backend.toml
//! feederd registry --config /etc/feeder/backend.toml --client-id rpi-01
//! ```

mod backend_mode;
mod device_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,feederd=debug,feeder=debug";

#[derive(Parser)]
#[command(name = "feederd", about = "Pet feeder daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run on a feeder: execute feed commands and report feed logs.
    Device {
        /// Device configuration file.
        #[arg(long, default_value = "/etc/feeder/device.toml")]
        config: PathBuf,
    },

    /// Run the backend: track presence and store feed history.
    Backend {
        /// Backend configuration file.
        #[arg(long, default_value = "/etc/feeder/backend.toml")]
        config: PathBuf,
    },

    /// Print registry contents as JSON. The backend must not be running.
    Registry {
        /// Backend configuration file.
        #[arg(long, default_value = "/etc/feeder/backend.toml")]
        config: PathBuf,

        /// Print one feeder and its feed history instead of all feeders.
        #[arg(long)]
        client_id: Option<String>,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

/// Shutdown channel that flips to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Device { config } => device_mode::run_device(config).await,
        Command::Backend { config } => backend_mode::run_backend(config).await,
        Command::Registry { config, client_id } => {
            backend_mode::print_registry(config, client_id.as_deref())
        }
    }
}
