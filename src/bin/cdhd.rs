//! Payload C&DH daemon.
//!
//! Reads telecommands from an uplink byte stream and writes telemetry packets
//! to a downlink byte stream (regular files or FIFOs). Instruments are the
//! simulated ones from `cdh::sim`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cdh::{Collaborators, FlightSoftware, FswConfig};

#[derive(Debug, Parser)]
#[command(name = "cdhd", version, about = "Payload command and data handling daemon")]
struct Args {
    /// YAML configuration file. Flight defaults are used when omitted.
    #[arg(short, long, env = "CDH_CONFIG")]
    config: Option<PathBuf>,

    /// Uplink byte stream carrying 20-byte telecommands.
    #[arg(long, env = "CDH_UPLINK")]
    uplink: PathBuf,

    /// Downlink byte stream receiving 1080-byte telemetry packets.
    #[arg(long, env = "CDH_DOWNLINK")]
    downlink: PathBuf,

    /// Override the archive root from the configuration.
    #[arg(long)]
    archive_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FswConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => FswConfig::default(),
    };
    if let Some(root) = args.archive_root {
        config.archive_root = root;
    }

    let uplink = tokio::fs::File::open(&args.uplink)
        .await
        .with_context(|| format!("opening uplink {}", args.uplink.display()))?;
    let downlink = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.downlink)
        .await
        .with_context(|| format!("opening downlink {}", args.downlink.display()))?;

    let fsw = FlightSoftware::spawn(config, Collaborators::simulated(uplink, downlink))?;
    fsw.ready().await?;
    info!("cdhd running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    fsw.shutdown().await;
    Ok(())
}
