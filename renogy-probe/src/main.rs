//! Finds the serial device and Modbus slave address of an attached Renogy
//! charge controller.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use renogy_probe::find_modbus_parameters;

/// Discovers the serial device and slave address of a Renogy controller.
#[derive(Parser, Debug)]
#[command(name = "renogy-probe")]
#[command(about = "Finds the USB serial device and Modbus slave address of a Renogy controller")]
#[command(version)]
struct Args {
    /// Probe this serial device instead of auto-detecting the FTDI adapter.
    #[arg(long)]
    device: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!("Searching for USB parameters, this scans the whole address range...");
    let parameters = find_modbus_parameters(args.device).await?;

    info!(
        "Found controller at {} (slave address {})",
        parameters.device, parameters.slave_address
    );
    println!("{}", serde_json::to_string_pretty(&parameters)?);

    Ok(())
}
