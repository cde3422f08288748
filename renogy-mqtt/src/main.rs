//! MQTT bridge for Renogy solar charge controllers.

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};

use renogy_mqtt::config::{Args, Config};
use renogy_mqtt::controller::ChargeController;
use renogy_mqtt::poller::Poller;
use renogy_mqtt::publisher::MqttPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(args)?;

    renogy_mqtt::init_tracing(&config.log_level)?;

    info!("Starting renogy-mqtt bridge '{}'", config.name);

    let mut controller = ChargeController::open(&config.device_address, config.slave_address)
        .with_context(|| format!("Failed to open serial device {}", config.device_address))?;
    info!(
        "Opened {} (slave address {})",
        config.device_address, config.slave_address
    );

    let publisher = MqttPublisher::connect(&config.broker, config.port, &config.name)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to MQTT broker at {}:{}",
                config.broker, config.port
            )
        })?;

    // Identity is cosmetic; a controller that answers telemetry but not the
    // identity block still gets polled.
    let info = match controller.read_device_info().await {
        Ok(info) => {
            info!("Controller identified as {} ({})", info.model, info.software_version);
            Some(info)
        }
        Err(e) => {
            warn!("Could not read controller identity: {}", e);
            None
        }
    };
    if let Err(e) = publisher.publish_status(info.as_ref()).await {
        warn!("Failed to publish status message: {}", e);
    }

    let mut poller = Poller::new(controller, publisher, config.publish_frequency);
    info!(
        "Publishing every {}s. Press Ctrl+C to stop.",
        config.publish_frequency.as_secs()
    );

    tokio::select! {
        _ = poller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let (_, publisher) = poller.into_parts();
    publisher.disconnect().await;
    info!("renogy-mqtt bridge stopped");

    Ok(())
}
