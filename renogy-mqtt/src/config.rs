//! CLI arguments and runtime configuration.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Configuration errors. All of them are fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// MQTT bridge for Renogy solar charge controllers.
#[derive(Parser, Debug, Clone)]
#[command(name = "renogy-mqtt")]
#[command(about = "Polls a Renogy charge controller over Modbus RTU and publishes to MQTT")]
#[command(version)]
pub struct Args {
    /// MQTT broker host or IP.
    #[arg(long)]
    pub broker: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// MQTT client identifier, also used in the topic path.
    #[arg(long)]
    pub name: String,

    /// Modbus slave address of the charge controller (1-247).
    #[arg(long, default_value_t = 1)]
    pub slave_address: u8,

    /// Serial device the controller is attached to (e.g. /dev/ttyUSB0).
    #[arg(long)]
    pub device_address: String,

    /// Seconds between polls.
    #[arg(long, default_value_t = 60)]
    pub publish_frequency: u64,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Validated runtime configuration, built once at startup and read-only for
/// the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: String,
    pub port: u16,
    pub name: String,
    pub slave_address: u8,
    pub device_address: String,
    pub publish_frequency: Duration,
    pub log_level: String,
}

impl Config {
    /// Build a validated configuration from parsed CLI arguments.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let config = Self {
            broker: args.broker,
            port: args.port,
            name: args.name,
            slave_address: args.slave_address,
            device_address: args.device_address,
            publish_frequency: Duration::from_secs(args.publish_frequency),
            log_level: args.log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker must not be empty".to_string(),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "client name must not be empty".to_string(),
            ));
        }

        // The name becomes a topic segment.
        if self.name.contains(['/', '+', '#']) {
            return Err(ConfigError::Validation(format!(
                "client name '{}' must not contain '/', '+' or '#'",
                self.name
            )));
        }

        if self.slave_address == 0 || self.slave_address > 247 {
            return Err(ConfigError::Validation(format!(
                "slave address {} is out of range (1-247)",
                self.slave_address
            )));
        }

        if self.device_address.trim().is_empty() {
            return Err(ConfigError::Validation(
                "device address must not be empty".to_string(),
            ));
        }

        if self.publish_frequency.is_zero() {
            return Err(ConfigError::Validation(
                "publish frequency must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
