//! MQTT bridge for Renogy solar charge controllers.
//!
//! Polls a charge controller over its serial Modbus RTU link and republishes
//! the telemetry to an MQTT broker at a fixed interval.
//!
//! # Topics
//!
//! ```text
//! solar/<name>/data      one JSON snapshot per poll
//! solar/<name>/status    retained online/offline status + controller identity
//! ```

pub mod config;
pub mod controller;
pub mod poller;
pub mod publisher;
pub mod telemetry;

pub use config::{Args, Config, ConfigError};
pub use controller::{ChargeController, DeviceError};
pub use poller::{Poller, SnapshotSink, SnapshotSource, TickOutcome};
pub use publisher::{MqttPublisher, PublishError};
pub use telemetry::{ChargingState, DeviceInfo, TelemetrySnapshot};

/// Initialize tracing with the given default level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str) -> Result<(), ConfigError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
