//! MQTT session management and telemetry publishing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::poller::SnapshotSink;
use crate::telemetry::{DeviceInfo, TelemetrySnapshot};

/// How long to wait for the broker's ConnAck before giving up at startup.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Error type for MQTT publishing.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Not connected to MQTT broker")]
    NotConnected,
    #[error("Broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Retained status message, birth and last-will alike.
#[derive(Serialize)]
struct StatusPayload<'a> {
    status: &'a str,
    client: &'a str,
    #[serde(flatten)]
    info: Option<&'a DeviceInfo>,
}

/// MQTT client publishing controller telemetry.
///
/// Owns the broker session for the process lifetime. Topics hang off
/// `solar/<name>`: snapshots go to `solar/<name>/data`, the retained
/// online/offline status to `solar/<name>/status`.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
    base_topic: String,
    name: String,
}

impl MqttPublisher {
    /// Connect to the broker and wait for its ConnAck.
    ///
    /// The session carries a retained last-will so subscribers see
    /// `"offline"` when the process dies without a clean disconnect. An
    /// unreachable or refusing broker is an error here, before any polling
    /// starts.
    pub async fn connect(broker: &str, port: u16, name: &str) -> Result<Self, PublishError> {
        let base_topic = format!("solar/{}", name);
        let status_topic = format!("{}/status", base_topic);

        let mut options = MqttOptions::new(name, broker, port);
        options.set_keep_alive(KEEP_ALIVE);

        let will = json!({ "status": "offline", "client": name }).to_string();
        options.set_last_will(LastWill::new(
            status_topic.as_str(),
            will,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        match tokio::time::timeout(CONNECT_TIMEOUT, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PublishError::ConnectTimeout(CONNECT_TIMEOUT)),
        }
        info!("Connected to MQTT broker at {}:{}", broker, port);

        let connected = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive(eventloop, Arc::clone(&connected)));

        Ok(Self {
            client,
            connected,
            driver: Some(driver),
            base_topic,
            name: name.to_string(),
        })
    }

    /// Whether the session currently holds an acknowledged connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish the retained status message, with the controller identity
    /// when it could be read.
    pub async fn publish_status(&self, info: Option<&DeviceInfo>) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&StatusPayload {
            status: "online",
            client: &self.name,
            info,
        })?;

        let topic = format!("{}/status", self.base_topic);
        self.publish_raw(&topic, payload, true).await
    }

    /// Publish one telemetry snapshot on the data topic.
    pub async fn publish_snapshot(&self, snapshot: &TelemetrySnapshot) -> Result<(), PublishError> {
        let payload = serde_json::to_string(snapshot)?;
        let topic = format!("{}/data", self.base_topic);
        self.publish_raw(&topic, payload, false).await
    }

    async fn publish_raw(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        debug!("Published to {}", topic);
        Ok(())
    }

    /// Publish the retained offline status and tear the session down.
    pub async fn disconnect(mut self) {
        let topic = format!("{}/status", self.base_topic);
        let offline = json!({ "status": "offline", "client": self.name }).to_string();
        if let Err(e) = self.publish_raw(&topic, offline, true).await {
            warn!("Failed to publish offline status: {}", e);
        }

        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }

        // Give the driver a moment to flush the outgoing queue; it exits on
        // its own once the disconnect packet goes out.
        if let Some(mut driver) = self.driver.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut driver)
                .await
                .is_err()
            {
                driver.abort();
            }
        }
    }
}

impl SnapshotSink for MqttPublisher {
    async fn publish(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), PublishError> {
        self.publish_snapshot(snapshot).await
    }
}

/// Poll the event loop until the broker acknowledges the session.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), PublishError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(PublishError::Connection(format!(
                        "broker refused connection: {:?}",
                        code
                    ))),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(PublishError::Connection(e.to_string())),
        }
    }
}

/// Drive the rumqttc event loop, tracking connection state.
///
/// rumqttc reconnects on its own as long as the loop keeps polling; the
/// shared flag gates publishes while the session is down. Exits when the
/// client requests a disconnect.
async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                debug!("MQTT session established");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                debug!("MQTT disconnect requested, stopping session driver");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                warn!("MQTT connection lost: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_payload_without_info() {
        let payload = serde_json::to_value(StatusPayload {
            status: "online",
            client: "solar",
            info: None,
        })
        .unwrap();

        assert_eq!(payload["status"], "online");
        assert_eq!(payload["client"], "solar");
        assert!(payload.get("model").is_none());
    }

    #[test]
    fn test_status_payload_flattens_info() {
        let info = DeviceInfo {
            model: "RNG-CTRL-WND30".to_string(),
            software_version: "V1.2.3".to_string(),
            hardware_version: "V1.0.0".to_string(),
            serial_number: 42,
            voltage_rating: 12,
            current_rating: 30,
            discharge_rating: 20,
            controller_type: "controller".to_string(),
        };

        let payload = serde_json::to_value(StatusPayload {
            status: "online",
            client: "solar",
            info: Some(&info),
        })
        .unwrap();

        assert_eq!(payload["model"], "RNG-CTRL-WND30");
        assert_eq!(payload["type"], "controller");
        assert_eq!(payload["status"], "online");
    }

    /// A broker that refuses the TCP connection outright surfaces as an
    /// error from connect, before any polling could start.
    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        let result = MqttPublisher::connect("127.0.0.1", 1, "test-client").await;
        assert!(result.is_err());
    }
}
