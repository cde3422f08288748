//! The poll-publish loop.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::controller::DeviceError;
use crate::publisher::PublishError;
use crate::telemetry::TelemetrySnapshot;

/// Source of telemetry snapshots. The charge controller in production,
/// a scripted fake in tests.
pub trait SnapshotSource {
    /// Read one snapshot from the device.
    fn read_snapshot(
        &mut self,
    ) -> impl Future<Output = Result<TelemetrySnapshot, DeviceError>> + Send;
}

/// Destination for telemetry snapshots. The MQTT publisher in production,
/// a recording fake in tests.
pub trait SnapshotSink {
    /// Deliver one snapshot.
    fn publish(
        &mut self,
        snapshot: &TelemetrySnapshot,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Snapshot read and delivered.
    Published,
    /// The device read failed; nothing was published this tick.
    ReadFailed,
    /// The read succeeded but delivery failed; the snapshot is discarded.
    PublishFailed,
}

/// Drives periodic telemetry collection and delivery.
///
/// Owns both collaborators. One snapshot is produced per tick and either
/// fully published or discarded; failures of either side are logged and the
/// loop moves on to the next tick.
pub struct Poller<R, P> {
    reader: R,
    publisher: P,
    frequency: Duration,
}

impl<R: SnapshotSource, P: SnapshotSink> Poller<R, P> {
    /// Create a poller that fires every `frequency`.
    pub fn new(reader: R, publisher: P, frequency: Duration) -> Self {
        Self {
            reader,
            publisher,
            frequency,
        }
    }

    /// Run the loop until the surrounding task is cancelled.
    ///
    /// The sleep starts after the tick completes, so the observed period is
    /// the configured frequency plus the read/publish latency. Acceptable
    /// for multi-second polling intervals.
    pub async fn run(&mut self) {
        loop {
            self.tick().await;
            tokio::time::sleep(self.frequency).await;
        }
    }

    /// Perform a single poll cycle: one read attempt, then at most one
    /// publish attempt.
    pub async fn tick(&mut self) -> TickOutcome {
        let snapshot = match self.reader.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Device read failed, skipping tick: {}", e);
                return TickOutcome::ReadFailed;
            }
        };

        match self.publisher.publish(&snapshot).await {
            Ok(()) => {
                debug!("Published snapshot taken at {}", snapshot.timestamp);
                TickOutcome::Published
            }
            Err(e) => {
                warn!("Publish failed, discarding snapshot: {}", e);
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tear the poller apart to recover the collaborators, e.g. for a clean
    /// publisher disconnect on shutdown.
    pub fn into_parts(self) -> (R, P) {
        (self.reader, self.publisher)
    }
}
