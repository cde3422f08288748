//! Modbus RTU access to Renogy charge controllers.

use std::time::Duration;

use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::poller::SnapshotSource;
use crate::telemetry::{ChargingState, DeviceInfo, TelemetrySnapshot, now_iso8601};

/// Renogy controllers speak 9600 8N1 regardless of model.
pub const BAUD_RATE: u32 = 9600;

/// Start of the dynamic telemetry block (state of charge).
const DYNAMIC_BASE: u16 = 0x0100;
/// Length of the dynamic block, through the charging state register
/// (0x0120), so one read transaction covers a whole snapshot.
const DYNAMIC_LEN: u16 = 0x21;

/// Start of the identity block (ratings, model, versions, serial number).
const IDENTITY_BASE: u16 = 0x000A;
const IDENTITY_LEN: u16 = 0x10;

// Offsets into the dynamic block, relative to 0x0100.
const SOC: usize = 0x00;
const BATTERY_VOLTAGE: usize = 0x01;
const TEMPERATURES: usize = 0x03;
const LOAD_VOLTAGE: usize = 0x04;
const LOAD_CURRENT: usize = 0x05;
const LOAD_POWER: usize = 0x06;
const SOLAR_VOLTAGE: usize = 0x07;
const SOLAR_CURRENT: usize = 0x08;
const SOLAR_POWER: usize = 0x09;
const MIN_BATTERY_VOLTAGE_TODAY: usize = 0x0B;
const MAX_BATTERY_VOLTAGE_TODAY: usize = 0x0C;
const MAX_SOLAR_POWER_TODAY: usize = 0x0F;
const MIN_SOLAR_POWER_TODAY: usize = 0x10;
/// Charging state in the low byte; the high byte is the load status.
const CHARGING_STATE: usize = 0x20;

/// Error type for charge controller transactions.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Serial open failed: {0}")]
    Open(String),
    #[error("Modbus transaction failed: {0}")]
    Transaction(String),
    #[error("Modbus exception: {0}")]
    Exception(String),
    #[error("Short response: expected {expected} registers, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// A Renogy charge controller on a serial Modbus RTU link.
///
/// Owns the serial handle for the process lifetime. If the device disappears
/// mid-run (USB unplugged) every subsequent read fails; the port is not
/// reopened, a process restart recovers.
pub struct ChargeController {
    ctx: Context,
    device: String,
    request_timeout: Duration,
}

impl ChargeController {
    /// Open the serial device and attach a Modbus context at the slave address.
    pub fn open(device: &str, slave_address: u8) -> Result<Self, DeviceError> {
        let builder = tokio_serial::new(device, BAUD_RATE);
        let serial = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| DeviceError::Open(e.to_string()))?;

        let ctx = rtu::attach_slave(serial, Slave(slave_address));

        Ok(Self {
            ctx,
            device: device.to_string(),
            request_timeout: Duration::from_secs(2),
        })
    }

    /// Read a block of holding registers with the request timeout applied.
    async fn read_block(&mut self, start: u16, count: u16) -> Result<Vec<u16>, DeviceError> {
        let words = tokio::time::timeout(
            self.request_timeout,
            self.ctx.read_holding_registers(start, count),
        )
        .await
        .map_err(|_| DeviceError::Timeout(self.request_timeout))?
        .map_err(|e| DeviceError::Transaction(e.to_string()))?
        .map_err(|e| DeviceError::Exception(format!("{:?}", e)))?;

        if words.len() != count as usize {
            return Err(DeviceError::ShortResponse {
                expected: count as usize,
                actual: words.len(),
            });
        }

        Ok(words)
    }

    /// Read one telemetry snapshot in a single register block transaction.
    pub async fn read_snapshot(&mut self) -> Result<TelemetrySnapshot, DeviceError> {
        let dynamic = self.read_block(DYNAMIC_BASE, DYNAMIC_LEN).await?;

        let snapshot = decode_snapshot(&dynamic);
        debug!(
            "Read snapshot from {}: battery {:.1}V, {}",
            self.device, snapshot.battery_voltage, snapshot.charging_state
        );
        Ok(snapshot)
    }

    /// Read the static identity block.
    pub async fn read_device_info(&mut self) -> Result<DeviceInfo, DeviceError> {
        let words = self.read_block(IDENTITY_BASE, IDENTITY_LEN).await?;
        Ok(decode_device_info(&words))
    }
}

impl SnapshotSource for ChargeController {
    async fn read_snapshot(&mut self) -> Result<TelemetrySnapshot, DeviceError> {
        ChargeController::read_snapshot(self).await
    }
}

/// Decode the dynamic block (33 registers from 0x0100) into a snapshot.
/// The caller guarantees the block length.
fn decode_snapshot(words: &[u16]) -> TelemetrySnapshot {
    let (controller_temperature, battery_temperature) = decode_temperatures(words[TEMPERATURES]);

    TelemetrySnapshot {
        timestamp: now_iso8601(),
        solar_voltage: tenths(words[SOLAR_VOLTAGE]),
        solar_current: hundredths(words[SOLAR_CURRENT]),
        solar_power: words[SOLAR_POWER],
        load_voltage: tenths(words[LOAD_VOLTAGE]),
        load_current: hundredths(words[LOAD_CURRENT]),
        load_power: words[LOAD_POWER],
        battery_voltage: tenths(words[BATTERY_VOLTAGE]),
        battery_state_of_charge: words[SOC],
        battery_temperature,
        controller_temperature,
        maximum_solar_power_today: words[MAX_SOLAR_POWER_TODAY],
        minimum_solar_power_today: words[MIN_SOLAR_POWER_TODAY],
        maximum_battery_voltage_today: tenths(words[MAX_BATTERY_VOLTAGE_TODAY]),
        minimum_battery_voltage_today: tenths(words[MIN_BATTERY_VOLTAGE_TODAY]),
        charging_state: ChargingState::from((words[CHARGING_STATE] & 0x00FF) as u8),
    }
}

/// Decode the identity block (16 registers from 0x000A).
fn decode_device_info(words: &[u16]) -> DeviceInfo {
    let ratings = words[0];
    let limits = words[1];

    DeviceInfo {
        model: decode_ascii(&words[2..10]),
        software_version: decode_version(words[10], words[11]),
        hardware_version: decode_version(words[12], words[13]),
        serial_number: (u32::from(words[14]) << 16) | u32::from(words[15]),
        voltage_rating: (ratings >> 8) as u8,
        current_rating: (ratings & 0x00FF) as u8,
        discharge_rating: (limits >> 8) as u8,
        controller_type: if limits & 0x00FF == 1 {
            "inverter".to_string()
        } else {
            "controller".to_string()
        },
    }
}

/// Temperatures are packed two per register: controller in the high byte,
/// battery in the low byte, each sign-magnitude (bit 7 sign, bits 0-6 value).
fn decode_temperatures(word: u16) -> (i16, i16) {
    (
        sign_magnitude((word >> 8) as u8),
        sign_magnitude((word & 0x00FF) as u8),
    )
}

fn sign_magnitude(byte: u8) -> i16 {
    let magnitude = i16::from(byte & 0x7F);
    if byte & 0x80 != 0 { -magnitude } else { magnitude }
}

fn tenths(word: u16) -> f64 {
    f64::from(word) * 0.1
}

fn hundredths(word: u16) -> f64 {
    f64::from(word) * 0.01
}

/// Decode big-endian ASCII register words, trimming padding.
fn decode_ascii(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }

    String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Versions are four packed bytes across two registers; the first byte is
/// reserved and the rest are major.minor.patch.
fn decode_version(high: u16, low: u16) -> String {
    format!("V{}.{}.{}", high & 0x00FF, low >> 8, low & 0x00FF)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dynamic block as a controller at 87% charge on a sunny day would
    /// report it.
    fn sample_dynamic_block() -> [u16; DYNAMIC_LEN as usize] {
        let mut words = [0u16; DYNAMIC_LEN as usize];
        words[CHARGING_STATE] = 0x0002; // mppt
        words[SOC] = 87;
        words[BATTERY_VOLTAGE] = 132; // 13.2 V
        words[TEMPERATURES] = 0x1813; // controller 24 C, battery 19 C
        words[LOAD_VOLTAGE] = 128; // 12.8 V
        words[LOAD_CURRENT] = 42; // 0.42 A
        words[LOAD_POWER] = 5;
        words[SOLAR_VOLTAGE] = 184; // 18.4 V
        words[SOLAR_CURRENT] = 251; // 2.51 A
        words[SOLAR_POWER] = 46;
        words[MIN_BATTERY_VOLTAGE_TODAY] = 121;
        words[MAX_BATTERY_VOLTAGE_TODAY] = 144;
        words[MAX_SOLAR_POWER_TODAY] = 102;
        words[MIN_SOLAR_POWER_TODAY] = 0;
        words
    }

    #[test]
    fn test_decode_snapshot_scaling() {
        let snapshot = decode_snapshot(&sample_dynamic_block());

        assert_eq!(snapshot.battery_state_of_charge, 87);
        assert!((snapshot.battery_voltage - 13.2).abs() < 1e-9);
        assert!((snapshot.solar_voltage - 18.4).abs() < 1e-9);
        assert!((snapshot.solar_current - 2.51).abs() < 1e-9);
        assert_eq!(snapshot.solar_power, 46);
        assert!((snapshot.load_current - 0.42).abs() < 1e-9);
        assert_eq!(snapshot.load_power, 5);
        assert!((snapshot.maximum_battery_voltage_today - 14.4).abs() < 1e-9);
        assert!((snapshot.minimum_battery_voltage_today - 12.1).abs() < 1e-9);
        assert_eq!(snapshot.maximum_solar_power_today, 102);
        assert_eq!(snapshot.minimum_solar_power_today, 0);
        assert_eq!(snapshot.charging_state, ChargingState::Mppt);
    }

    #[test]
    fn test_decode_snapshot_charging_state_low_byte() {
        // High byte carries the load status and must be ignored.
        let mut words = sample_dynamic_block();
        words[CHARGING_STATE] = 0x8005;
        let snapshot = decode_snapshot(&words);
        assert_eq!(snapshot.charging_state, ChargingState::Floating);
    }

    #[test]
    fn test_decode_temperatures_positive() {
        let (controller, battery) = decode_temperatures(0x1813);
        assert_eq!(controller, 24);
        assert_eq!(battery, 19);
    }

    #[test]
    fn test_decode_temperatures_negative() {
        // Sign-magnitude, not two's complement: bit 7 of each byte is the sign.
        let (controller, battery) = decode_temperatures(0x8C99);
        assert_eq!(controller, -12);
        assert_eq!(battery, -25);
    }

    #[test]
    fn test_decode_ascii_trims_padding() {
        // "ML2430  " in big-endian register words
        let words = [0x4D4C, 0x3234, 0x3330, 0x2020];
        assert_eq!(decode_ascii(&words), "ML2430");
    }

    #[test]
    fn test_decode_ascii_trims_nul() {
        let words = [0x524E, 0x4700, 0x0000];
        assert_eq!(decode_ascii(&words), "RNG");
    }

    #[test]
    fn test_decode_version() {
        // 00 01 02 0A -> V1.2.10
        assert_eq!(decode_version(0x0001, 0x020A), "V1.2.10");
    }

    #[test]
    fn test_decode_device_info() {
        let mut words = [0u16; IDENTITY_LEN as usize];
        words[0] = 0x0C1E; // 12 V system, 30 A charge
        words[1] = 0x1400; // 20 A discharge, controller
        // "RNG-CTRL-WND30  "
        let model = [
            0x524E, 0x472D, 0x4354, 0x524C, 0x2D57, 0x4E44, 0x3330, 0x2020,
        ];
        words[2..10].copy_from_slice(&model);
        words[10] = 0x0001; // software V1.2.3
        words[11] = 0x0203;
        words[12] = 0x0001; // hardware V1.0.0
        words[13] = 0x0000;
        words[14] = 0x00BC; // serial 12345678
        words[15] = 0x614E;

        let info = decode_device_info(&words);
        assert_eq!(info.model, "RNG-CTRL-WND30");
        assert_eq!(info.software_version, "V1.2.3");
        assert_eq!(info.hardware_version, "V1.0.0");
        assert_eq!(info.serial_number, 12345678);
        assert_eq!(info.voltage_rating, 12);
        assert_eq!(info.current_rating, 30);
        assert_eq!(info.discharge_rating, 20);
        assert_eq!(info.controller_type, "controller");
    }

    #[test]
    fn test_decode_device_info_inverter_type() {
        let mut words = [0u16; IDENTITY_LEN as usize];
        words[1] = 0x0A01;
        let info = decode_device_info(&words);
        assert_eq!(info.controller_type, "inverter");
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = ChargeController::open("/dev/does-not-exist", 1);
        assert!(matches!(result, Err(DeviceError::Open(_))));
    }
}
