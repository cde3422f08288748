use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One poll cycle's worth of controller readings.
///
/// Produced fresh by the device reader on every tick, published as a single
/// JSON object on the data topic, and never retained across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// ISO-8601 time the readings were taken.
    pub timestamp: String,

    /// PV array input voltage (V).
    pub solar_voltage: f64,

    /// PV array input current (A).
    pub solar_current: f64,

    /// PV array input power (W).
    pub solar_power: u16,

    /// Load output voltage (V).
    pub load_voltage: f64,

    /// Load output current (A).
    pub load_current: f64,

    /// Load output power (W).
    pub load_power: u16,

    /// Battery voltage (V).
    pub battery_voltage: f64,

    /// Remaining battery capacity (%).
    pub battery_state_of_charge: u16,

    /// Battery sensor temperature (°C).
    pub battery_temperature: i16,

    /// Controller case temperature (°C).
    pub controller_temperature: i16,

    /// Highest PV input power seen today (W).
    pub maximum_solar_power_today: u16,

    /// Lowest PV input power seen today (W).
    pub minimum_solar_power_today: u16,

    /// Highest battery voltage seen today (V).
    pub maximum_battery_voltage_today: f64,

    /// Lowest battery voltage seen today (V).
    pub minimum_battery_voltage_today: f64,

    /// Charging mode reported by the controller.
    pub charging_state: ChargingState,
}

/// Charging mode from the controller's state register.
///
/// Raw values outside the documented set are carried as [`ChargingState::Other`]
/// so a snapshot never fails to decode on a newer firmware value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    Deactivated,
    Activated,
    Mppt,
    Equalizing,
    Boost,
    Floating,
    CurrentLimiting,
    Other(u8),
}

impl From<u8> for ChargingState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ChargingState::Deactivated,
            1 => ChargingState::Activated,
            2 => ChargingState::Mppt,
            3 => ChargingState::Equalizing,
            4 => ChargingState::Boost,
            5 => ChargingState::Floating,
            6 => ChargingState::CurrentLimiting,
            other => ChargingState::Other(other),
        }
    }
}

impl ChargingState {
    /// Get the string representation used in payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargingState::Deactivated => "deactivated",
            ChargingState::Activated => "activated",
            ChargingState::Mppt => "mppt",
            ChargingState::Equalizing => "equalizing",
            ChargingState::Boost => "boost",
            ChargingState::Floating => "floating",
            ChargingState::CurrentLimiting => "current_limiting",
            ChargingState::Other(_) => "other",
        }
    }
}

impl std::fmt::Display for ChargingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static identity of the controller.
///
/// Read once at startup and included in the retained status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Product model string, e.g. "RNG-CTRL-WND30".
    pub model: String,

    /// Firmware version, e.g. "V1.2.3".
    pub software_version: String,

    /// Hardware revision, e.g. "V1.0.0".
    pub hardware_version: String,

    /// Factory serial number.
    pub serial_number: u32,

    /// Nominal system voltage (V).
    pub voltage_rating: u8,

    /// Rated charge current (A).
    pub current_rating: u8,

    /// Rated discharge current (A).
    pub discharge_rating: u8,

    /// Product class reported by the device ("controller" or "inverter").
    #[serde(rename = "type")]
    pub controller_type: String,
}

/// ISO-8601 timestamp for a snapshot taken now.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            solar_voltage: 18.4,
            solar_current: 2.51,
            solar_power: 46,
            load_voltage: 12.8,
            load_current: 0.42,
            load_power: 5,
            battery_voltage: 13.2,
            battery_state_of_charge: 87,
            battery_temperature: 19,
            controller_temperature: 24,
            maximum_solar_power_today: 102,
            minimum_solar_power_today: 0,
            maximum_battery_voltage_today: 14.4,
            minimum_battery_voltage_today: 12.1,
            charging_state: ChargingState::Mppt,
        }
    }

    #[test]
    fn test_snapshot_payload_schema() {
        let value = serde_json::to_value(sample_snapshot()).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "timestamp",
            "solar_voltage",
            "solar_current",
            "solar_power",
            "load_voltage",
            "load_current",
            "load_power",
            "battery_voltage",
            "battery_state_of_charge",
            "battery_temperature",
            "controller_temperature",
            "maximum_solar_power_today",
            "minimum_solar_power_today",
            "maximum_battery_voltage_today",
            "minimum_battery_voltage_today",
            "charging_state",
        ] {
            assert!(object.contains_key(key), "missing payload key '{}'", key);
        }

        assert_eq!(object["charging_state"], json!("mppt"));
        assert_eq!(object["battery_voltage"], json!(13.2));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = sample_snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: TelemetrySnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_charging_state_from_raw() {
        assert_eq!(ChargingState::from(0), ChargingState::Deactivated);
        assert_eq!(ChargingState::from(2), ChargingState::Mppt);
        assert_eq!(ChargingState::from(6), ChargingState::CurrentLimiting);
        assert_eq!(ChargingState::from(9), ChargingState::Other(9));
    }

    #[test]
    fn test_charging_state_display() {
        assert_eq!(ChargingState::Floating.as_str(), "floating");
        assert_eq!(ChargingState::CurrentLimiting.to_string(), "current_limiting");
        assert_eq!(ChargingState::Other(9).as_str(), "other");
    }

    #[test]
    fn test_device_info_type_key() {
        let info = DeviceInfo {
            model: "RNG-CTRL-WND30".to_string(),
            software_version: "V1.2.3".to_string(),
            hardware_version: "V1.0.0".to_string(),
            serial_number: 12345678,
            voltage_rating: 12,
            current_rating: 30,
            discharge_rating: 20,
            controller_type: "controller".to_string(),
        };

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["type"], json!("controller"));
        assert_eq!(value["serial_number"], json!(12345678));
    }

    #[test]
    fn test_now_iso8601_shape() {
        let stamp = now_iso8601();
        assert!(stamp.contains('T'));
        assert!(stamp.len() >= "2026-01-01T00:00:00".len());
    }
}
