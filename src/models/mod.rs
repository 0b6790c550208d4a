use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Description NUT reports for a UPS that has no `desc` configured
pub const DESCRIPTION_UNAVAILABLE: &str = "Description unavailable";

/// Device key -> description as reported by `LIST UPS`
pub type DeviceRegistry = BTreeMap<String, String>;

/// Variable name -> value as reported by `LIST VAR`
pub type RawTelemetry = HashMap<String, String>;

/// Connection state of the link to the NUT server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        return *self == ConnectionState::Connected;
    }

    pub fn to_string(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
        }
    }
}

/// Battery charging state, modelled after the HomeKit characteristic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChargingState {
    #[default]
    NotCharging,
    Charging,
    NotChargeable,
}

impl ChargingState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "OL CHRG" | "OL" => ChargingState::Charging,
            "OB DISCHRG" | "OB" => ChargingState::NotChargeable,
            _ => ChargingState::NotCharging,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            ChargingState::NotCharging => "Not Charging".to_string(),
            ChargingState::Charging => "Charging".to_string(),
            ChargingState::NotChargeable => "Not Chargeable".to_string(),
        }
    }
}

/// Normalized state of one UPS, rebuilt on every poll
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpsState {
    /// Device key as assigned by the NUT server
    pub key: String,
    /// Display name, falls back to the key
    pub name: String,
    /// Set while the NUT server is not connected
    pub fault: bool,
    pub active: bool,
    pub on_battery: bool,
    /// Degrees celsius, -1 when unknown
    pub temperature: f64,
    /// Percent, 0 when unknown
    pub battery_level: f64,
    pub charging_state: ChargingState,
    pub low_battery: bool,
    /// Watts
    pub power_consumption: i64,
    /// Load in percent
    pub power_consumption_level: i64,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

/// Name used for a device, the key is used when NUT has no description
pub fn display_name(key: &str, description: &str) -> String {
    if description == DESCRIPTION_UNAVAILABLE {
        return key.to_string();
    }
    return description.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charging_state_from_status() {
        assert_eq!(ChargingState::from_status("OL"), ChargingState::Charging);
        assert_eq!(ChargingState::from_status("OL CHRG"), ChargingState::Charging);
        assert_eq!(ChargingState::from_status("OB"), ChargingState::NotChargeable);
        assert_eq!(ChargingState::from_status("OB DISCHRG"), ChargingState::NotChargeable);
        assert_eq!(ChargingState::from_status("OL BOOST"), ChargingState::NotCharging);
        assert_eq!(ChargingState::from_status(""), ChargingState::NotCharging);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("ups1", DESCRIPTION_UNAVAILABLE), "ups1");
        assert_eq!(display_name("ups1", "Rack UPS"), "Rack UPS");
    }
}
