use crate::models::UpsState;
use crate::mqtt::{PublishData, Transmission, BASE_TOPIC};
use log::debug;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

pub mod directory;
pub mod publisher;

pub use directory::HaAccessoryDirectory;
pub use publisher::AccessoryStatePublisher;

/// Namespace for accessory ids, changing it orphans every known accessory
const ACCESSORY_NAMESPACE: Uuid = Uuid::from_u128(0x5c2d_8e4a_7f31_4b0e_9a6d_3e1f_c4b2_a987);

/// Stable accessory id derived from a NUT device key
pub fn accessory_id(key: &str) -> String {
    return Uuid::new_v5(&ACCESSORY_NAMESPACE, key.as_bytes()).to_string();
}

/// Everything a UPS accessory exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    FirmwareRevision,
    StatusFault,
    ContactSensorState,
    StatusActive,
    CurrentTemperature,
    PowerConsumption,
    PowerConsumptionLevel,
    BatteryLevel,
    ChargingState,
    StatusLowBattery,
}

impl Characteristic {
    pub fn topic_name(&self) -> &'static str {
        match self {
            Characteristic::Name => "name",
            Characteristic::Manufacturer => "manufacturer",
            Characteristic::Model => "model",
            Characteristic::SerialNumber => "serial_number",
            Characteristic::FirmwareRevision => "firmware_revision",
            Characteristic::StatusFault => "status_fault",
            Characteristic::ContactSensorState => "contact_sensor_state",
            Characteristic::StatusActive => "status_active",
            Characteristic::CurrentTemperature => "current_temperature",
            Characteristic::PowerConsumption => "power_consumption",
            Characteristic::PowerConsumptionLevel => "power_consumption_level",
            Characteristic::BatteryLevel => "battery_level",
            Characteristic::ChargingState => "charging_state",
            Characteristic::StatusLowBattery => "status_low_battery",
        }
    }
}

/// Static identity of an accessory, set once per process
#[derive(Debug, Clone, PartialEq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

impl AccessoryInfo {
    pub fn from_state(state: &UpsState) -> Self {
        AccessoryInfo {
            name: state.name.clone(),
            manufacturer: state.manufacturer.clone(),
            model: state.model.clone(),
            serial_number: state.serial_number.clone(),
            firmware_revision: state.firmware_revision.clone(),
        }
    }

    pub fn characteristics(&self) -> Vec<(Characteristic, Value)> {
        vec![
            (Characteristic::Manufacturer, Value::from(self.manufacturer.clone())),
            (Characteristic::Model, Value::from(self.model.clone())),
            (Characteristic::SerialNumber, Value::from(self.serial_number.clone())),
            (Characteristic::FirmwareRevision, Value::from(self.firmware_revision.clone())),
            (Characteristic::Name, Value::from(self.name.clone())),
        ]
    }
}

/// A published accessory. Every characteristic write becomes one retained
/// MQTT message below the accessory's state topic.
#[derive(Clone, Debug)]
pub struct AccessoryHandle {
    pub id: String,
    pub key: String,
    pub name: String,
    sender: Sender<Transmission>,
}

impl AccessoryHandle {
    pub fn new(id: String, key: String, name: String, sender: Sender<Transmission>) -> Self {
        return AccessoryHandle { id, key, name, sender };
    }

    pub fn state_topic(&self, characteristic: Characteristic) -> String {
        return format!("{BASE_TOPIC}/devs/{}/{}", self.key, characteristic.topic_name());
    }

    pub async fn update_characteristic(&self, characteristic: Characteristic, value: Value) {
        debug!("[{}] {} = {value}", self.key, characteristic.topic_name());

        let publish = PublishData {
            topic: self.state_topic(characteristic),
            payload: match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            qos: 1,
            retain: true,
        };
        let _ = self.sender.send(Transmission::Publish(publish)).await;
    }
}

/// Lookup and creation of persistent accessories
pub trait AccessoryDirectory: Send {
    fn find_by_identity(&self, id: &str) -> Option<AccessoryHandle>;

    fn create(&mut self, key: &str, name: &str, id: &str) -> AccessoryHandle;

    fn register(&mut self, handle: &AccessoryHandle, info: &AccessoryInfo) -> impl Future<Output = ()> + Send;
}
