use serde::{Deserialize, Serialize};
use crate::mqtt::BASE_TOPIC;

#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
    #[serde(skip_serializing_if = "is_none_str")]
    serial_number: String,
    #[serde(skip_serializing_if = "is_none_str")]
    sw_version: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
    pub support_url: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize, PartialEq, Deserialize, Clone, Default, Debug)]
pub enum HAPlatform {
    #[default]
    Sensor,
    BinarySensor,
}

impl HAPlatform {
    pub fn to_string(&self) -> String {
        match self {
            HAPlatform::Sensor => "sensor".to_string(),
            HAPlatform::BinarySensor => "binary_sensor".to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub state_topic: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
}

impl HaComponent {
    pub fn new(platform: HAPlatform, device: &str, state_topic: String, name: &str, dclass: &str, uof: &str, state_class: &str) -> Self {
        let safe_name = name.replace(" ", "_");

        let mut p_off = None;
        let mut p_on = None;

        if platform == HAPlatform::BinarySensor {
            p_off = Some("false".to_string());
            p_on = Some("true".to_string());
        }

        return HaComponent {
            p: platform.to_string(),
            name: name.to_string(),
            device_class: dclass.to_string(),
            unit_of_measurement: uof.to_string(),
            state_topic,
            unique_id: format!("{BASE_TOPIC}_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_class: state_class.to_string(),
            payload_on: p_on,
            payload_off: p_off,
        }
    }

    pub fn new_binary(device: &str, state_topic: String, name: &str, dclass: &str) -> Self {
        return HaComponent::new(HAPlatform::BinarySensor, device, state_topic, name, dclass, "NONE", "NONE");
    }

    pub fn new_measurement(device: &str, state_topic: String, name: &str, dclass: &str, uof: &str) -> Self {
        return HaComponent::new(HAPlatform::Sensor, device, state_topic, name, dclass, uof, "measurement");
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(id: &str, name: &str, manu: &str, model: &str, serial: &str, firmware: &str) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/{BASE_TOPIC}_{id}/config"),
            dev: HaDevice {
                ids: format!("{BASE_TOPIC}_{id}"),
                name: name.to_string(),
                manufacturer: manu.to_string(),
                model: model.to_string(),
                serial_number: serial.to_string(),
                sw_version: firmware.to_string(),
            },
            o: HaOrigin {
                name: BASE_TOPIC.to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
                support_url: "https://networkupstools.org".to_string()
            },
            cmps: serde_json::Map::new(),
            qos: 1
        }
    }

    pub fn add_component(&mut self, key: &str, cmp: HaComponent) {
        if let Ok(value) = serde_json::to_value(cmp) {
            self.cmps.insert(key.to_string(), value);
        }
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}
