use crate::accessory::{AccessoryDirectory, AccessoryHandle, AccessoryInfo, Characteristic};
use crate::mqtt::ha_interface::{HAPlatform, HaComponent, HaDiscover};
use crate::mqtt::Transmission;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tokio::sync::mpsc::Sender;

/// Accessory remembered across restarts
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CachedAccessory {
    pub id: String,
    pub key: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// Accessory directory backed by Home Assistant MQTT discovery and a
/// JSON file of everything registered so far.
pub struct HaAccessoryDirectory {
    sender: Sender<Transmission>,
    cache_path: Option<PathBuf>,
    accessories: Vec<CachedAccessory>,
    ha_enabled: bool,
}

impl HaAccessoryDirectory {
    pub fn load(cache_path: Option<PathBuf>, sender: Sender<Transmission>, ha_enabled: bool) -> Self {
        let mut accessories = Vec::new();

        if let Some(path) = &cache_path {
            match fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<Vec<CachedAccessory>>(&contents) {
                    Ok(cached) => accessories = cached,
                    Err(e) => warn!("Accessory cache {} is corrupt, starting empty: {e}", path.display()),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No accessory cache at {}", path.display());
                }
                Err(e) => error!("Unable to read accessory cache {}: {e}", path.display()),
            }
        }

        for accessory in accessories.iter() {
            info!("Loading accessory from cache: {}", accessory.name);
        }

        return HaAccessoryDirectory {
            sender,
            cache_path,
            accessories,
            ha_enabled,
        };
    }

    pub fn cached(&self) -> &[CachedAccessory] {
        &self.accessories
    }

    fn save(&self) {
        let Some(path) = &self.cache_path else {
            return;
        };

        match serde_json::to_string_pretty(&self.accessories) {
            Ok(contents) => match fs::write(path, contents.as_bytes()) {
                Ok(_) => debug!("Accessory cache written to {}", path.display()),
                Err(e) => error!("Error writing accessory cache {}: {e:?}", path.display()),
            },
            Err(e) => error!("Unable to serialize accessory cache: {e}"),
        }
    }

    fn discovery(handle: &AccessoryHandle, info: &AccessoryInfo) -> HaDiscover {
        let mut disc = HaDiscover::new(
            &handle.id,
            &info.name,
            &info.manufacturer,
            &info.model,
            &info.serial_number,
            &info.firmware_revision,
        );
        let dev = handle.key.as_str();
        let topic = |c: Characteristic| handle.state_topic(c);

        disc.add_component("fault", HaComponent::new_binary(dev, topic(Characteristic::StatusFault), "Fault", "problem"));
        disc.add_component("on_battery", HaComponent::new_binary(dev, topic(Characteristic::ContactSensorState), "On Battery", "NONE"));
        disc.add_component("active", HaComponent::new_binary(dev, topic(Characteristic::StatusActive), "Active", "running"));
        disc.add_component("low_battery", HaComponent::new_binary(dev, topic(Characteristic::StatusLowBattery), "Low Battery", "battery"));
        disc.add_component("temperature", HaComponent::new_measurement(dev, topic(Characteristic::CurrentTemperature), "Temperature", "temperature", "°C"));
        disc.add_component("battery_level", HaComponent::new_measurement(dev, topic(Characteristic::BatteryLevel), "Battery Level", "battery", "%"));
        disc.add_component("power", HaComponent::new_measurement(dev, topic(Characteristic::PowerConsumption), "Power", "power", "W"));
        disc.add_component("load", HaComponent::new_measurement(dev, topic(Characteristic::PowerConsumptionLevel), "Load", "power_factor", "%"));
        disc.add_component("charging_state", HaComponent::new(
            HAPlatform::Sensor, dev, topic(Characteristic::ChargingState), "Charging State", "NONE", "NONE", "NONE"));

        return disc;
    }
}

impl AccessoryDirectory for HaAccessoryDirectory {
    fn find_by_identity(&self, id: &str) -> Option<AccessoryHandle> {
        let cached = self.accessories.iter().find(|a| a.id == id)?;
        info!("Found existing accessory for {} => {}", cached.id, cached.name);
        Some(AccessoryHandle::new(cached.id.clone(), cached.key.clone(), cached.name.clone(), self.sender.clone()))
    }

    fn create(&mut self, key: &str, name: &str, id: &str) -> AccessoryHandle {
        info!("Adding new accessory: {name}");
        AccessoryHandle::new(id.to_string(), key.to_string(), name.to_string(), self.sender.clone())
    }

    async fn register(&mut self, handle: &AccessoryHandle, info: &AccessoryInfo) {
        if !self.accessories.iter().any(|a| a.id == handle.id) {
            self.accessories.push(CachedAccessory {
                id: handle.id.clone(),
                key: handle.key.clone(),
                name: handle.name.clone(),
                registered_at: Utc::now(),
            });
            self.save();
        }

        if self.ha_enabled {
            let _ = self.sender.send(Transmission::AutoDiscovery(Self::discovery(handle, info))).await;
        }
    }
}
