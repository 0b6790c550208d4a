use crate::accessory::{accessory_id, AccessoryDirectory, AccessoryHandle, AccessoryInfo, Characteristic};
use crate::models::UpsState;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

struct PublishedAccessory {
    handle: AccessoryHandle,
    last: UpsState,
}

/// Pushes UPS state to accessories, writing only what changed since the
/// previous publish of the same device.
pub struct AccessoryStatePublisher<D: AccessoryDirectory> {
    directory: D,
    accessories: HashMap<String, PublishedAccessory>,
}

/// Every mutable characteristic with its value for the given state
fn state_characteristics(state: &UpsState) -> Vec<(Characteristic, Value)> {
    vec![
        (Characteristic::StatusFault, Value::from(state.fault)),
        (Characteristic::ContactSensorState, Value::from(state.on_battery)),
        (Characteristic::StatusActive, Value::from(state.active)),
        (Characteristic::CurrentTemperature, Value::from(state.temperature)),
        (Characteristic::PowerConsumption, Value::from(state.power_consumption)),
        (Characteristic::PowerConsumptionLevel, Value::from(state.power_consumption_level)),
        (Characteristic::BatteryLevel, Value::from(state.battery_level)),
        (Characteristic::ChargingState, Value::from(state.charging_state.to_string())),
        (Characteristic::StatusLowBattery, Value::from(state.low_battery)),
    ]
}

/// Characteristics whose value differs between two states
pub fn changed_characteristics(previous: &UpsState, next: &UpsState) -> Vec<(Characteristic, Value)> {
    state_characteristics(previous)
        .into_iter()
        .zip(state_characteristics(next))
        .filter(|((_, old), (_, new))| old != new)
        .map(|(_, changed)| changed)
        .collect()
}

impl<D: AccessoryDirectory> AccessoryStatePublisher<D> {
    pub fn new(directory: D) -> Self {
        return AccessoryStatePublisher {
            directory,
            accessories: HashMap::new(),
        };
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn known_devices(&self) -> usize {
        self.accessories.len()
    }

    /// Publish one state, returning the number of characteristic writes
    pub async fn publish(&mut self, state: UpsState) -> usize {
        if let Some(published) = self.accessories.get_mut(&state.key) {
            let changes = changed_characteristics(&published.last, &state);
            for (characteristic, value) in changes.iter() {
                published.handle.update_characteristic(*characteristic, value.clone()).await;
            }

            debug!("[{}] {} characteristics changed", state.key, changes.len());
            published.last = state;
            return changes.len();
        }

        let handle = self.resolve(&state).await;

        let mut writes = 0;
        for (characteristic, value) in AccessoryInfo::from_state(&state).characteristics() {
            handle.update_characteristic(characteristic, value).await;
            writes += 1;
        }
        for (characteristic, value) in state_characteristics(&state) {
            handle.update_characteristic(characteristic, value).await;
            writes += 1;
        }

        debug!("Pushed initial state for {}={}", state.key, state.name);
        self.accessories.insert(state.key.clone(), PublishedAccessory { handle, last: state });
        return writes;
    }

    async fn resolve(&mut self, state: &UpsState) -> AccessoryHandle {
        let id = accessory_id(&state.key);

        if let Some(handle) = self.directory.find_by_identity(&id) {
            return handle;
        }

        let handle = self.directory.create(&state.key, &state.name, &id);
        self.directory.register(&handle, &AccessoryInfo::from_state(state)).await;
        return handle;
    }
}
