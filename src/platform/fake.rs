use crate::models::{DeviceRegistry, RawTelemetry};
use crate::nut::{LinkEvent, NutError, TelemetrySource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Scriptable telemetry source that records how it is used
pub(crate) struct FakeSource {
    events: UnboundedSender<LinkEvent>,
    connect_succeeds: AtomicBool,
    devices: Mutex<Option<DeviceRegistry>>,
    variables: Mutex<HashMap<String, RawTelemetry>>,
    delay: Mutex<Duration>,
    connects: AtomicUsize,
    list_calls: AtomicUsize,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> (Self, UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = FakeSource {
            events: tx,
            connect_succeeds: AtomicBool::new(true),
            devices: Mutex::new(Some(DeviceRegistry::new())),
            variables: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            connects: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        };
        (source, rx)
    }

    /// `None` makes `list_devices` fail
    pub fn set_devices(&self, devices: Option<&[(&str, &str)]>) {
        *self.devices.lock().unwrap() = devices.map(|d| {
            d.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        });
    }

    /// Devices without variables fail their fetch
    pub fn set_variables(&self, key: &str, vars: &[(&str, &str)]) {
        let vars = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.variables.lock().unwrap().insert(key.to_string(), vars);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_connect_succeeds(&self, succeeds: bool) {
        self.connect_succeeds.store(succeeds, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl TelemetrySource for FakeSource {
    async fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_succeeds.load(Ordering::SeqCst) {
            let _ = self.events.send(LinkEvent::Ready);
        } else {
            let _ = self.events.send(LinkEvent::Error("connection refused".to_string()));
            let _ = self.events.send(LinkEvent::Close);
        }
    }

    async fn list_devices(&self) -> Result<DeviceRegistry, NutError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let devices = self.devices.lock().unwrap().clone();
        devices.ok_or_else(|| NutError::Server("ACCESS-DENIED".to_string()))
    }

    async fn get_variables(&self, key: &str) -> Result<RawTelemetry, NutError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let vars = self.variables.lock().unwrap().get(key).cloned();
        vars.ok_or_else(|| NutError::Server("UNKNOWN-UPS".to_string()))
    }
}
