use crate::models::{ConnectionState, DeviceRegistry};
use crate::nut::{LinkEvent, TelemetrySource};
use crate::platform::{LinkStatus, PlatformError, SupervisorCommand};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

/// Owns the connection state and the device registry. It is the only writer
/// of both and shares them through a watch channel.
pub struct ConnectionSupervisor<S: TelemetrySource> {
    source: Arc<S>,
    state: ConnectionState,
    registry: DeviceRegistry,
    status: watch::Sender<LinkStatus>,
    initialized: Arc<Notify>,
}

impl<S: TelemetrySource> ConnectionSupervisor<S> {
    pub fn new(source: Arc<S>, status: watch::Sender<LinkStatus>, initialized: Arc<Notify>) -> Self {
        return ConnectionSupervisor {
            source,
            state: ConnectionState::Disconnected,
            registry: DeviceRegistry::new(),
            status,
            initialized,
        };
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state.to_string(), state.to_string());
        }
        self.state = state;
        self.share();
    }

    fn share(&self) {
        self.status.send_replace(LinkStatus {
            state: self.state,
            devices: Arc::new(self.registry.clone()),
        });
    }

    /// Start a connection attempt unless one is running or the link is up
    pub async fn start(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }

        self.set_state(ConnectionState::Connecting);
        self.source.connect().await;
    }

    pub async fn on_ready(&mut self) -> Result<(), PlatformError> {
        self.set_state(ConnectionState::Connected);

        if !self.registry.is_empty() {
            info!("NUT client reconnected, resuming polling of {} devices", self.registry.len());
            self.initialized.notify_one();
            return Ok(());
        }

        let devices = match self.source.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                /* Not usable without a device list, the connect timer tries again */
                self.set_state(ConnectionState::Disconnected);
                return Err(PlatformError::Enumeration(e));
            }
        };

        if devices.is_empty() {
            warn!("No UPS devices returned from the NUT server!");
        } else {
            let list: Vec<String> = devices.iter().map(|(k, v)| format!("{k}={v}")).collect();
            info!("NUT client connected, reported devices: {}", list.join(","));
        }

        self.registry = devices;
        self.share();
        self.initialized.notify_one();
        Ok(())
    }

    pub fn on_close(&mut self) {
        info!("NUT connection closed");
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn on_error(&mut self, message: &str) {
        error!("NUT client error: {message}");
    }

    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Ready => {
                if let Err(e) = self.on_ready().await {
                    error!("{e}");
                }
            }
            LinkEvent::Close => self.on_close(),
            LinkEvent::Error(message) => self.on_error(&message),
        }
    }

    /// Drive the supervisor until every input is gone
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<LinkEvent>,
        mut commands: Receiver<SupervisorCommand>,
        connect_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(connect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Telemetry source is gone, supervisor exits");
                        return;
                    }
                },
                Some(SupervisorCommand::Connect) = commands.recv() => self.start().await,
                _ = ticker.tick() => self.start().await,
            }
        }
    }
}
