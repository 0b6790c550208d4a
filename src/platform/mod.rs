use crate::accessory::{AccessoryStatePublisher, HaAccessoryDirectory};
use crate::config::NutConfig;
use crate::models::{ConnectionState, DeviceRegistry};
use crate::mqtt::{publish_device_count, Transmission};
use crate::nut::{NutClient, NutError};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::sync::{mpsc, watch, Notify};

pub mod scheduler;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod fake;

pub use scheduler::{CycleReport, PollScheduler, PollSettings};
pub use supervisor::ConnectionSupervisor;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Unable to enumerate UPS devices: {0}")]
    Enumeration(#[source] NutError),
    #[error("Polling UPS {key} failed: {source}")]
    Poll {
        key: String,
        #[source]
        source: NutError,
    },
    #[error("Polling UPS {key} timed out after {timeout:?}")]
    PollTimeout { key: String, timeout: Duration },
}

/// What the supervisor shares with everybody else
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub devices: Arc<DeviceRegistry>,
}

/// Requests other tasks may send to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    Connect,
}

/// Runs the NUT side of the bridge: connection supervision and polling
pub struct NutManager {
    sender: Sender<Transmission>,
    config: NutConfig,
    ha_enabled: bool,
    wake: Arc<Notify>,
}

impl NutManager {
    pub fn new(sender: Sender<Transmission>, config: NutConfig, ha_enabled: bool) -> Self {
        return NutManager {
            sender,
            config,
            ha_enabled,
            wake: Arc::new(Notify::new()),
        };
    }

    /// Notifying this handle starts a poll cycle as soon as the current one is done
    pub fn get_wake_handle(&self) -> Arc<Notify> {
        return self.wake.clone();
    }

    pub async fn start_thread(&mut self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        let mut client = NutClient::new(&self.config.host, self.config.port, event_tx)
            .with_timeout(Duration::from_secs(self.config.request_timeout));
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            client = client.with_credentials(username.clone(), password.clone());
        }
        info!("Created NUT client for {}", client.addr());
        let client = Arc::new(client);

        let directory = HaAccessoryDirectory::load(
            self.config.accessory_cache.as_ref().map(PathBuf::from),
            self.sender.clone(),
            self.ha_enabled,
        );

        let scheduler = PollScheduler::new(
            client.clone(),
            AccessoryStatePublisher::new(directory),
            status_rx.clone(),
            cmd_tx,
            self.wake.clone(),
            PollSettings {
                poll_interval: Duration::from_secs(self.config.poll_interval),
                request_timeout: Duration::from_secs(self.config.request_timeout),
                low_batt_threshold: self.config.low_batt_threshold,
            },
        );
        let poller = tokio::spawn(scheduler.run());

        /* Publish the device count whenever the registry changes */
        let count_sender = self.sender.clone();
        let mut count_rx = status_rx;
        let counter = tokio::spawn(async move {
            let mut last = None;
            while count_rx.changed().await.is_ok() {
                let count = count_rx.borrow_and_update().devices.len();
                if last != Some(count) {
                    last = Some(count);
                    publish_device_count(&count_sender, count).await;
                }
            }
        });

        let supervisor = ConnectionSupervisor::new(client, status_tx, self.wake.clone());
        supervisor
            .run(event_rx, cmd_rx, Duration::from_secs(self.config.connect_interval))
            .await;

        poller.abort();
        counter.abort();
    }
}
