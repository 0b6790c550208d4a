use crate::accessory::{AccessoryDirectory, AccessoryStatePublisher};
use crate::models::display_name;
use crate::nut::normalizer::normalize;
use crate::nut::TelemetrySource;
use crate::platform::{LinkStatus, PlatformError, SupervisorCommand};
use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::{watch, Notify};

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub low_batt_threshold: f64,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// The link was down, nothing was polled
    pub skipped: bool,
    pub published: usize,
    pub failed: usize,
}

/// Polls every known device in cycles that never overlap. The next cycle
/// is scheduled only after the current one settled.
pub struct PollScheduler<S: TelemetrySource, D: AccessoryDirectory> {
    source: Arc<S>,
    publisher: AccessoryStatePublisher<D>,
    status: watch::Receiver<LinkStatus>,
    commands: Sender<SupervisorCommand>,
    wake: Arc<Notify>,
    settings: PollSettings,
}

impl<S: TelemetrySource, D: AccessoryDirectory> PollScheduler<S, D> {
    pub fn new(
        source: Arc<S>,
        publisher: AccessoryStatePublisher<D>,
        status: watch::Receiver<LinkStatus>,
        commands: Sender<SupervisorCommand>,
        wake: Arc<Notify>,
        settings: PollSettings,
    ) -> Self {
        return PollScheduler { source, publisher, status, commands, wake, settings };
    }

    pub fn publisher(&self) -> &AccessoryStatePublisher<D> {
        &self.publisher
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let status = self.status.borrow().clone();

        if !status.state.is_connected() {
            debug!("NUT not connected ({}), requesting a connect", status.state.to_string());
            /* A full queue means a connect request is already pending */
            let _ = self.commands.try_send(SupervisorCommand::Connect);
            report.skipped = true;
            return report;
        }

        let source = &self.source;
        let timeout = self.settings.request_timeout;

        let mut pending: FuturesUnordered<_> = status
            .devices
            .iter()
            .map(|(key, description)| async move {
                let name = display_name(key, description);
                let result = match tokio::time::timeout(timeout, source.get_variables(key)).await {
                    Ok(Ok(vars)) => Ok(vars),
                    Ok(Err(e)) => Err(PlatformError::Poll { key: key.clone(), source: e }),
                    Err(_) => Err(PlatformError::PollTimeout { key: key.clone(), timeout }),
                };
                (key, name, result)
            })
            .collect();

        /* Each device is published as soon as its own fetch settled. Fetches
         * still in the set are not polled while a publish waits for room in
         * the MQTT channel, which is the only thing a publish waits on. */
        while let Some((key, name, result)) = pending.next().await {
            match result {
                Ok(vars) => {
                    /* Fault mirrors the live link state, not the state at cycle start */
                    let connection = self.status.borrow().state;
                    let state = normalize(key, &name, &vars, connection, self.settings.low_batt_threshold);
                    self.publisher.publish(state).await;
                    report.published += 1;
                }
                Err(e) => {
                    error!("{e}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub async fn run(mut self) {
        loop {
            let report = self.run_cycle().await;
            debug!("Poll cycle done: {report:?}");

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {},
                _ = self.wake.notified() => debug!("Woken up for an immediate poll"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::HaAccessoryDirectory;
    use crate::models::{ConnectionState, DeviceRegistry};
    use crate::mqtt::Transmission;
    use crate::platform::fake::FakeSource;
    use tokio::sync::mpsc::{self, Receiver};

    struct Harness {
        scheduler: PollScheduler<FakeSource, HaAccessoryDirectory>,
        source: Arc<FakeSource>,
        status: watch::Sender<LinkStatus>,
        commands: Receiver<SupervisorCommand>,
        mqtt: Receiver<Transmission>,
        wake: Arc<Notify>,
    }

    fn harness(devices: &[(&str, &str)], state: ConnectionState) -> Harness {
        let (source, _events) = FakeSource::new();
        let source = Arc::new(source);
        let registry: DeviceRegistry = devices.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let (status_tx, status_rx) = watch::channel(LinkStatus { state, devices: Arc::new(registry) });
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (mqtt_tx, mqtt_rx) = mpsc::channel(1024);
        let wake = Arc::new(Notify::new());

        let scheduler = PollScheduler::new(
            source.clone(),
            AccessoryStatePublisher::new(HaAccessoryDirectory::load(None, mqtt_tx, false)),
            status_rx,
            cmd_tx,
            wake.clone(),
            PollSettings {
                poll_interval: Duration::from_secs(60),
                request_timeout: Duration::from_secs(10),
                low_batt_threshold: 40.0,
            },
        );

        Harness { scheduler, source, status: status_tx, commands: cmd_rx, mqtt: mqtt_rx, wake }
    }

    fn published_topics(rx: &mut Receiver<Transmission>) -> Vec<String> {
        let mut topics = Vec::new();
        while let Ok(t) = rx.try_recv() {
            if let Transmission::Publish(p) = t {
                topics.push(p.topic);
            }
        }
        topics
    }

    #[tokio::test]
    async fn test_disconnected_cycle_requests_connect() {
        let mut h = harness(&[("rack", "Rack UPS")], ConnectionState::Disconnected);

        let report = h.scheduler.run_cycle().await;
        assert!(report.skipped);
        assert_eq!(h.source.fetches(), 0);
        assert!(matches!(h.commands.try_recv(), Ok(SupervisorCommand::Connect)));

        /* Repeated requests do not pile up */
        h.scheduler.run_cycle().await;
        h.scheduler.run_cycle().await;
        assert!(h.commands.try_recv().is_ok());
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_partial_failure_isolated() {
        let mut h = harness(&[("a", "UPS A"), ("b", "UPS B"), ("c", "UPS C")], ConnectionState::Connected);
        h.source.set_variables("a", &[("ups.status", "OL"), ("battery.charge", "100")]);
        h.source.set_variables("c", &[("ups.status", "OB"), ("battery.charge", "20")]);

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report, CycleReport { skipped: false, published: 2, failed: 1 });

        let topics = published_topics(&mut h.mqtt);
        assert!(topics.iter().any(|t| t.starts_with("nut2mqtt/devs/a/")));
        assert!(topics.iter().any(|t| t.starts_with("nut2mqtt/devs/c/")));
        assert!(!topics.iter().any(|t| t.starts_with("nut2mqtt/devs/b/")));
        assert_eq!(h.scheduler.publisher().known_devices(), 2);
    }

    #[tokio::test]
    async fn test_empty_registry_is_noop() {
        let mut h = harness(&[], ConnectionState::Connected);
        let report = h.scheduler.run_cycle().await;
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_unnamed_device_uses_key() {
        let mut h = harness(&[("desk", "Description unavailable")], ConnectionState::Connected);
        h.source.set_variables("desk", &[("ups.status", "OL")]);

        h.scheduler.run_cycle().await;

        let cached = h.scheduler.publisher().directory().cached();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "desk");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_a_poll_failure() {
        let mut h = harness(&[("slow", "Slow UPS")], ConnectionState::Connected);
        h.source.set_variables("slow", &[("ups.status", "OL")]);
        h.source.set_delay(Duration::from_secs(30));

        let report = h.scheduler.run_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, 0);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_last_values() {
        let mut h = harness(&[("rack", "Rack UPS")], ConnectionState::Connected);
        h.source.set_variables("rack", &[("ups.status", "OL")]);

        h.scheduler.run_cycle().await;
        published_topics(&mut h.mqtt);

        /* Link drops and comes back, the next publish carries no change */
        h.status.send_modify(|s| s.state = ConnectionState::Disconnected);
        assert!(h.scheduler.run_cycle().await.skipped);
        h.status.send_modify(|s| s.state = ConnectionState::Connected);
        h.scheduler.run_cycle().await;
        assert!(published_topics(&mut h.mqtt).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_never_overlap() {
        let h = harness(&[("a", "A"), ("b", "B"), ("c", "C")], ConnectionState::Connected);
        for key in ["a", "b", "c"] {
            h.source.set_variables(key, &[("ups.status", "OL")]);
        }
        /* Fetches slower than the poll interval but within the timeout */
        h.source.set_delay(Duration::from_secs(9));

        let source = h.source.clone();
        let Harness { scheduler, mqtt: _mqtt, status: _status, commands: _commands, .. } = h;
        let task = tokio::spawn(scheduler.run());

        /* Cycles start at 0s, 69s and 138s */
        tokio::time::sleep(Duration::from_secs(140)).await;
        assert_eq!(source.fetches(), 9);
        assert_eq!(source.max_in_flight(), 3);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_triggers_early_cycle() {
        let h = harness(&[("a", "A")], ConnectionState::Connected);
        h.source.set_variables("a", &[("ups.status", "OL")]);

        let source = h.source.clone();
        let wake = h.wake.clone();
        let Harness { scheduler, mqtt: _mqtt, status: _status, commands: _commands, .. } = h;
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetches(), 1);

        wake.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetches(), 2);

        task.abort();
    }
}
