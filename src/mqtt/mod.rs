pub mod internal_commands;
pub mod ha_interface;

use std::collections::HashMap;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use crate::config::MqttConfig;
use crate::mqtt::ha_interface::HaDiscover;
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use serde::{Serialize, Deserialize};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};

/// Prefix of every topic this bridge owns
pub const BASE_TOPIC: &str = "nut2mqtt";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MqttConnectionStatus {
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Clone)]
pub struct MqttHealthStatus {
    pub status: MqttConnectionStatus,
    pub last_connected: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub last_message_received: Option<Instant>,
    pub connection_attempts: u64,
}

#[derive(Clone)]
pub struct AppStatus {
    pub start_time: Instant,
    pub mqtt_health: MqttHealthStatus,
}

impl MqttHealthStatus {
    pub fn new() -> Self {
        Self {
            status: MqttConnectionStatus::Disconnected,
            last_connected: None,
            last_message_sent: None,
            last_message_received: None,
            connection_attempts: 0,
        }
    }
}

impl AppStatus {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_health: MqttHealthStatus::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub struct SubscribeData {
    pub topic: String,
    pub sender: tokio::sync::mpsc::Sender<String>
}

pub enum Transmission {
    AutoDiscovery(HaDiscover),
    Subscribe(SubscribeData),
    Publish(PublishData)
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
}

pub struct Callbacks {
    calls: HashMap<String, Vec<tokio::sync::mpsc::Sender<String>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        return Callbacks { calls: HashMap::new() };
    }

    pub fn insert(&mut self, topic: String, callback: tokio::sync::mpsc::Sender<String>) {
        debug!("Adding callback for topic {topic}");
        self.calls.entry(topic).or_default().push(callback);
    }

    pub async fn send(&self, topic: &str, payload: String) {
        let Some(v) = self.calls.get(topic) else {
            debug!("Send for unknown topic {topic}");
            return;
        };

        for call in v {
            debug!("Sending to callback: {payload}");
            if call.send(payload.clone()).await.is_err() {
                debug!("Callback for {topic} is gone");
            }
        }
    }

    pub fn get_topics(&self) -> Vec<String> {
        return self.calls.keys().cloned().collect();
    }
}

lazy_static! {
    pub static ref CALLBACKS: RwLock<Callbacks> = RwLock::new(Callbacks::new());
    pub static ref APP_STATUS: RwLock<AppStatus> = RwLock::new(AppStatus::new());
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> (Self, Sender<Transmission>) {
        let (mtx,mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions   = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        // Spawn a new thread to drive the connection and dispatch incoming messages
        let reconnect_c = client.clone();
        tokio::spawn( async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = String::from_utf8_lossy(&p.payload).to_string();
                        debug!("Received MQTT message on {}: {payload:?}", p.topic);

                        APP_STATUS.write().await.mqtt_health.last_message_received = Some(Instant::now());

                        let callback = CALLBACKS.read().await;
                        callback.send(&p.topic, payload).await;
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected, resubscribing everything");
                        {
                            let mut app_status = APP_STATUS.write().await;
                            app_status.mqtt_health.status = MqttConnectionStatus::Connected;
                            app_status.mqtt_health.last_connected = Some(Instant::now());
                        }

                        /* We are connected resubscribe to everything */
                        let topics = CALLBACKS.read().await.get_topics();
                        for topic in topics {
                            /* Move the resubscription to it's own thread */
                            let client_clone = reconnect_c.clone();
                            tokio::spawn(async move {
                                if let Err(e) = client_clone.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                                    error!("Resubscribing {topic} failed: {e}");
                                }
                            });
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        {
                            let mut app_status = APP_STATUS.write().await;
                            app_status.mqtt_health.status = MqttConnectionStatus::Error(e.to_string());
                            app_status.mqtt_health.connection_attempts += 1;
                        }
                        /* rumqttc reconnects on the next poll, do not spin on a dead broker */
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return (MqttManager {
            client: client,
            rx: mrx,
            exit_thread: false,
        }, mtx);
    }

    async fn publish(&self, topic: String, qos: QoS, retain: bool, payload: String) {
        match self.client.publish(topic, qos, retain, payload).await {
            Err(e) => { error!("Error publishing: {}", e); },
            Ok(_) => {
                debug!("Published successfully");
                APP_STATUS.write().await.mqtt_health.last_message_sent = Some(Instant::now());
            }
        }
    }

    pub async fn start_thread(&mut self) {

        // Handle all the outgoing traffic
        while !self.exit_thread {
            let Some(transmission) = self.rx.recv().await else {
                debug!("Reading returned none, we exit now");
                self.exit_thread = true;
                continue;
            };

            match transmission {
                Transmission::AutoDiscovery(disc) => {
                    match serde_json::to_string(&disc) {
                        Ok(payload) => self.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, payload).await,
                        Err(e) => error!("Unable to serialize discovery for {}: {e}", disc.get_dev_id()),
                    }
                }
                Transmission::Subscribe(subscribe_data) =>  {
                    let topic = format!("{BASE_TOPIC}/{}", subscribe_data.topic);
                    if self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await.is_ok() {
                        CALLBACKS.write().await.insert(topic.clone(), subscribe_data.sender);
                        info!("Registered Callback {topic}");
                    }
                },
                Transmission::Publish(publish_data) => {
                    self.publish(
                        publish_data.topic,
                        qos_from(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload
                    ).await;
                },
            };
        }

        info!("MQTT thread exit");
    }
}

pub async fn get_mqtt_health_status() -> MqttHealthStatus {
    APP_STATUS.read().await.mqtt_health.clone()
}

pub async fn get_app_status() -> AppStatus {
    APP_STATUS.read().await.clone()
}

pub async fn publish_uptime(mqtt_sender: &Sender<Transmission>) {
    let app_status = get_app_status().await;

    let uptime_publish = PublishData {
        topic: format!("{BASE_TOPIC}/mgt/uptime"),
        payload: app_status.uptime_seconds().to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(uptime_publish)).await;
}

pub async fn publish_device_count(mqtt_sender: &Sender<Transmission>, count: usize) {
    let count_publish = PublishData {
        topic: format!("{BASE_TOPIC}/mgt/ups/count"),
        payload: count.to_string(),
        qos: 1,
        retain: true,
    };
    let _ = mqtt_sender.send(Transmission::Publish(count_publish)).await;
}
