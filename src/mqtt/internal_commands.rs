use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::sync::Notify;
use crate::mqtt::{get_mqtt_health_status, PublishData, SubscribeData, Transmission, BASE_TOPIC};

#[derive(Debug, PartialEq)]
pub enum Command {
    Restart,
    Refresh,
    Status,
}

impl Command {
    pub fn parse(payload: &str) -> Option<Command> {
        match payload.trim() {
            "restart" => Some(Command::Restart),
            "refresh" => Some(Command::Refresh),
            "status" => Some(Command::Status),
            _ => None,
        }
    }
}

pub struct CommandHandler {
   sender: Sender<Transmission>,
   wake: Arc<Notify>,
}

impl CommandHandler {

  pub fn new(sender: Sender<Transmission>, wake: Arc<Notify>) -> Self {
    return CommandHandler {
      sender: sender,
      wake: wake,
    }
  }

  fn discovery_json() -> String {
    /* We are not using the HaDiscover and HaComponent stuff here because we know the json */
    return format!(r###"
        {{
          "dev": {{
            "ids":"nut2mqtt_management",
            "name":"nut2mqtt Bridge",
            "manufacturer":"nut2mqtt",
            "model":"Bridge"
          }},
          "o": {{
            "name":"nut2mqtt",
            "sw_version":"{version}",
            "support_url":"https://networkupstools.org"
          }},
          "cmps":{{
            "restart": {{
              "p":"button",
              "device_class":"restart",
              "name":"restart",
              "object_id":"bridge_restart",
              "payload_press":"restart",
              "unique_id":"nut2mqtt_management_bridge_restart",
              "command_topic": "{base}/mgt/command"
            }},
            "refresh": {{
              "p":"button",
              "name":"refresh",
              "object_id":"bridge_refresh",
              "payload_press":"refresh",
              "unique_id":"nut2mqtt_management_bridge_refresh",
              "command_topic": "{base}/mgt/command"
            }},
            "uptime": {{
              "p":"sensor",
              "name":"uptime",
              "object_id":"uptime",
              "unique_id":"nut2mqtt_management_uptime",
              "state_topic": "{base}/mgt/uptime",
              "state_class": "measurement",
              "unit_of_measurement": "s"
            }},
            "ups_count": {{
              "p":"sensor",
              "name":"UPS devices",
              "object_id":"ups_count",
              "unique_id":"nut2mqtt_management_ups_count",
              "state_topic": "{base}/mgt/ups/count",
              "state_class": "measurement"
            }}
          }}
        }}"###, version = env!("CARGO_PKG_VERSION"), base = BASE_TOPIC);
  }

  /// Returns false once the bridge should shut down
  pub async fn handle(&self, payload: &str) -> bool {
      match Command::parse(payload) {
          Some(Command::Restart) => {
              /* if we exit that thread the rest will exit, too */
              info!("Request to shutdown received");
              return false;
          }
          Some(Command::Refresh) => {
              info!("Requesting an immediate poll of all UPS devices");
              self.wake.notify_one();
          }
          Some(Command::Status) => {
              let health = get_mqtt_health_status().await;
              let payload = serde_json::json!({
                  "status": health.status,
                  "connection_attempts": health.connection_attempts,
                  "seconds_since_connect": health.last_connected.map(|t| t.elapsed().as_secs()),
                  "seconds_since_sent": health.last_message_sent.map(|t| t.elapsed().as_secs()),
                  "seconds_since_received": health.last_message_received.map(|t| t.elapsed().as_secs()),
              }).to_string();
              let _ = self.sender.send(Transmission::Publish(PublishData {
                  topic: format!("{BASE_TOPIC}/mgt/status"),
                  payload,
                  qos: 0,
                  retain: false,
              })).await;
          }
          None => warn!("Unknown command {payload}"),
      }
      return true;
  }

  pub async fn start_thread(&self) {
        info!("Starting CommandHandler thread");
        /* We need to subscribe to an MQTT topic and wait for data to fill our buffers */
        let (sender, mut receiver) = tokio::sync::mpsc::channel(10);

        let register = Transmission::Subscribe(SubscribeData{
            topic: "mgt/command".to_string(),
            sender
        });

        let _ = self.sender.send(register).await;

        let p = Transmission::Publish(PublishData {
            topic: "homeassistant/device/nut2mqtt_bridge/config".to_string(),
            payload: CommandHandler::discovery_json(),
            qos: 0,
            retain: true,
        });

        /* Send our data */
        let _ = self.sender.send(p).await;

        info!("Start waiting for command messages");
        while let Some(c) = receiver.recv().await {
            info!("Received command {c}");
            if !self.handle(&c).await {
                return;
            }
        }
  }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("restart"), Some(Command::Restart));
        assert_eq!(Command::parse(" refresh\n"), Some(Command::Refresh));
        assert_eq!(Command::parse("status"), Some(Command::Status));
        assert_eq!(Command::parse("GET"), None);
    }

    #[test]
    fn test_discovery_is_valid_json() {
        let v: serde_json::Value = serde_json::from_str(&CommandHandler::discovery_json()).unwrap();
        assert_eq!(v["cmps"]["refresh"]["command_topic"], "nut2mqtt/mgt/command");
        assert_eq!(v["cmps"]["ups_count"]["state_topic"], "nut2mqtt/mgt/ups/count");
    }

    #[tokio::test]
    async fn test_refresh_wakes_poller() {
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        let wake = Arc::new(Notify::new());
        let handler = CommandHandler::new(tx, wake.clone());

        assert!(handler.handle("refresh").await);
        tokio::time::timeout(std::time::Duration::from_secs(1), wake.notified()).await.unwrap();

        assert!(handler.handle("bogus").await);
        assert!(!handler.handle("restart").await);
    }

    #[tokio::test]
    async fn test_status_reports_mqtt_health() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let handler = CommandHandler::new(tx, Arc::new(Notify::new()));

        assert!(handler.handle("status").await);
        match rx.recv().await.unwrap() {
            Transmission::Publish(p) => {
                assert_eq!(p.topic, "nut2mqtt/mgt/status");
                let v: serde_json::Value = serde_json::from_str(&p.payload).unwrap();
                assert!(v.get("status").is_some());
                assert!(v.get("seconds_since_received").is_some());
            }
            _ => panic!("expected a status publish"),
        }
    }

    #[tokio::test]
    async fn test_subscribes_and_announces() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(10);
        let handler = CommandHandler::new(tx, Arc::new(Notify::new()));
        let task = tokio::spawn(async move { handler.start_thread().await });

        let sender = match rx.recv().await.unwrap() {
            Transmission::Subscribe(s) => {
                assert_eq!(s.topic, "mgt/command");
                s.sender
            }
            _ => panic!("expected a subscription first"),
        };
        match rx.recv().await.unwrap() {
            Transmission::Publish(p) => assert_eq!(p.topic, "homeassistant/device/nut2mqtt_bridge/config"),
            _ => panic!("expected the bridge discovery"),
        }

        sender.send("restart".to_string()).await.unwrap();
        task.await.unwrap();
    }
}
