use nut2mqtt::{mqtt::{internal_commands::CommandHandler, publish_uptime}, Config, MqttManager, NutManager};
use tokio::task::JoinHandle;
use std::time::Duration;
use log::{error, info};


#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let default_filter =  std::env::var("NUT2MQTT_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    // every part sends its MQTT traffic through this channel
    let (mut mqtt, tx) = MqttManager::new(&config.mqtt);

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    // Start polling the NUT server
    let mut nut = NutManager::new(tx.clone(), config.nut.clone(), config.mqtt.ha_enabled);
    let wake = nut.get_wake_handle();
    threads.push(tokio::spawn(async move {
        nut.start_thread().await;
    }));

    /* Periodic uptime publishing */
    let uptime_sender = tx.clone();
    threads.push(tokio::spawn(async move {
        // Publish immediately on startup
        publish_uptime(&uptime_sender).await;

        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.tick().await; // Skip first immediate tick since we already published

        loop {
            interval.tick().await;
            publish_uptime(&uptime_sender).await;
        }
    }));

    /* Last but not least start our command handling */
    let command = CommandHandler::new(tx, wake);
    threads.push(tokio::spawn(async move {
        command.start_thread().await;
    }));


    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut kill_all_tasks = false;
        for task in threads.iter() {
            if task.is_finished() {
                kill_all_tasks = true;
            }
        }

        if kill_all_tasks == true {
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
    Ok(())
}
