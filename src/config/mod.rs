use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn mqtt_client_name_default() -> String { return "nut2mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn nut_host_default() -> String { return "localhost".to_string() }
fn nut_port_default() -> u16 { return 3493 }
fn nut_poll_interval_default() -> u64 { return 60 }
fn nut_connect_interval_default() -> u64 { return 5 }
fn nut_low_batt_threshold_default() -> f64 { return 40.0 }
fn nut_request_timeout_default() -> u64 { return 10 }
fn nut_accessory_cache_default() -> Option<String> { return Some("accessories.json".to_string()) }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct NutConfig {
    #[serde(default="nut_host_default")]
    pub host: String,
    #[serde(default="nut_port_default")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /* All intervals are in seconds */
    #[serde(default="nut_poll_interval_default")]
    pub poll_interval: u64,
    #[serde(default="nut_connect_interval_default")]
    pub connect_interval: u64,
    #[serde(default="nut_low_batt_threshold_default")]
    pub low_batt_threshold: f64,
    #[serde(default="nut_request_timeout_default")]
    pub request_timeout: u64,
    /* Set to ~ to keep the accessory directory in memory only */
    #[serde(default="nut_accessory_cache_default")]
    pub accessory_cache: Option<String>,
}

impl Default for NutConfig {
    fn default() -> Self {
        return NutConfig {
            host: nut_host_default(),
            port: nut_port_default(),
            username: None,
            password: None,
            poll_interval: nut_poll_interval_default(),
            connect_interval: nut_connect_interval_default(),
            low_batt_threshold: nut_low_batt_threshold_default(),
            request_timeout: nut_request_timeout_default(),
            accessory_cache: nut_accessory_cache_default(),
        };
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub nut: NutConfig,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        config.validate()?;
        return Ok(config);
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        return Config::from_yaml(&contents);
    }

    /// Load from `$NUT2MQTT_CONFIG`, `config/nut2mqtt.yaml` or `nut2mqtt.yaml`
    pub fn load() -> Result<Self, ConfigError> {
        let path = Config::locate();
        info!("Loading configuration from {}", path.display());
        return Config::from_file(&path);
    }

    fn locate() -> PathBuf {
        if let Ok(path) = std::env::var("NUT2MQTT_CONFIG") {
            return PathBuf::from(path);
        }

        /* Check for the two default paths of the config file */
        let candidate = PathBuf::from("config/nut2mqtt.yaml");
        if candidate.exists() {
            return candidate;
        }

        debug!("No config/nut2mqtt.yaml, falling back to nut2mqtt.yaml");
        return PathBuf::from("nut2mqtt.yaml");
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nut = &self.nut;

        if nut.host.trim().is_empty() {
            return Err(ConfigError::Invalid("nut.host must not be empty".to_string()));
        }
        if nut.poll_interval == 0 {
            return Err(ConfigError::Invalid("nut.poll_interval must be at least 1 second".to_string()));
        }
        if nut.connect_interval == 0 {
            return Err(ConfigError::Invalid("nut.connect_interval must be at least 1 second".to_string()));
        }
        if nut.request_timeout == 0 {
            return Err(ConfigError::Invalid("nut.request_timeout must be at least 1 second".to_string()));
        }
        if !(0.0..=100.0).contains(&nut.low_batt_threshold) {
            return Err(ConfigError::Invalid(format!(
                "nut.low_batt_threshold must be between 0 and 100, got {}",
                nut.low_batt_threshold
            )));
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
mqtt:
  host: broker.local
  port: 1883
  user: ""
  pass: ""
  ha_enabled: true
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.mqtt.client_name, "nut2mqtt");
        assert_eq!(config.nut.host, "localhost");
        assert_eq!(config.nut.port, 3493);
        assert_eq!(config.nut.poll_interval, 60);
        assert_eq!(config.nut.connect_interval, 5);
        assert_eq!(config.nut.request_timeout, 10);
        assert_eq!(config.nut.low_batt_threshold, 40.0);
        assert_eq!(config.nut.accessory_cache.as_deref(), Some("accessories.json"));
        assert!(config.nut.username.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{MINIMAL}nut:\n  host: nas\n  port: 3494\n  username: monitor\n  password: secret\n  poll_interval: 30\n  low_batt_threshold: 25\n  accessory_cache: ~\n"
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.nut.host, "nas");
        assert_eq!(config.nut.port, 3494);
        assert_eq!(config.nut.username.as_deref(), Some("monitor"));
        assert_eq!(config.nut.poll_interval, 30);
        assert_eq!(config.nut.low_batt_threshold, 25.0);
        assert!(config.nut.accessory_cache.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        for nut in [
            "nut:\n  poll_interval: 0\n",
            "nut:\n  connect_interval: 0\n",
            "nut:\n  request_timeout: 0\n",
            "nut:\n  low_batt_threshold: 101\n",
            "nut:\n  low_batt_threshold: -1\n",
            "nut:\n  host: \"\"\n",
        ] {
            let result = Config::from_yaml(&format!("{MINIMAL}{nut}"));
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "accepted {nut}");
        }
    }

    #[test]
    fn test_parse_error() {
        let result = Config::from_yaml("mqtt: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nut2mqtt.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.mqtt.host, "broker.local");

        let missing = Config::from_file(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
