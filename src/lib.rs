//! Bridge between a Network UPS Tools server and MQTT
//!
//! This library polls every UPS a NUT server reports, normalizes the raw
//! variables into a fixed set of accessory characteristics and publishes
//! them over MQTT with Home Assistant discovery.

pub mod accessory;
pub mod config;
pub mod models;
pub mod mqtt;
pub mod nut;
pub mod platform;

// Re-export common types for easier access
pub use models::{ChargingState, ConnectionState, UpsState};
pub use config::{Config, ConfigError};
pub use mqtt::{MqttManager, CALLBACKS};
pub use nut::{NutClient, NutError, TelemetrySource};
pub use platform::{NutManager, PlatformError};
