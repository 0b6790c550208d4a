use crate::models::{DeviceRegistry, RawTelemetry};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod client;
pub mod normalizer;

pub use client::NutClient;

#[derive(Error, Debug)]
pub enum NutError {
    #[error("Unable to connect to NUT server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on NUT connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not connected to a NUT server")]
    NotConnected,
    #[error("NUT server answered with ERR {0}")]
    Server(String),
    #[error("Unexpected answer from NUT server: {0}")]
    Protocol(String),
    #[error("Connection closed by NUT server")]
    Closed,
    #[error("NUT request timed out after {0:?}")]
    Timeout(Duration),
}

impl NutError {
    /// Whether the connection is unusable after this error
    pub fn drops_connection(&self) -> bool {
        !matches!(self, NutError::Server(_) | NutError::NotConnected)
    }
}

/// Lifecycle notifications emitted by a telemetry source
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Ready,
    Close,
    Error(String),
}

/// A persistent connection to a UPS telemetry server.
///
/// `connect` only starts an attempt; its outcome is reported through
/// [`LinkEvent`]s on the channel the source was created with.
pub trait TelemetrySource: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = ()> + Send;

    fn list_devices(&self) -> impl Future<Output = Result<DeviceRegistry, NutError>> + Send;

    fn get_variables(&self, key: &str) -> impl Future<Output = Result<RawTelemetry, NutError>> + Send;
}
