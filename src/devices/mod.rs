// devices/mod.rs
mod color;
mod handle;
mod virtual_bulb;
pub mod ws_link;

#[cfg(test)]
pub mod testing;

pub use color::{ColorEncoder, hsv_to_tuya_hex};
pub use handle::DeviceHandle;
pub use virtual_bulb::VirtualConnector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Data point identifiers of the supported bulb model.
pub mod dps {
    pub const POWER: &str = "20";
    pub const MODE: &str = "21";
    pub const TEMPERATURE: &str = "22";
    pub const BRIGHTNESS: &str = "23";
    pub const COLOR: &str = "24";
}

/// A single data point value as reported by a bulb.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum DpValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for DpValue {
    fn from(value: bool) -> Self {
        DpValue::Bool(value)
    }
}

impl From<i64> for DpValue {
    fn from(value: i64) -> Self {
        DpValue::Int(value)
    }
}

impl From<&str> for DpValue {
    fn from(value: &str) -> Self {
        DpValue::Str(value.to_string())
    }
}

impl From<String> for DpValue {
    fn from(value: String) -> Self {
        DpValue::Str(value)
    }
}

/// Full status of a bulb keyed by data point identifier.
pub type DataPoints = BTreeMap<String, DpValue>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device is offline")]
    Offline,
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("device rejected the command: {0}")]
    Rejected(String),
    #[error("link error: {0}")]
    Link(String),
}

/// The wire capability a device handle drives.
///
/// Implementations only need to tell success from failure; bounding the call
/// duration is done by the handle.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_command(&self, dp: &str, value: DpValue) -> Result<(), TransportError>;

    async fn read_status(&self) -> Result<DataPoints, TransportError>;

    fn is_online(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Builds the transport for a configured device.
pub trait Connector: Send + Sync {
    fn connect(&self, device: &DeviceInfo) -> Arc<dyn Transport>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub local_key: String,
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ip_address", &self.ip_address)
            .field("local_key", &"<redacted>")
            .finish()
    }
}
