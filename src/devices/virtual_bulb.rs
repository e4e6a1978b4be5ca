// virtual_bulb.rs
use super::{
    Connector, DataPoints, DeviceInfo, DpValue, Transport, TransportError, dps, hsv_to_tuya_hex,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

const MODES: [&str; 4] = ["white", "colour", "scene", "music"];

/// A bulb that lives in memory and validates writes like the real firmware.
pub struct VirtualBulb {
    dps: RwLock<DataPoints>,
}

impl VirtualBulb {
    pub fn new() -> Self {
        let dps = DataPoints::from([
            (dps::POWER.to_string(), DpValue::Bool(false)),
            (dps::MODE.to_string(), DpValue::from("white")),
            (dps::TEMPERATURE.to_string(), DpValue::Int(500)),
            (dps::BRIGHTNESS.to_string(), DpValue::Int(500)),
            (dps::COLOR.to_string(), DpValue::from(hsv_to_tuya_hex(0, 1000, 1000))),
        ]);
        Self {
            dps: RwLock::new(dps),
        }
    }
}

impl Default for VirtualBulb {
    fn default() -> Self {
        Self::new()
    }
}

fn check(dp: &str, value: &DpValue) -> Result<(), TransportError> {
    let rejected = |reason: String| Err(TransportError::Rejected(reason));
    match (dp, value) {
        (dps::POWER, DpValue::Bool(_)) => Ok(()),
        (dps::BRIGHTNESS, DpValue::Int(v)) if !(10..=1000).contains(v) => {
            rejected(format!("brightness {v} outside 10..=1000"))
        }
        (dps::TEMPERATURE, DpValue::Int(v)) if !(0..=1000).contains(v) => {
            rejected(format!("temperature {v} outside 0..=1000"))
        }
        (dps::BRIGHTNESS | dps::TEMPERATURE, DpValue::Int(_)) => Ok(()),
        (dps::MODE, DpValue::Str(mode)) if MODES.contains(&mode.as_str()) => Ok(()),
        (dps::MODE, DpValue::Str(mode)) => rejected(format!("unknown mode {mode}")),
        (dps::COLOR, DpValue::Str(color))
            if color.len() == 12 && color.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(())
        }
        (dps::POWER | dps::MODE | dps::TEMPERATURE | dps::BRIGHTNESS | dps::COLOR, _) => {
            rejected(format!("invalid value {value:?} for data point {dp}"))
        }
        _ => rejected(format!("unknown data point {dp}")),
    }
}

#[async_trait]
impl Transport for VirtualBulb {
    async fn send_command(&self, dp: &str, value: DpValue) -> Result<(), TransportError> {
        check(dp, &value)?;
        self.dps.write().await.insert(dp.to_string(), value);
        Ok(())
    }

    async fn read_status(&self) -> Result<DataPoints, TransportError> {
        Ok(self.dps.read().await.clone())
    }
}

pub struct VirtualConnector;

impl Connector for VirtualConnector {
    fn connect(&self, _device: &DeviceInfo) -> Arc<dyn Transport> {
        Arc::new(VirtualBulb::new())
    }
}
