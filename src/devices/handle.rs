// devices/handle.rs
use super::{ColorEncoder, DataPoints, DeviceInfo, DpValue, Transport, TransportError, dps};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub dps: DataPoints,
    pub fetched_at: DateTime<Utc>,
}

/// In-process representative of one bulb.
///
/// Every mutating call is followed by exactly one status refresh, whether the
/// command went through or not. The cache is only ever replaced as a whole.
pub struct DeviceHandle {
    info: DeviceInfo,
    transport: Arc<dyn Transport>,
    encode_color: ColorEncoder,
    timeout: Duration,
    status_cache: RwLock<Option<StatusSnapshot>>,
}

impl DeviceHandle {
    pub fn new(info: DeviceInfo, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            info,
            transport,
            encode_color: super::hsv_to_tuya_hex,
            timeout,
            status_cache: RwLock::new(None),
        }
    }

    pub fn with_color_encoder(mut self, encode_color: ColorEncoder) -> Self {
        self.encode_color = encode_color;
        self
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_online(&self) -> bool {
        self.transport.is_online()
    }

    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.status_cache.read().await.as_ref().map(|s| s.fetched_at)
    }

    pub async fn turn_on(&self) -> bool {
        self.write("turn_on", dps::POWER, true.into()).await
    }

    pub async fn turn_off(&self) -> bool {
        self.write("turn_off", dps::POWER, false.into()).await
    }

    /// The value is passed through as is; range checks belong to the device.
    pub async fn set_brightness(&self, brightness: i64) -> bool {
        self.write("set_brightness", dps::BRIGHTNESS, brightness.into())
            .await
    }

    pub async fn set_temperature(&self, temperature: i64) -> bool {
        self.write("set_temperature", dps::TEMPERATURE, temperature.into())
            .await
    }

    pub async fn set_color(&self, h: i32, s: i32, v: i32) -> bool {
        let color = (self.encode_color)(h, s, v);
        self.write("set_color", dps::COLOR, color.into()).await
    }

    pub async fn set_mode(&self, mode: &str) -> bool {
        self.write("set_mode", dps::MODE, mode.into()).await
    }

    /// Returns the cached status, fetching it once if nothing is cached.
    pub async fn get_status(&self) -> Option<DataPoints> {
        if let Some(snapshot) = self.status_cache.read().await.as_ref() {
            return Some(snapshot.dps.clone());
        }
        self.refresh_status().await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    async fn write(&self, action: &'static str, dp: &str, value: DpValue) -> bool {
        debug!(device_id = %self.info.id, action, dp, ?value, "Sending command");
        let result = self.bounded(self.transport.send_command(dp, value)).await;
        if let Err(e) = &result {
            warn!(device_id = %self.info.id, action, error = %e, "Command failed");
        }

        self.refresh_status().await;
        result.is_ok()
    }

    async fn refresh_status(&self) -> Option<DataPoints> {
        let snapshot = match self.bounded(self.transport.read_status()).await {
            Ok(dps) => {
                metrics::record_refresh(true);
                Some(StatusSnapshot {
                    dps,
                    fetched_at: Utc::now(),
                })
            }
            Err(e) => {
                metrics::record_refresh(false);
                warn!(device_id = %self.info.id, error = %e, "Status refresh failed");
                None
            }
        };

        let dps = snapshot.as_ref().map(|s| s.dps.clone());
        *self.status_cache.write().await = snapshot;
        dps
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.timeout)))
    }
}
