// fleet/mod.rs
use crate::commands::{self, Action, CommandResults};
use crate::devices::{Connector, DataPoints, DeviceHandle, DeviceInfo};
use crate::error::AppError;
use crate::models::DeviceSummary;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub type FleetStatus = BTreeMap<String, Option<DataPoints>>;

/// Every bulb the gateway knows about, keyed by device id.
///
/// Membership is fixed once startup has registered the configured devices.
/// `scan` serialises whole-fleet status reads against each other only;
/// single-device actions never wait on it.
pub struct FleetRegistry {
    devices: DashMap<String, Arc<DeviceHandle>>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
    scan: Mutex<()>,
}

impl FleetRegistry {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self {
            devices: DashMap::new(),
            connector,
            timeout,
            scan: Mutex::new(()),
        }
    }

    /// Adds a bulb. An existing entry with the same id is replaced and returned.
    pub fn register(
        &self,
        device_id: &str,
        ip_address: &str,
        local_key: &str,
        name: &str,
    ) -> Option<Arc<DeviceHandle>> {
        let info = DeviceInfo {
            id: device_id.to_string(),
            name: name.to_string(),
            ip_address: ip_address.to_string(),
            local_key: local_key.to_string(),
        };
        let transport = self.connector.connect(&info);
        let handle = Arc::new(DeviceHandle::new(info, transport, self.timeout));

        let previous = self.devices.insert(device_id.to_string(), handle);
        if previous.is_some() {
            warn!(device_id, "Device registered twice, keeping the latest entry");
        } else {
            info!(device_id, name, "Registered device");
        }
        previous
    }

    pub fn resolve(&self, device_id: &str) -> Option<Arc<DeviceHandle>> {
        self.devices.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn handles(&self) -> Vec<Arc<DeviceHandle>> {
        let mut handles: Vec<_> = self
            .devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        handles.sort_by(|a, b| a.id().cmp(b.id()));
        handles
    }

    pub async fn list_devices(&self) -> Vec<DeviceSummary> {
        let mut devices = Vec::with_capacity(self.len());
        for handle in self.handles() {
            let info = handle.info();
            devices.push(DeviceSummary {
                id: info.id.clone(),
                name: info.name.clone(),
                ip_address: info.ip_address.clone(),
                online: handle.is_online(),
                last_refreshed: handle.last_refreshed().await,
            });
        }
        devices
    }

    /// Reads every bulb's status concurrently, one scan at a time.
    pub async fn get_all_status(&self) -> FleetStatus {
        let _scan = self.scan.lock().await;
        let handles = self.handles();
        let statuses = join_all(handles.iter().map(|handle| handle.get_status())).await;

        handles
            .iter()
            .map(|handle| handle.id().to_string())
            .zip(statuses)
            .collect()
    }

    pub async fn get_fleet_status(&self) -> FleetStatus {
        self.get_all_status().await
    }

    /// `Err` for an unknown id, `Ok(None)` when the bulb could not be read.
    pub async fn get_device_status(&self, device_id: &str) -> Result<Option<DataPoints>, AppError> {
        let handle = self
            .resolve(device_id)
            .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))?;
        Ok(handle.get_status().await)
    }

    pub async fn run_batch_action(&self, device_ids: &[String], action: &Action) -> CommandResults {
        commands::run_batch_action(self, device_ids, action).await
    }

    pub fn command_timeout(&self) -> Duration {
        self.timeout
    }

    /// Closes every transport; called once on shutdown.
    pub async fn shutdown(&self) {
        join_all(self.handles().iter().map(|handle| handle.close())).await;
        info!(devices = self.len(), "Closed all device transports");
    }
}
