// devices/testing.rs
use super::{Connector, DataPoints, DeviceInfo, DpValue, Transport, TransportError, dps};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn device_info(id: &str) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: format!("Bulb {id}"),
        ip_address: "192.168.1.10".to_string(),
        local_key: "0123456789abcdef".to_string(),
    }
}

/// Scriptable transport that counts calls and tracks overlapping reads.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<DataPoints>,
    failing_sends: AtomicBool,
    failing_reads: AtomicBool,
    panics: AtomicBool,
    send_delay: Duration,
    read_delay: Duration,
    pub sends: AtomicUsize,
    pub reads: AtomicUsize,
    reads_in_flight: AtomicUsize,
    pub max_reads_in_flight: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        let state = DataPoints::from([(dps::POWER.to_string(), DpValue::Bool(false))]);
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn fail_sends(&self, fail: bool) {
        self.failing_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on_send(&self) {
        self.panics.store(true, Ordering::SeqCst);
    }

    pub fn value(&self, dp: &str) -> Option<DpValue> {
        self.state.lock().unwrap().get(dp).cloned()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_command(&self, dp: &str, value: DpValue) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.send_delay).await;
        if self.panics.load(Ordering::SeqCst) {
            panic!("fake transport blew up");
        }
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("scripted failure".to_string()));
        }
        self.state.lock().unwrap().insert(dp.to_string(), value);
        Ok(())
    }

    async fn read_status(&self) -> Result<DataPoints, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_reads_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(self.read_delay).await;
        self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(TransportError::Link("scripted failure".to_string()));
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared [`FakeTransport`] per device id.
#[derive(Default)]
pub struct FakeConnector {
    transports: Mutex<HashMap<String, Arc<FakeTransport>>>,
    read_delay: Duration,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn transport(&self, device_id: &str) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .unwrap()
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(FakeTransport::new().with_read_delay(self.read_delay)))
            .clone()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, device: &DeviceInfo) -> Arc<dyn Transport> {
        self.transport(&device.id)
    }
}
