// devices/ws_link.rs
use super::{Connector, DataPoints, DeviceInfo, DpValue, Transport, TransportError};
use crate::models::WsMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

const OUTBOX_CAPACITY: usize = 32;

type Pending = Arc<DashMap<Uuid, oneshot::Sender<WsMessage>>>;

struct Link {
    connection_id: Uuid,
    outbox: mpsc::Sender<WsMessage>,
    pending: Pending,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.pending.clear();
    }
}

/// Live WebSocket connections of bulbs, keyed by device id.
///
/// Dropping a link drops its outbox and every pending request, which
/// wakes all waiters with [`TransportError::Offline`].
#[derive(Default)]
pub struct DeviceLinks {
    links: DashMap<String, Link>,
}

/// Removes a pending request once its waiter is gone, answered or not.
struct PendingGuard<'a> {
    pending: &'a Pending,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl DeviceLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection for `device_id`, replacing any older one.
    pub fn attach(&self, device_id: &str) -> (Uuid, mpsc::Receiver<WsMessage>) {
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let connection_id = Uuid::new_v4();
        let link = Link {
            connection_id,
            outbox,
            pending: Arc::new(DashMap::new()),
        };
        if self.links.insert(device_id.to_string(), link).is_some() {
            info!(device_id, "Device reconnected, replacing previous link");
        }
        (connection_id, rx)
    }

    /// Drops the link unless a newer connection has taken its place.
    pub fn detach(&self, device_id: &str, connection_id: Uuid) -> bool {
        self.links
            .remove_if(device_id, |_, link| link.connection_id == connection_id)
            .is_some()
    }

    pub fn close(&self, device_id: &str) {
        if self.links.remove(device_id).is_some() {
            info!(device_id, "Closed device link");
        }
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.links.contains_key(device_id)
    }

    /// Hands a device reply to whoever is waiting for it.
    pub fn complete(&self, device_id: &str, reply: WsMessage) {
        let Some(request_id) = reply.reply_to() else {
            debug!(device_id, ?reply, "Ignoring unsolicited device message");
            return;
        };
        let waiter = self
            .links
            .get(device_id)
            .and_then(|link| link.pending.remove(&request_id))
            .map(|(_, waiter)| waiter);

        match waiter {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!(device_id, %request_id, "Reply arrived for an abandoned request"),
        }
    }

    pub async fn request(
        &self,
        device_id: &str,
        build: impl FnOnce(Uuid) -> WsMessage,
    ) -> Result<WsMessage, TransportError> {
        let (outbox, pending) = {
            let link = self.links.get(device_id).ok_or(TransportError::Offline)?;
            (link.outbox.clone(), Arc::clone(&link.pending))
        };

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id, tx);
        let _guard = PendingGuard {
            pending: &pending,
            request_id,
        };

        outbox
            .send(build(request_id))
            .await
            .map_err(|_| TransportError::Offline)?;
        drop(outbox);
        rx.await.map_err(|_| TransportError::Offline)
    }

    #[cfg(test)]
    fn pending_requests(&self, device_id: &str) -> usize {
        self.links
            .get(device_id)
            .map(|link| link.pending.len())
            .unwrap_or_default()
    }
}

/// Transport that talks to a bulb through its WebSocket link.
pub struct WsTransport {
    device_id: String,
    links: Arc<DeviceLinks>,
}

impl WsTransport {
    pub fn new(device_id: impl Into<String>, links: Arc<DeviceLinks>) -> Self {
        Self {
            device_id: device_id.into(),
            links,
        }
    }
}

fn unexpected(reply: WsMessage) -> TransportError {
    match reply {
        WsMessage::Error { message, .. } => TransportError::Rejected(message),
        other => TransportError::Link(format!("unexpected reply: {other:?}")),
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_command(&self, dp: &str, value: DpValue) -> Result<(), TransportError> {
        let reply = self
            .links
            .request(&self.device_id, |request_id| WsMessage::SetDataPoint {
                request_id,
                dp: dp.to_string(),
                value,
            })
            .await?;

        match reply {
            WsMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn read_status(&self) -> Result<DataPoints, TransportError> {
        let reply = self
            .links
            .request(&self.device_id, |request_id| WsMessage::QueryStatus {
                request_id,
            })
            .await?;

        match reply {
            WsMessage::Status { dps, .. } => Ok(dps),
            other => Err(unexpected(other)),
        }
    }

    fn is_online(&self) -> bool {
        self.links.is_connected(&self.device_id)
    }

    async fn close(&self) {
        self.links.close(&self.device_id);
    }
}

pub struct LinkConnector {
    links: Arc<DeviceLinks>,
}

impl LinkConnector {
    pub fn new(links: Arc<DeviceLinks>) -> Self {
        Self { links }
    }
}

impl Connector for LinkConnector {
    fn connect(&self, device: &DeviceInfo) -> Arc<dyn Transport> {
        Arc::new(WsTransport::new(&device.id, Arc::clone(&self.links)))
    }
}
