use crate::commands::Action;
use crate::devices::ws_link::DeviceLinks;
use crate::devices::{DataPoints, DpValue};
use crate::fleet::FleetRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Messages exchanged with bulbs over `/ws/device`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    DeviceRegistration { device_id: String, local_key: String },
    DeviceRegistered { device_id: String },
    SetDataPoint { request_id: Uuid, dp: String, value: DpValue },
    QueryStatus { request_id: Uuid },
    Ack { request_id: Uuid },
    Status { request_id: Uuid, dps: DataPoints },
    Error {
        request_id: Option<Uuid>,
        message: String,
        code: u16,
    },
}

impl WsMessage {
    /// The request a device reply answers, if any.
    pub fn reply_to(&self) -> Option<Uuid> {
        match self {
            WsMessage::Ack { request_id } | WsMessage::Status { request_id, .. } => {
                Some(*request_id)
            }
            WsMessage::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub online: bool,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_refreshed: Option<DateTime<Utc>>,
}

fn no_blank_ids(ids: &[String]) -> Result<(), ValidationError> {
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ValidationError::new("blank_bulb_id"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BulbSelection {
    #[validate(custom(function = "no_blank_ids"))]
    pub bulb_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ColorRequest {
    #[validate(custom(function = "no_blank_ids"))]
    pub bulb_ids: Vec<String>,
    pub h: i32,
    pub s: i32,
    pub v: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct BatchRequest {
    #[validate(custom(function = "no_blank_ids"))]
    pub bulb_ids: Vec<String>,
    pub action: Action,
}

pub struct AppState {
    pub fleet: Arc<FleetRegistry>,
    pub links: Arc<DeviceLinks>,
}

impl AppState {
    pub fn new(fleet: Arc<FleetRegistry>, links: Arc<DeviceLinks>) -> Self {
        Self { fleet, links }
    }
}
