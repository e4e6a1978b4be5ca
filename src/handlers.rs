// handlers.rs

use crate::{
    commands::{Action, CommandResults},
    devices::{DataPoints, DpValue},
    docs,
    error::AppError,
    fleet::FleetStatus,
    models::{AppState, BatchRequest, BulbSelection, ColorRequest, DeviceSummary, WsMessage},
    utils,
};
use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use validator::Validate;

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::permanent("/docs") }))
        .route("/health", get(health))
        .route("/bulbs", get(list_bulbs))
        .route("/status", get(fleet_status))
        .route("/status/{bulb_id}", get(bulb_status).post(bulb_status))
        .route("/power/on", post(power_on))
        .route("/power/off", post(power_off))
        .route("/brightness/{value}", post(set_brightness))
        .route("/temperature/{value}", post(set_temperature))
        .route("/mode/{mode}", post(set_mode))
        .route("/color", post(set_color))
        .route("/batch", post(run_batch))
        .route("/ws/device", get(handle_device_ws_upgrade))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// List all configured bulbs
#[utoipa::path(get, path = "/bulbs", responses((status = 200, body = [DeviceSummary])))]
pub async fn list_bulbs(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSummary>> {
    Json(state.fleet.list_devices().await)
}

/// Status of every bulb; `null` for bulbs that could not be read
#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, body = BTreeMap<String, Option<BTreeMap<String, DpValue>>>))
)]
pub async fn fleet_status(State(state): State<Arc<AppState>>) -> Json<FleetStatus> {
    Json(state.fleet.get_fleet_status().await)
}

/// Status of one bulb
#[utoipa::path(
    get,
    path = "/status/{bulb_id}",
    params(("bulb_id" = String, Path, description = "Device id")),
    responses(
        (status = 200, body = BTreeMap<String, DpValue>),
        (status = 404, description = "Unknown bulb"),
        (status = 502, description = "Bulb did not answer")
    )
)]
pub async fn bulb_status(
    State(state): State<Arc<AppState>>,
    Path(bulb_id): Path<String>,
) -> Result<Json<DataPoints>, AppError> {
    state
        .fleet
        .get_device_status(&bulb_id)
        .await?
        .map(Json)
        .ok_or(AppError::StatusUnavailable(bulb_id))
}

async fn batch(
    state: &AppState,
    bulb_ids: &[String],
    action: Action,
) -> Result<Json<CommandResults>, AppError> {
    info!(action = action.name(), ?bulb_ids, "Received batch request");
    Ok(Json(state.fleet.run_batch_action(bulb_ids, &action).await))
}

/// Turn on the selected bulbs
#[utoipa::path(post, path = "/power/on", request_body = BulbSelection,
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn power_on(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<BulbSelection>,
) -> Result<Json<CommandResults>, AppError> {
    selection.validate()?;
    batch(&state, &selection.bulb_ids, Action::TurnOn).await
}

/// Turn off the selected bulbs
#[utoipa::path(post, path = "/power/off", request_body = BulbSelection,
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn power_off(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<BulbSelection>,
) -> Result<Json<CommandResults>, AppError> {
    selection.validate()?;
    batch(&state, &selection.bulb_ids, Action::TurnOff).await
}

/// Set the brightness of the selected bulbs
#[utoipa::path(post, path = "/brightness/{value}", request_body = BulbSelection,
    params(("value" = i64, Path)),
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn set_brightness(
    State(state): State<Arc<AppState>>,
    Path(brightness): Path<i64>,
    Json(selection): Json<BulbSelection>,
) -> Result<Json<CommandResults>, AppError> {
    selection.validate()?;
    batch(&state, &selection.bulb_ids, Action::SetBrightness { brightness }).await
}

/// Set the colour temperature of the selected bulbs
#[utoipa::path(post, path = "/temperature/{value}", request_body = BulbSelection,
    params(("value" = i64, Path)),
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn set_temperature(
    State(state): State<Arc<AppState>>,
    Path(temperature): Path<i64>,
    Json(selection): Json<BulbSelection>,
) -> Result<Json<CommandResults>, AppError> {
    selection.validate()?;
    batch(&state, &selection.bulb_ids, Action::SetTemperature { temperature }).await
}

/// Switch the selected bulbs to a work mode
#[utoipa::path(post, path = "/mode/{mode}", request_body = BulbSelection,
    params(("mode" = String, Path, description = "white, colour, scene or music")),
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn set_mode(
    State(state): State<Arc<AppState>>,
    Path(mode): Path<String>,
    Json(selection): Json<BulbSelection>,
) -> Result<Json<CommandResults>, AppError> {
    selection.validate()?;
    batch(&state, &selection.bulb_ids, Action::SetMode { mode }).await
}

/// Set an HSV colour on the selected bulbs
#[utoipa::path(post, path = "/color", request_body = ColorRequest,
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn set_color(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ColorRequest>,
) -> Result<Json<CommandResults>, AppError> {
    request.validate()?;
    let action = Action::SetColor {
        h: request.h,
        s: request.s,
        v: request.v,
    };
    batch(&state, &request.bulb_ids, action).await
}

/// Apply any action to the selected bulbs
#[utoipa::path(post, path = "/batch", request_body = BatchRequest,
    responses((status = 200, body = BTreeMap<String, bool>)))]
pub async fn run_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<CommandResults>, AppError> {
    request.validate()?;
    batch(&state, &request.bulb_ids, request.action).await
}

pub async fn handle_device_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Device connection attempt");
    ws.on_upgrade(|socket| handle_device(socket, state))
}

async fn send_json<S>(sender: &mut S, message: &WsMessage) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let text = serde_json::to_string(message)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Waits for the first registration message and checks it against the fleet.
///
/// Gives up when nothing valid arrives within the fleet command timeout.
async fn await_registration<S, R, E>(
    sender: &mut S,
    receiver: &mut R,
    state: &AppState,
) -> Option<String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let deadline = state.fleet.command_timeout();
    match tokio::time::timeout(deadline, read_registration(sender, receiver, state)).await {
        Ok(device_id) => device_id,
        Err(_) => {
            warn!(?deadline, "Device did not register in time");
            None
        }
    }
}

async fn read_registration<S, R, E>(
    sender: &mut S,
    receiver: &mut R,
    state: &AppState,
) -> Option<String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            _ => continue,
        };

        match serde_json::from_str::<WsMessage>(text.as_str()) {
            Ok(WsMessage::DeviceRegistration {
                device_id,
                local_key,
            }) => {
                let known = state
                    .fleet
                    .resolve(&device_id)
                    .is_some_and(|handle| handle.info().local_key == local_key);
                if known {
                    info!(%device_id, "Device registered");
                    return Some(device_id);
                }

                warn!(%device_id, "Rejected device registration");
                let refusal = WsMessage::Error {
                    request_id: None,
                    message: "Unknown device or wrong key".into(),
                    code: 401,
                };
                let _ = send_json(sender, &refusal).await;
                return None;
            }
            Ok(_) => debug!("Ignoring message sent before registration"),
            Err(e) => {
                error!("Invalid message format: {}", e);
                return None;
            }
        }
    }
    None
}

async fn handle_device(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    serve_device(sender, receiver, state).await;
}

/// Runs one device link from registration until either side goes away.
async fn serve_device<S, R, E>(mut sender: S, mut receiver: R, state: Arc<AppState>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let Some(device_id) = await_registration(&mut sender, &mut receiver, &state).await else {
        return;
    };

    let (connection_id, mut outbox) = state.links.attach(&device_id);
    let registered = WsMessage::DeviceRegistered {
        device_id: device_id.clone(),
    };
    if send_json(&mut sender, &registered).await.is_err() {
        utils::cleanup_device_connection(&device_id, connection_id, &state);
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let links = Arc::clone(&state.links);
    let id = device_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(text.as_str()) {
                    Ok(reply) => links.complete(&id, reply),
                    Err(e) => warn!(device_id = %id, "Invalid message format: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::pin!(send_task, recv_task);

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    utils::cleanup_device_connection(&device_id, connection_id, &state);
}
