// main.rs
mod commands;
mod config;
mod devices;
mod docs;
mod error;
mod fleet;
mod handlers;
mod metrics;
mod models;
mod utils;

use crate::config::{Settings, TransportKind};
use devices::ws_link::{DeviceLinks, LinkConnector};
use devices::{Connector, VirtualConnector};
use fleet::FleetRegistry;
use models::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let settings = Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        metrics::setup_metrics(settings.metrics.port)?;
        info!("Metrics exported on port {}", settings.metrics.port);
    }

    let links = Arc::new(DeviceLinks::new());
    let connector: Arc<dyn Connector> = match settings.fleet.transport {
        TransportKind::Websocket => Arc::new(LinkConnector::new(Arc::clone(&links))),
        TransportKind::Virtual => Arc::new(VirtualConnector),
    };

    let fleet = Arc::new(FleetRegistry::new(connector, settings.fleet.command_timeout()));
    for device in &settings.devices {
        fleet.register(&device.id, &device.ip_address, &device.local_key, &device.name);
    }
    info!(
        devices = fleet.len(),
        transport = ?settings.fleet.transport,
        "Fleet ready"
    );

    let state = Arc::new(AppState::new(Arc::clone(&fleet), links));
    let app = handlers::router(state, utils::cors_layer(&settings.server.cors_origins)?);

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    fleet.shutdown().await;
    Ok(())
}
