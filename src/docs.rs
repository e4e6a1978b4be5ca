use utoipa::OpenApi;
use crate::{commands, devices, handlers, models};

#[derive(OpenApi)]
#[openapi(
    info(title = "bulb-gateway", description = "Uniform control of a fleet of smart bulbs"),
    paths(
        handlers::list_bulbs,
        handlers::fleet_status,
        handlers::bulb_status,
        handlers::power_on,
        handlers::power_off,
        handlers::set_brightness,
        handlers::set_temperature,
        handlers::set_mode,
        handlers::set_color,
        handlers::run_batch,
    ),
    components(
        schemas(
            commands::Action,
            devices::DpValue,
            models::DeviceSummary,
            models::BulbSelection,
            models::ColorRequest,
            models::BatchRequest,
        )
    )
)]
pub struct ApiDoc;
