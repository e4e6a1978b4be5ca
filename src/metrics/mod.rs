// metrics/mod.rs
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

pub const ACTIONS_TOTAL: &str = "bulb_actions_total";
pub const STATUS_REFRESH_TOTAL: &str = "bulb_status_refresh_total";
pub const BATCH_DURATION_SECONDS: &str = "bulb_batch_duration_seconds";

pub fn setup_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to setup metrics: {}", e))?;

    ::metrics::describe_counter!(ACTIONS_TOTAL, "Per-device action attempts by outcome");
    ::metrics::describe_counter!(STATUS_REFRESH_TOTAL, "Device status refreshes by outcome");
    ::metrics::describe_histogram!(BATCH_DURATION_SECONDS, "Wall-clock time of a batch action");
    Ok(())
}

fn outcome(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}

pub fn record_action(action: &'static str, ok: bool) {
    ::metrics::counter!(ACTIONS_TOTAL, "action" => action, "outcome" => outcome(ok)).increment(1);
}

pub fn record_refresh(ok: bool) {
    ::metrics::counter!(STATUS_REFRESH_TOTAL, "outcome" => outcome(ok)).increment(1);
}

pub fn record_batch_duration(action: &'static str, elapsed: Duration) {
    ::metrics::histogram!(BATCH_DURATION_SECONDS, "action" => action).record(elapsed.as_secs_f64());
}
