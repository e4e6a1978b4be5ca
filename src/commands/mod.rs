// commands/mod.rs
use crate::devices::DeviceHandle;
use crate::fleet::FleetRegistry;
use crate::metrics;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One logical command that can be applied to any bulb.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    TurnOn,
    TurnOff,
    SetBrightness { brightness: i64 },
    SetTemperature { temperature: i64 },
    SetColor { h: i32, s: i32, v: i32 },
    SetMode { mode: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::TurnOn => "turn_on",
            Action::TurnOff => "turn_off",
            Action::SetBrightness { .. } => "set_brightness",
            Action::SetTemperature { .. } => "set_temperature",
            Action::SetColor { .. } => "set_color",
            Action::SetMode { .. } => "set_mode",
        }
    }

    async fn apply(&self, handle: &DeviceHandle) -> bool {
        match self {
            Action::TurnOn => handle.turn_on().await,
            Action::TurnOff => handle.turn_off().await,
            Action::SetBrightness { brightness } => handle.set_brightness(*brightness).await,
            Action::SetTemperature { temperature } => handle.set_temperature(*temperature).await,
            Action::SetColor { h, s, v } => handle.set_color(*h, *s, *v).await,
            Action::SetMode { mode } => handle.set_mode(mode).await,
        }
    }
}

/// Outcome per requested device id; `false` covers unknown ids and failures.
pub type CommandResults = BTreeMap<String, bool>;

/// Applies `action` to every requested bulb concurrently.
///
/// Each device runs in its own task so that a failing or panicking bulb
/// only ever costs its own entry. Duplicate ids are attempted once.
#[instrument(skip_all, fields(action = action.name(), batch_id = %Uuid::new_v4()))]
pub async fn run_batch_action(
    fleet: &FleetRegistry,
    device_ids: &[String],
    action: &Action,
) -> CommandResults {
    let started = Instant::now();
    let mut seen = HashSet::new();
    let mut results = CommandResults::new();
    let mut attempts = Vec::new();

    for device_id in device_ids {
        if !seen.insert(device_id.as_str()) {
            continue;
        }
        match fleet.resolve(device_id) {
            Some(handle) => {
                let action = action.clone();
                let task = tokio::spawn(async move { action.apply(&handle).await });
                attempts.push((device_id.clone(), task));
            }
            None => {
                warn!(device_id, "Unknown device");
                results.insert(device_id.clone(), false);
            }
        }
    }

    let (ids, tasks): (Vec<_>, Vec<_>) = attempts.into_iter().unzip();
    for (device_id, outcome) in ids.into_iter().zip(join_all(tasks).await) {
        let ok = outcome.unwrap_or_else(|e| {
            warn!(device_id, error = %e, "Device task aborted");
            false
        });
        results.insert(device_id, ok);
    }

    for ok in results.values() {
        metrics::record_action(action.name(), *ok);
    }
    metrics::record_batch_duration(action.name(), started.elapsed());

    let succeeded = results.values().filter(|ok| **ok).count();
    info!(succeeded, requested = results.len(), "Batch finished");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::FakeConnector;
    use crate::devices::{DpValue, dps};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn fleet(connector: Arc<FakeConnector>, ids: &[&str]) -> FleetRegistry {
        let fleet = FleetRegistry::new(connector, Duration::from_secs(1));
        for id in ids {
            fleet.register(id, "192.168.1.10", "0123456789abcdef", &format!("Bulb {id}"));
        }
        fleet
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test_log::test(tokio::test)]
    async fn failing_and_unknown_devices_only_affect_their_own_entry() {
        let connector = Arc::new(FakeConnector::new());
        let fleet = fleet(connector.clone(), &["A", "B", "C"]);
        connector.transport("B").fail_sends(true);

        let results = run_batch_action(&fleet, &ids(&["A", "B", "unknown"]), &Action::TurnOn).await;

        assert_eq!(
            results,
            CommandResults::from([
                ("A".to_string(), true),
                ("B".to_string(), false),
                ("unknown".to_string(), false),
            ])
        );
        assert_eq!(connector.transport("A").value(dps::POWER), Some(DpValue::Bool(true)));
        assert_eq!(connector.transport("C").value(dps::POWER), Some(DpValue::Bool(false)));
    }

    #[test_log::test(tokio::test)]
    async fn batch_brightness_is_reflected_in_the_cached_status() {
        let connector = Arc::new(FakeConnector::new());
        let fleet = fleet(connector, &["A", "B", "C"]);

        let results = run_batch_action(
            &fleet,
            &ids(&["A", "C"]),
            &Action::SetBrightness { brightness: 50 },
        )
        .await;

        assert_eq!(
            results,
            CommandResults::from([("A".to_string(), true), ("C".to_string(), true)])
        );
        let status = fleet.get_device_status("A").await.unwrap().unwrap();
        assert_eq!(status[dps::BRIGHTNESS], DpValue::Int(50));
    }

    #[test_log::test(tokio::test)]
    async fn panicking_device_is_recorded_as_failed() {
        let connector = Arc::new(FakeConnector::new());
        let fleet = fleet(connector.clone(), &["A", "B"]);
        connector.transport("A").panic_on_send();

        let results = run_batch_action(&fleet, &ids(&["A", "B"]), &Action::TurnOff).await;

        assert_eq!(
            results,
            CommandResults::from([("A".to_string(), false), ("B".to_string(), true)])
        );
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_ids_are_attempted_once() {
        let connector = Arc::new(FakeConnector::new());
        let fleet = fleet(connector.clone(), &["A"]);

        let results = run_batch_action(&fleet, &ids(&["A", "A", "A"]), &Action::TurnOn).await;

        assert_eq!(results.len(), 1);
        assert_eq!(connector.transport("A").sends.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn empty_batch_yields_an_empty_map() {
        let fleet = fleet(Arc::new(FakeConnector::new()), &["A"]);

        let results = run_batch_action(&fleet, &[], &Action::TurnOn).await;

        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn devices_in_a_batch_run_concurrently() {
        let connector = Arc::new(FakeConnector::new().with_read_delay(Duration::from_millis(200)));
        let fleet = fleet(connector, &["A", "B", "C", "D"]);
        let started = Instant::now();

        let results =
            run_batch_action(&fleet, &ids(&["A", "B", "C", "D"]), &Action::TurnOn).await;

        assert!(results.values().all(|ok| *ok));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[rstest]
    #[case(Action::TurnOn, dps::POWER, DpValue::Bool(true))]
    #[case(Action::TurnOff, dps::POWER, DpValue::Bool(false))]
    #[case(Action::SetBrightness { brightness: 700 }, dps::BRIGHTNESS, DpValue::Int(700))]
    #[case(Action::SetTemperature { temperature: 250 }, dps::TEMPERATURE, DpValue::Int(250))]
    #[case(Action::SetColor { h: 120, s: 500, v: 250 }, dps::COLOR, DpValue::from("007801f400fa"))]
    #[case(Action::SetMode { mode: "colour".into() }, dps::MODE, DpValue::from("colour"))]
    #[tokio::test]
    async fn each_action_writes_its_data_point(
        #[case] action: Action,
        #[case] dp: &str,
        #[case] expected: DpValue,
    ) {
        let connector = Arc::new(FakeConnector::new());
        let fleet = fleet(connector.clone(), &["A"]);

        let results = run_batch_action(&fleet, &ids(&["A"]), &action).await;

        assert!(results["A"]);
        assert_eq!(connector.transport("A").value(dp), Some(expected));
    }

    #[rstest]
    #[case(r#"{"action": "turn_on"}"#, Action::TurnOn)]
    #[case(r#"{"action": "set_brightness", "brightness": 50}"#, Action::SetBrightness { brightness: 50 })]
    #[case(r#"{"action": "set_color", "h": 1, "s": 2, "v": 3}"#, Action::SetColor { h: 1, s: 2, v: 3 })]
    #[case(r#"{"action": "set_mode", "mode": "scene"}"#, Action::SetMode { mode: "scene".into() })]
    fn actions_deserialize_from_tagged_json(#[case] json: &str, #[case] expected: Action) {
        assert_eq!(serde_json::from_str::<Action>(json).unwrap(), expected);
    }

    #[test]
    fn unknown_action_names_do_not_deserialize() {
        assert!(serde_json::from_str::<Action>(r#"{"action": "self_destruct"}"#).is_err());
    }
}
