// config/mod.rs
use config::{Config, ConfigBuilder, Environment, builder::DefaultState};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("device {0} is configured more than once")]
    DuplicateDevice(String),
    #[error("at least one device must be configured")]
    NoDevices,
}

#[derive(Debug, Deserialize, Validate)]
pub struct Settings {
    #[validate(nested)]
    pub server: ServerSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    #[validate(nested)]
    pub fleet: FleetSettings,
    #[validate(nested)]
    pub devices: Vec<DeviceSettings>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ServerSettings {
    #[validate(length(min = 1))]
    pub address: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    Virtual,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FleetSettings {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_command_timeout_ms")]
    #[validate(range(min = 1))]
    pub command_timeout_ms: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl FleetSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// One configured bulb. Every field is mandatory.
#[derive(Debug, Deserialize, Validate)]
pub struct DeviceSettings {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(ip)]
    pub ip_address: String,
    #[validate(length(min = 1))]
    pub local_key: String,
    #[validate(length(min = 1))]
    pub name: String,
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        Self::load(
            Config::builder()
                .add_source(config::File::with_name("config/config"))
                .add_source(Environment::with_prefix("APP").separator("__")),
        )
    }

    fn load(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> Result<(), SettingsError> {
        self.validate()?;
        if self.devices.is_empty() {
            return Err(SettingsError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(SettingsError::DuplicateDevice(device.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};
    use pretty_assertions::assert_eq;

    fn load(toml: &str) -> Result<Settings, SettingsError> {
        Settings::load(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    const SERVER: &str = r#"
        [server]
        address = "127.0.0.1:8000"
    "#;

    fn with_devices(devices: &str) -> String {
        format!("{SERVER}\n{devices}")
    }

    const BULB_1: &str = r#"
        [[devices]]
        id = "bulb-1"
        ip_address = "192.168.1.21"
        local_key = "k1"
        name = "Bulb 1"
    "#;

    #[test]
    fn loads_a_complete_configuration_with_defaults() {
        let settings = load(&with_devices(BULB_1)).unwrap();

        assert_eq!(settings.devices.len(), 1);
        assert_eq!(settings.devices[0].name, "Bulb 1");
        assert_eq!(settings.fleet.transport, TransportKind::Websocket);
        assert_eq!(settings.fleet.command_timeout(), Duration::from_secs(5));
        assert_eq!(settings.server.cors_origins, vec!["http://localhost:5173"]);
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn reads_the_transport_kind() {
        let toml = format!("{SERVER}\n[fleet]\ntransport = \"virtual\"\ncommand_timeout_ms = 250\n{BULB_1}");
        let settings = load(&toml).unwrap();

        assert_eq!(settings.fleet.transport, TransportKind::Virtual);
        assert_eq!(settings.fleet.command_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_device_field_is_fatal() {
        let result = load(&with_devices(
            r#"
            [[devices]]
            id = "bulb-1"
            ip_address = "192.168.1.21"
            name = "Bulb 1"
        "#,
        ));

        assert!(matches!(result, Err(SettingsError::Load(_))));
    }

    #[test]
    fn empty_device_field_is_fatal() {
        let result = load(&with_devices(&BULB_1.replace("\"k1\"", "\"\"")));

        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn malformed_ip_address_is_fatal() {
        let result = load(&with_devices(&BULB_1.replace("192.168.1.21", "not-an-ip")));

        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn duplicate_device_ids_are_fatal() {
        let result = load(&with_devices(&format!("{BULB_1}\n{BULB_1}")));

        assert!(matches!(result, Err(SettingsError::DuplicateDevice(id)) if id == "bulb-1"));
    }

    #[test]
    fn an_empty_fleet_is_fatal() {
        let result = load(&format!("devices = []\n{SERVER}"));

        assert!(matches!(result, Err(SettingsError::NoDevices)));
    }
}
