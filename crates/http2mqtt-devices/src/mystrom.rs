use http2mqtt::device::{DeviceId, SwitchClient, SwitchDetails};
use http2mqtt::error::{Error, ErrorKind, Result};
use http2mqtt::sensor::{RelayState, SensorReport, SensorType};

use serde::Deserialize;
use serde_json::Value;

use crate::http::{HttpClient, device_url};

/// Default topic prefix of myStrom switches.
pub const MYSTROM_SWITCH_TOPIC: &str = "http2mqtt/mystrom/wifi_switches";

/// Home Assistant node identifier of myStrom devices.
pub const MYSTROM_NODE_ID: &str = "mystrom";

const MANUFACTURER: &str = "myStrom AG";

const SENSOR_TYPES: &[SensorType] = &[SensorType::Power, SensorType::Temperature, SensorType::Relay];

/// A configured myStrom WiFi Switch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MyStromSwitchConfig {
    /// Host name or IP address, also used as switch identifier.
    pub host: String,
    /// Display name.
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Info {
    mac: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "type", default)]
    device_type: Value,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Report {
    relay: bool,
    #[serde(default)]
    power: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl From<Report> for SensorReport {
    fn from(report: Report) -> Self {
        Self {
            relay: report.relay.into(),
            power: report.power,
            amperage: None,
            temperature: report.temperature,
        }
    }
}

// The device type is a number on recent firmwares and a string on older ones.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        Value::Null => String::new(),
        value => value.to_string(),
    }
}

const fn relay_query(state: RelayState) -> &'static str {
    match state {
        RelayState::On => "1",
        RelayState::Off => "0",
    }
}

/// A [`SwitchClient`] for myStrom WiFi Switches.
///
/// The device `REST` API is polled on `/info` and `/report`, the relay is
/// driven through `/relay`.
#[derive(Debug)]
pub struct MyStromSwitchClient {
    http: HttpClient,
    switches: Vec<MyStromSwitchConfig>,
}

impl MyStromSwitchClient {
    /// Creates a [`MyStromSwitchClient`] for the given switches.
    ///
    /// # Errors
    ///
    /// The underlying `HTTP` client cannot be created.
    pub fn new(switches: Vec<MyStromSwitchConfig>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            switches,
        })
    }

    fn config(&self, id: &str) -> Option<&MyStromSwitchConfig> {
        self.switches.iter().find(|config| config.host == id)
    }
}

impl SwitchClient for MyStromSwitchClient {
    fn switch_ids(&self) -> Vec<DeviceId> {
        self.switches.iter().map(|config| config.host.clone()).collect()
    }

    async fn switch_details(&self, id: &str) -> Result<Option<SwitchDetails>> {
        let Some(config) = self.config(id) else {
            return Ok(None);
        };

        let info: Info = self
            .http
            .get_json(&device_url(&config.host, "/info"), None)
            .await?;

        Ok(Some(SwitchDetails {
            name: config.name.clone(),
            host: config.host.clone(),
            mac: info.mac,
            ip: Some(config.host.clone()),
            device_name: info
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "WiFi Switch".into()),
            device_type: value_to_string(&info.device_type),
            manufacturer: MANUFACTURER.into(),
            firmware_version: info.version,
        }))
    }

    fn sensor_types(&self, id: &str) -> Result<&'static [SensorType]> {
        self.config(id).map(|_| SENSOR_TYPES).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Switch `{id}` not found"),
            )
        })
    }

    async fn sensor_report(&self, id: &str) -> Result<Option<SensorReport>> {
        let Some(config) = self.config(id) else {
            return Ok(None);
        };

        let report: Report = self
            .http
            .get_json(&device_url(&config.host, "/report"), None)
            .await?;

        Ok(Some(report.into()))
    }

    async fn set_relay_state(&self, id: &str, state: RelayState) -> Result<()> {
        let config = self.config(id).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Switch `{id}` not found"),
            )
        })?;

        let path = format!("/relay?state={}", relay_query(state));
        self.http.get(&device_url(&config.host, &path), None).await
    }
}
