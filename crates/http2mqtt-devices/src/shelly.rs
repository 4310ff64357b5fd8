use http2mqtt::device::{DeviceId, SwitchClient, SwitchDetails};
use http2mqtt::error::{Error, ErrorKind, Result};
use http2mqtt::sensor::{RelayState, SensorReport, SensorType};

use serde::Deserialize;

use crate::http::{Credentials, HttpClient, device_url};

/// Default topic prefix of Shelly relays.
pub const SHELLY_SWITCH_TOPIC: &str = "http2mqtt/shelly/wifi_relays";

/// Home Assistant node identifier of Shelly devices.
pub const SHELLY_NODE_ID: &str = "shelly";

/// Default user name of the Shelly `HTTP` API.
pub const SHELLY_DEFAULT_USERNAME: &str = "admin";

const MANUFACTURER: &str = "Allterco Robotics";

/// Supported Shelly models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ShellyType {
    /// Shelly 1, a relay without power metering.
    #[serde(rename = "shelly-1")]
    Shelly1,
    /// Shelly 1PM, a relay with power metering.
    #[serde(rename = "shelly-1pm")]
    Shelly1Pm,
}

impl ShellyType {
    /// Returns the sensor types of the model.
    #[must_use]
    pub const fn sensor_types(self) -> &'static [SensorType] {
        match self {
            Self::Shelly1 => &[SensorType::Relay],
            Self::Shelly1Pm => &[SensorType::Power, SensorType::Temperature, SensorType::Relay],
        }
    }
}

fn default_username() -> Option<String> {
    Some(SHELLY_DEFAULT_USERNAME.into())
}

/// A configured Shelly relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellySwitchConfig {
    /// Device model.
    #[serde(rename = "type")]
    pub device_type: ShellyType,
    /// Host name or IP address, also used as switch identifier.
    pub host: String,
    /// Display name.
    pub name: String,
    /// User name for basic authentication.
    #[serde(default = "default_username")]
    pub username: Option<String>,
    /// Password for basic authentication.
    #[serde(default)]
    pub password: Option<String>,
}

impl ShellySwitchConfig {
    fn credentials(&self) -> Option<Credentials> {
        Credentials::new(self.username.as_deref(), self.password.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct SettingsDevice {
    mac: String,
    #[serde(rename = "type")]
    model: String,
}

#[derive(Debug, Deserialize)]
struct Settings {
    device: SettingsDevice,
    #[serde(default)]
    fw: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayStatus {
    ison: bool,
}

#[derive(Debug, Deserialize)]
struct Meter {
    #[serde(default)]
    power: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WifiStation {
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    wifi_sta: Option<WifiStation>,
    relays: Vec<RelayStatus>,
    #[serde(default)]
    meters: Vec<Meter>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl Status {
    fn station_ip(&self) -> Option<String> {
        self.wifi_sta
            .as_ref()
            .and_then(|station| station.ip.clone())
            .filter(|ip| !ip.is_empty())
    }
}

impl TryFrom<Status> for SensorReport {
    type Error = Error;

    fn try_from(status: Status) -> Result<Self> {
        let relay = status.relays.first().ok_or_else(|| {
            Error::new(ErrorKind::InvalidPayload, "The status reports no relay")
        })?;

        Ok(Self {
            relay: relay.ison.into(),
            power: status.meters.first().and_then(|meter| meter.power),
            amperage: None,
            temperature: status.temperature,
        })
    }
}

fn relay_form(state: RelayState) -> String {
    format!("turn={}", state.payload())
}

/// A [`SwitchClient`] for Shelly 1 and Shelly 1PM relays.
///
/// Details are read from `/settings` and `/status`, sensors from `/status`. The relay is
/// driven through `/relay/0`. Requests are authenticated when both a user
/// name and a password are configured.
#[derive(Debug)]
pub struct ShellySwitchClient {
    http: HttpClient,
    switches: Vec<ShellySwitchConfig>,
}

impl ShellySwitchClient {
    /// Creates a [`ShellySwitchClient`] for the given relays.
    ///
    /// # Errors
    ///
    /// The underlying `HTTP` client cannot be created.
    pub fn new(switches: Vec<ShellySwitchConfig>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            switches,
        })
    }

    fn config(&self, id: &str) -> Option<&ShellySwitchConfig> {
        self.switches.iter().find(|config| config.host == id)
    }

    async fn status(&self, config: &ShellySwitchConfig) -> Result<Status> {
        self.http
            .get_json(
                &device_url(&config.host, "/status"),
                config.credentials().as_ref(),
            )
            .await
    }
}

impl SwitchClient for ShellySwitchClient {
    fn switch_ids(&self) -> Vec<DeviceId> {
        self.switches.iter().map(|config| config.host.clone()).collect()
    }

    async fn switch_details(&self, id: &str) -> Result<Option<SwitchDetails>> {
        let Some(config) = self.config(id) else {
            return Ok(None);
        };

        let credentials = config.credentials();
        let settings: Settings = self
            .http
            .get_json(
                &device_url(&config.host, "/settings"),
                credentials.as_ref(),
            )
            .await?;
        let status = self.status(config).await?;

        Ok(Some(SwitchDetails {
            name: config.name.clone(),
            host: config.host.clone(),
            mac: settings.device.mac,
            ip: status.station_ip().or_else(|| Some(config.host.clone())),
            device_name: settings.device.model.clone(),
            device_type: settings.device.model,
            manufacturer: MANUFACTURER.into(),
            firmware_version: settings.fw,
        }))
    }

    fn sensor_types(&self, id: &str) -> Result<&'static [SensorType]> {
        self.config(id)
            .map(|config| config.device_type.sensor_types())
            .ok_or_else(|| {
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

        let status = self.status(config).await?;
        SensorReport::try_from(status).map(Some)
    }

    async fn set_relay_state(&self, id: &str, state: RelayState) -> Result<()> {
        let config = self.config(id).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Switch `{id}` not found"),
            )
        })?;

        self.http
            .post_form(
                &device_url(&config.host, "/relay/0"),
                relay_form(state),
                config.credentials().as_ref(),
            )
            .await
    }
}
