use http2mqtt::device::{DeviceId, SwitchClient, SwitchDetails};
use http2mqtt::error::{Error, ErrorKind, Result};
use http2mqtt::sensor::{RelayState, SensorReport, SensorType};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::http::{Credentials, HttpClient};

/// Default topic prefix of Edimax plugs.
pub const EDIMAX_PLUG_TOPIC: &str = "http2mqtt/edimax/wifi_plugs";

/// Home Assistant node identifier of Edimax devices.
pub const EDIMAX_NODE_ID: &str = "edimax";

/// Default user name of the Edimax smart plug API.
pub const EDIMAX_DEFAULT_USERNAME: &str = "admin";

const MANUFACTURER: &str = "Edimax Technology Co., Ltd";

// The plug serves its API on a fixed port.
const EDIMAX_PORT: u16 = 10000;

const SENSOR_TYPES: &[SensorType] = &[SensorType::Power, SensorType::Amperage, SensorType::Relay];

const SYSTEM_INFO_COMMAND: &str = "<CMD id=\"get\"><SYSTEM_INFO></SYSTEM_INFO></CMD>";

const RELAY_STATE_COMMAND: &str =
    "<CMD id=\"get\"><Device.System.Power.State></Device.System.Power.State></CMD>";

const NOW_POWER_COMMAND: &str = "<CMD id=\"get\"><NOW_POWER>\
    <Device.System.Power.NowCurrent></Device.System.Power.NowCurrent>\
    <Device.System.Power.NowPower></Device.System.Power.NowPower>\
    </NOW_POWER></CMD>";

fn default_username() -> String {
    EDIMAX_DEFAULT_USERNAME.into()
}

/// A configured Edimax smart plug.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EdimaxPlugConfig {
    /// Host name or IP address, also used as switch identifier.
    pub host: String,
    /// Display name.
    pub name: String,
    /// User name of the plug.
    #[serde(default = "default_username")]
    pub username: String,
    /// Password of the plug.
    pub password: String,
}

impl EdimaxPlugConfig {
    fn credentials(&self) -> Option<Credentials> {
        Credentials::new(Some(self.username.as_str()), Some(self.password.as_str()))
    }
}

// Every answer of the plug is a `SMARTPLUG` document wrapping a `CMD`.
#[derive(Debug, Deserialize)]
struct SmartPlug<T> {
    #[serde(rename = "CMD")]
    command: T,
}

#[derive(Debug, Deserialize)]
struct SystemInfoCommand {
    #[serde(rename = "SYSTEM_INFO")]
    system_info: SystemInfo,
}

#[derive(Debug, Deserialize)]
struct SystemInfo {
    #[serde(rename = "Run.Model")]
    model: String,
    #[serde(rename = "Run.FW.Version", default)]
    firmware_version: Option<String>,
    #[serde(rename = "Run.LAN.Client.MAC.Address")]
    mac: String,
}

#[derive(Debug, Deserialize)]
struct RelayStateCommand {
    #[serde(rename = "Device.System.Power.State")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NowPowerCommand {
    #[serde(rename = "NOW_POWER")]
    now_power: NowPower,
}

#[derive(Debug, Deserialize)]
struct NowPower {
    #[serde(rename = "Device.System.Power.NowCurrent")]
    current: f64,
    #[serde(rename = "Device.System.Power.NowPower")]
    power: f64,
}

#[derive(Debug, Deserialize)]
struct SetupCommand {
    #[serde(rename = "$text", default)]
    result: String,
}

fn plug_url(host: &str) -> String {
    format!("http://{host}:{EDIMAX_PORT}/smartplug.cgi")
}

fn request_body(command: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF8\"?><SMARTPLUG id=\"edimax\">{command}</SMARTPLUG>")
}

fn relay_command(state: RelayState) -> String {
    let state = match state {
        RelayState::On => "ON",
        RelayState::Off => "OFF",
    };
    format!("<CMD id=\"setup\"><Device.System.Power.State>{state}</Device.System.Power.State></CMD>")
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    quick_xml::de::from_str::<SmartPlug<T>>(body)
        .map(|document| document.command)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidPayload,
                format!("Invalid smart plug response: {e}"),
            )
        })
}

fn parse_relay_state(state: &str) -> Result<RelayState> {
    match state.trim() {
        "ON" => Ok(RelayState::On),
        "OFF" => Ok(RelayState::Off),
        state => Err(Error::new(
            ErrorKind::InvalidPayload,
            format!("Unknown relay state `{state}`"),
        )),
    }
}

fn sensor_report(relay: &RelayStateCommand, power: &NowPowerCommand) -> Result<SensorReport> {
    Ok(SensorReport::new(parse_relay_state(&relay.state)?)
        .power(power.now_power.power)
        .amperage(power.now_power.current))
}

/// A [`SwitchClient`] for Edimax smart plugs.
///
/// Commands are `XML` documents posted to `/smartplug.cgi` on port 10000
/// with basic authentication.
#[derive(Debug)]
pub struct EdimaxPlugClient {
    http: HttpClient,
    plugs: Vec<EdimaxPlugConfig>,
}

impl EdimaxPlugClient {
    /// Creates an [`EdimaxPlugClient`] for the given plugs.
    ///
    /// # Errors
    ///
    /// The underlying `HTTP` client cannot be created.
    pub fn new(plugs: Vec<EdimaxPlugConfig>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new()?,
            plugs,
        })
    }

    fn config(&self, id: &str) -> Option<&EdimaxPlugConfig> {
        self.plugs.iter().find(|config| config.host == id)
    }

    async fn command<T: DeserializeOwned>(
        &self,
        config: &EdimaxPlugConfig,
        command: &str,
    ) -> Result<T> {
        let body = self
            .http
            .post_text(
                &plug_url(&config.host),
                request_body(command),
                config.credentials().as_ref(),
            )
            .await?;
        decode(&body)
    }
}

impl SwitchClient for EdimaxPlugClient {
    fn switch_ids(&self) -> Vec<DeviceId> {
        self.plugs.iter().map(|config| config.host.clone()).collect()
    }

    async fn switch_details(&self, id: &str) -> Result<Option<SwitchDetails>> {
        let Some(config) = self.config(id) else {
            return Ok(None);
        };

        let info: SystemInfoCommand = self.command(config, SYSTEM_INFO_COMMAND).await?;
        let info = info.system_info;

        Ok(Some(SwitchDetails {
            name: config.name.clone(),
            host: config.host.clone(),
            mac: info.mac,
            ip: Some(config.host.clone()),
            device_name: info.model.clone(),
            device_type: info.model,
            manufacturer: MANUFACTURER.into(),
            firmware_version: info.firmware_version,
        }))
    }

    fn sensor_types(&self, id: &str) -> Result<&'static [SensorType]> {
        self.config(id).map(|_| SENSOR_TYPES).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Plug `{id}` not found"),
            )
        })
    }

    async fn sensor_report(&self, id: &str) -> Result<Option<SensorReport>> {
        let Some(config) = self.config(id) else {
            return Ok(None);
        };

        let (relay, power) = tokio::try_join!(
            self.command::<RelayStateCommand>(config, RELAY_STATE_COMMAND),
            self.command::<NowPowerCommand>(config, NOW_POWER_COMMAND),
        )?;

        sensor_report(&relay, &power).map(Some)
    }

    async fn set_relay_state(&self, id: &str, state: RelayState) -> Result<()> {
        let config = self.config(id).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Plug `{id}` not found"),
            )
        })?;

        let setup: SetupCommand = self.command(config, &relay_command(state)).await?;
        if setup.result.trim() == "OK" {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::Device,
                format!("Plug `{id}` refused the relay command: `{}`", setup.result),
            ))
        }
    }
}
