use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use http2mqtt::driver::SwitchOptions;

use http2mqtt_devices::buttons::{
    ButtonConfig, ButtonType, MYSTROM_BUTTONS_ROUTE, MYSTROM_BUTTONS_TOPIC,
    normalize_mac_address,
};
use http2mqtt_devices::edimax::EdimaxPlugConfig;
use http2mqtt_devices::mystrom::MyStromSwitchConfig;
use http2mqtt_devices::shelly::ShellySwitchConfig;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 8321;
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_CLIENT_ID: &str = "http2mqtt";

const DEFAULT_POLLING_INTERVAL: u64 = 5000;
const DEFAULT_SENSOR_UPDATE_INTERVAL: u64 = 300_000;
const MIN_POLLING_INTERVAL: u64 = 1000;

const MIN_NAME_LENGTH: usize = 3;
const MAX_NAME_LENGTH: usize = 32;

const DEFAULT_WHEEL_SPEED: f64 = 1.;

/// Maximum level of the emitted log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.into()
}

const fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub(crate) host: String,
    #[serde(default = "default_http_port")]
    pub(crate) port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

const fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct MqttConfig {
    pub(crate) host: String,
    #[serde(default = "default_mqtt_port")]
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) username: Option<String>,
    #[serde(default)]
    pub(crate) password: Option<String>,
    #[serde(default = "default_client_id")]
    pub(crate) client_id: String,
}

impl MqttConfig {
    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("`mqtt.host` must not be empty"));
        }

        if self.client_id.is_empty() {
            return Err(Error::config("`mqtt.clientId` must not be empty"));
        }

        match (&self.username, &self.password) {
            (Some(_), None) => Err(Error::config(
                "`mqtt.password` is required when `mqtt.username` is set",
            )),
            (None, Some(_)) => Err(Error::config(
                "`mqtt.password` is only allowed together with `mqtt.username`",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HomeAssistantConfig {
    #[serde(default)]
    pub(crate) discovery: bool,
}

const fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL
}

const fn default_sensor_update_interval() -> u64 {
    DEFAULT_SENSOR_UPDATE_INTERVAL
}

// Fields shared by every switch entry, used by validation.
pub(crate) trait SwitchEntry {
    fn host(&self) -> &str;
    fn name(&self) -> &str;

    // Checks the fields specific to a device family.
    fn validate(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

impl SwitchEntry for MyStromSwitchConfig {
    fn host(&self) -> &str {
        &self.host
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl SwitchEntry for ShellySwitchConfig {
    fn host(&self) -> &str {
        &self.host
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl SwitchEntry for EdimaxPlugConfig {
    fn host(&self) -> &str {
        &self.host
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::config(format!("`{path}.username` must not be empty")));
        }

        if self.password.is_empty() {
            return Err(Error::config(format!("`{path}.password` must not be empty")));
        }

        Ok(())
    }
}

/// Options of a switch plugin, generic over the switch entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct SwitchPluginConfig<T> {
    #[serde(default = "default_polling_interval")]
    pub(crate) polling_interval: u64,
    #[serde(default = "default_sensor_update_interval")]
    pub(crate) sensor_update_interval: u64,
    #[serde(default)]
    pub(crate) mqtt_topic: Option<String>,
    #[serde(default = "Vec::new")]
    pub(crate) switches: Vec<T>,
}

impl<T: SwitchEntry> SwitchPluginConfig<T> {
    fn validate(&self, plugin: &str) -> Result<()> {
        if self.polling_interval < MIN_POLLING_INTERVAL {
            return Err(Error::config(format!(
                "`{plugin}.pollingInterval` must be greater than {}",
                MIN_POLLING_INTERVAL - 1
            )));
        }

        if self.sensor_update_interval <= self.polling_interval {
            return Err(Error::config(format!(
                "`{plugin}.sensorUpdateInterval` must be greater than `{plugin}.pollingInterval`"
            )));
        }

        if self.mqtt_topic.as_deref().is_some_and(str::is_empty) {
            return Err(Error::config(format!(
                "`{plugin}.mqttTopic` must not be empty"
            )));
        }

        for (index, switch) in self.switches.iter().enumerate() {
            if switch.host().is_empty() {
                return Err(Error::config(format!(
                    "`{plugin}.switches[{index}].host` must not be empty"
                )));
            }

            let path = format!("{plugin}.switches[{index}]");
            validate_name(switch.name(), &format!("{path}.name"))?;
            switch.validate(&path)?;

            if self.switches[..index]
                .iter()
                .any(|other| other.host() == switch.host())
            {
                return Err(Error::config(format!(
                    "`{plugin}.switches[{index}].host` duplicates the host `{}`",
                    switch.host()
                )));
            }
        }

        Ok(())
    }

    /// Returns the driver options of the plugin.
    pub(crate) fn switch_options(
        &self,
        default_topic: &str,
        node_id: &str,
        discovery: bool,
    ) -> SwitchOptions {
        SwitchOptions::new(
            self.mqtt_topic.as_deref().unwrap_or(default_topic),
            node_id,
        )
        .polling_interval(Duration::from_millis(self.polling_interval))
        .sensor_update_interval(Duration::from_millis(self.sensor_update_interval))
        .home_assistant_discovery(discovery)
    }
}

fn default_buttons_route() -> String {
    MYSTROM_BUTTONS_ROUTE.into()
}

fn default_buttons_topic() -> String {
    MYSTROM_BUTTONS_TOPIC.into()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ButtonsPluginConfig {
    #[serde(default = "default_buttons_route")]
    pub(crate) route: String,
    #[serde(default = "default_buttons_topic")]
    pub(crate) mqtt_topic: String,
    #[serde(default)]
    pub(crate) buttons: Vec<ButtonConfig>,
}

impl ButtonsPluginConfig {
    // Normalizes the button addresses and fills in the default wheel speed.
    fn validate(&mut self) -> Result<()> {
        if !self.route.starts_with('/') {
            return Err(Error::config(
                "`mystromButtons.route` must start with `/`",
            ));
        }

        if self.mqtt_topic.is_empty() {
            return Err(Error::config(
                "`mystromButtons.mqttTopic` must not be empty",
            ));
        }

        for index in 0..self.buttons.len() {
            let path = format!("mystromButtons.buttons[{index}]");
            let button = &mut self.buttons[index];

            button.mac = normalize_mac_address(&button.mac).ok_or_else(|| {
                Error::config(format!("`{path}.mac` is not a valid MAC address"))
            })?;

            validate_name(&button.name, &format!("{path}.name"))?;

            match button.button_type {
                ButtonType::Button => {
                    if button.wheel_min.is_some()
                        || button.wheel_max.is_some()
                        || button.wheel_speed.is_some()
                    {
                        return Err(Error::config(format!(
                            "`{path}` configures a wheel but is not a button plus"
                        )));
                    }
                }
                ButtonType::ButtonPlus => {
                    let (Some(min), Some(max)) = (button.wheel_min, button.wheel_max) else {
                        return Err(Error::config(format!(
                            "`{path}.wheelMin` and `{path}.wheelMax` are required for a button plus"
                        )));
                    };

                    if min > max {
                        return Err(Error::config(format!(
                            "`{path}.wheelMin` must not be greater than `{path}.wheelMax`"
                        )));
                    }

                    let _ = button.wheel_speed.get_or_insert(DEFAULT_WHEEL_SPEED);
                }
            }

            let mac = &self.buttons[index].mac;
            if self.buttons[..index].iter().any(|other| &other.mac == mac) {
                return Err(Error::config(format!(
                    "`{path}.mac` duplicates the address `{mac}`"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PluginsConfig {
    #[serde(default)]
    pub(crate) mystrom_switch: Option<SwitchPluginConfig<MyStromSwitchConfig>>,
    #[serde(default)]
    pub(crate) shelly_switch: Option<SwitchPluginConfig<ShellySwitchConfig>>,
    #[serde(default)]
    pub(crate) edimax_plug: Option<SwitchPluginConfig<EdimaxPlugConfig>>,
    #[serde(default)]
    pub(crate) mystrom_buttons: Option<ButtonsPluginConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) log_level: LogLevel,
    #[serde(default)]
    pub(crate) http: HttpConfig,
    pub(crate) mqtt: MqttConfig,
    #[serde(default)]
    pub(crate) home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub(crate) options: PluginsConfig,
}

fn validate_name(name: &str, path: &str) -> Result<()> {
    let length = name.chars().count();
    if (MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(Error::config(format!(
            "`{path}` must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters long"
        )))
    }
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Unable to read the configuration file `{}`: {e}",
                path.display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parses and validates a configuration.
    pub(crate) fn from_json(content: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.http.host.parse::<IpAddr>().is_err() {
            return Err(Error::config(format!(
                "`http.host` must be an IP address, found `{}`",
                self.http.host
            )));
        }

        self.mqtt.validate()?;

        if let Some(plugin) = &self.options.mystrom_switch {
            plugin.validate("mystromSwitch")?;
        }

        if let Some(plugin) = &self.options.shelly_switch {
            plugin.validate("shellySwitch")?;
        }

        if let Some(plugin) = &self.options.edimax_plug {
            plugin.validate("edimaxPlug")?;
        }

        if let Some(plugin) = &mut self.options.mystrom_buttons {
            plugin.validate()?;
        }

        Ok(())
    }
}
