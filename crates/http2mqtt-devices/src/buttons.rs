//! Receiver of myStrom WiFi Button actions.
//!
//! A button calls an `HTTP` endpoint with its `MAC` address, the action
//! identifier, the battery level and, for the wheel of a Button Plus, the
//! wheel delta. Every action is republished on the message bus.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use hashbrown::HashMap;

use http2mqtt::bus::{MessageBus, PublishOptions};
use http2mqtt::error::Result;
use http2mqtt::homeassistant::{
    Announcement, ComponentType, DeviceInfo, DeviceTriggerConfig, DeviceTriggerSubtype,
    DeviceTriggerType, SensorConfig, SensorDeviceClass,
};

use parking_lot::Mutex;

use serde::Deserialize;

use tracing::{error, info, warn};

use crate::mystrom::MYSTROM_NODE_ID;

/// Default route of the button endpoint.
pub const MYSTROM_BUTTONS_ROUTE: &str = "/mystrom-buttons";

/// Default topic prefix of myStrom buttons.
pub const MYSTROM_BUTTONS_TOPIC: &str = "mystrom/wifi_buttons";

const MANUFACTURER: &str = "myStrom AG";

// Delay between the `ON` and `OFF` messages of a regular action.
const RELEASE_DELAY: Duration = Duration::from_secs(1);

const PRESSED: &str = "ON";
const RELEASED: &str = "OFF";

const MAX_BATTERY: f64 = 100.;
const MAX_WHEEL: f64 = 127.;

/// Button models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ButtonType {
    /// WiFi Button.
    #[serde(rename = "button")]
    Button,
    /// WiFi Button Plus, with a touch surface and a wheel.
    #[serde(rename = "button-plus")]
    ButtonPlus,
}

impl ButtonType {
    const fn model(self) -> &'static str {
        match self {
            Self::Button => "Wifi Button",
            Self::ButtonPlus => "Wifi Button Plus",
        }
    }

    const fn announced_actions(self) -> &'static [ActionId] {
        match self {
            Self::Button => &[
                ActionId::Single,
                ActionId::Double,
                ActionId::Long,
                ActionId::Battery,
            ],
            Self::ButtonPlus => &[
                ActionId::Single,
                ActionId::Double,
                ActionId::Long,
                ActionId::Touch,
                ActionId::WheelFinal,
                ActionId::Battery,
                ActionId::Wheel,
            ],
        }
    }
}

/// A configured button.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonConfig {
    /// Hardware address, twelve uppercase hexadecimal digits.
    pub mac: String,
    /// Display name.
    pub name: String,
    /// Button model.
    #[serde(rename = "type")]
    pub button_type: ButtonType,
    /// Lower bound of the wheel value. Button Plus only.
    #[serde(default)]
    pub wheel_min: Option<f64>,
    /// Upper bound of the wheel value. Button Plus only.
    #[serde(default)]
    pub wheel_max: Option<f64>,
    /// Multiplier of a wheel delta. Button Plus only.
    #[serde(default)]
    pub wheel_speed: Option<f64>,
}

impl ButtonConfig {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            manufacturer: Some(MANUFACTURER.into()),
            model: Some(self.button_type.model().into()),
            name: Some(self.name.clone()),
            ..DeviceInfo::with_mac(&self.mac)
        }
    }
}

/// Normalizes a `MAC` address to twelve uppercase hexadecimal digits.
///
/// Colons are accepted as separators. Returns [`None`] for an invalid
/// address.
#[must_use]
pub fn normalize_mac_address(mac: &str) -> Option<String> {
    let mac: String = mac.chars().filter(|c| *c != ':').collect();
    (mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| mac.to_ascii_uppercase())
}

/// Button actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionId {
    /// Single press.
    Single,
    /// Double press.
    Double,
    /// Long press.
    Long,
    /// Touch. Button Plus only.
    Touch,
    /// Wheel rotation. Button Plus only.
    Wheel,
    /// Battery report.
    Battery,
    /// End of a wheel rotation. Button Plus only.
    WheelFinal,
}

impl ActionId {
    /// Parses an action from its numeric identifier.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "1" => Some(Self::Single),
            "2" => Some(Self::Double),
            "3" => Some(Self::Long),
            "4" => Some(Self::Touch),
            "5" => Some(Self::Wheel),
            "6" => Some(Self::Battery),
            "11" => Some(Self::WheelFinal),
            _ => None,
        }
    }

    /// Returns the topic segment of the action.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
            Self::Long => "long",
            Self::Touch => "touch",
            Self::Wheel => "wheel",
            Self::Battery => "battery",
            Self::WheelFinal => "wheel_final",
        }
    }

    const fn friendly_name(self) -> &'static str {
        match self {
            Self::Single => "Single",
            Self::Double => "Double",
            Self::Long => "Long",
            Self::Touch => "Touch",
            Self::Wheel => "Wheel",
            Self::Battery => "Battery Level",
            Self::WheelFinal => "Wheel Final",
        }
    }

    const fn trigger(self) -> Option<(DeviceTriggerType, DeviceTriggerSubtype)> {
        match self {
            Self::Single => Some((
                DeviceTriggerType::ButtonShortPress,
                DeviceTriggerSubtype::Button1,
            )),
            Self::Double => Some((
                DeviceTriggerType::ButtonDoublePress,
                DeviceTriggerSubtype::Button1,
            )),
            Self::Long => Some((
                DeviceTriggerType::ButtonLongPress,
                DeviceTriggerSubtype::Button1,
            )),
            Self::Touch => Some((
                DeviceTriggerType::ButtonShortPress,
                DeviceTriggerSubtype::Button2,
            )),
            Self::WheelFinal => Some((
                DeviceTriggerType::ButtonShortPress,
                DeviceTriggerSubtype::Button3,
            )),
            Self::Wheel | Self::Battery => None,
        }
    }
}

/// Raw query of a button call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ButtonQuery {
    /// Button `MAC` address.
    pub mac: Option<String>,
    /// Action identifier.
    pub action: Option<String>,
    /// Battery level.
    pub battery: Option<String>,
    /// Wheel delta.
    pub wheel: Option<String>,
}

/// A validated button call.
#[derive(Debug, Clone, PartialEq)]
pub struct ButtonAction {
    /// Normalized button `MAC` address.
    pub mac: String,
    /// Action.
    pub action: ActionId,
    /// Battery level, between 0 and 100.
    pub battery: f64,
    /// Wheel delta, present only for [`ActionId::Wheel`].
    pub wheel: Option<f64>,
}

fn parse_number(name: &str, value: &str, min: f64, max: f64) -> std::result::Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && (min..=max).contains(value))
        .ok_or_else(|| format!("`{name}` must be a number between {min} and {max}"))
}

impl ButtonQuery {
    /// Validates the query.
    ///
    /// # Errors
    ///
    /// A description of the first invalid parameter.
    pub fn validate(&self) -> std::result::Result<ButtonAction, String> {
        let mac = self
            .mac
            .as_deref()
            .ok_or_else(|| String::from("`mac` is required"))?;
        let mac = normalize_mac_address(mac)
            .ok_or_else(|| String::from("`mac` must be a MAC address"))?;

        let action = self
            .action
            .as_deref()
            .ok_or_else(|| String::from("`action` is required"))?;
        let action =
            ActionId::from_id(action).ok_or_else(|| format!("`action` {action} is not valid"))?;

        let battery = self
            .battery
            .as_deref()
            .ok_or_else(|| String::from("`battery` is required"))?;
        let battery = parse_number("battery", battery, 0., MAX_BATTERY)?;

        let wheel = match (action, self.wheel.as_deref()) {
            (ActionId::Wheel, Some(wheel)) => {
                Some(parse_number("wheel", wheel, -MAX_WHEEL, MAX_WHEEL)?)
            }
            (ActionId::Wheel, None) => return Err("`wheel` is required".into()),
            (_, Some(_)) => return Err("`wheel` is not allowed".into()),
            (_, None) => None,
        };

        Ok(ButtonAction {
            mac,
            action,
            battery,
            wheel,
        })
    }
}

/// Outcome of a button call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action was accepted.
    Accepted,
    /// The button is not configured.
    UnknownButton,
    /// The query is invalid.
    Invalid(String),
}

impl IntoResponse for ActionOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted => (StatusCode::OK, "OK").into_response(),
            Self::UnknownButton => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            Self::Invalid(description) => (StatusCode::BAD_REQUEST, description).into_response(),
        }
    }
}

/// Republishes button actions on a [`MessageBus`].
pub struct ButtonReceiver<B: MessageBus> {
    bus: B,
    topic: String,
    home_assistant_discovery: bool,
    buttons: HashMap<String, ButtonConfig>,
    // Wheel values of Button Plus devices.
    wheel_states: Mutex<HashMap<String, f64>>,
}

impl<B: MessageBus + 'static> ButtonReceiver<B> {
    /// Creates a [`ButtonReceiver`].
    ///
    /// Button addresses are expected to be normalized.
    #[must_use]
    pub fn new(bus: B, topic: impl Into<String>, buttons: Vec<ButtonConfig>) -> Self {
        let wheel_states = buttons
            .iter()
            .filter(|button| button.button_type == ButtonType::ButtonPlus)
            .map(|button| (button.mac.clone(), 0.))
            .collect();

        Self {
            bus,
            topic: topic.into(),
            home_assistant_discovery: false,
            buttons: buttons
                .into_iter()
                .map(|button| (button.mac.clone(), button))
                .collect(),
            wheel_states: Mutex::new(wheel_states),
        }
    }

    /// Enables or disables Home Assistant discovery.
    #[must_use]
    pub const fn home_assistant_discovery(mut self, enabled: bool) -> Self {
        self.home_assistant_discovery = enabled;
        self
    }

    /// Builds the router serving button calls on `route`.
    pub fn router(self: Arc<Self>, route: &str) -> Router {
        let route = route.trim_end_matches('/');
        let router = Router::new().route("/", get(handle_button_call::<B>));

        let router = if route.is_empty() {
            router
        } else {
            Router::new()
                .route(route, get(handle_button_call::<B>))
                .route(&format!("{route}/"), get(handle_button_call::<B>))
        };

        router.with_state(self)
    }

    fn action_topic(&self, button: &ButtonConfig, action: ActionId) -> String {
        format!("{}/{}/{}", self.topic, button.mac, action.name())
    }

    async fn publish(&self, topic: &str, payload: String, options: PublishOptions) {
        if let Err(e) = self.bus.publish(topic, payload, options).await {
            error!(topic, "Failed to publish: {e}");
        }
    }

    /// Handles a button call.
    ///
    /// Regular actions are published in the background: the battery level
    /// and `ON` right away, then `OFF` one second later.
    pub async fn handle_action(self: &Arc<Self>, query: &ButtonQuery) -> ActionOutcome {
        let action = match query.validate() {
            Ok(action) => action,
            Err(description) => {
                warn!("Invalid button call: {description}");
                return ActionOutcome::Invalid(description);
            }
        };

        let Some(button) = self.buttons.get(&action.mac).cloned() else {
            warn!(mac = %action.mac, "Call from an unknown button");
            return ActionOutcome::UnknownButton;
        };

        info!(
            mac = %button.mac,
            name = %button.name,
            action = action.action.name(),
            "Button action"
        );

        match (action.action, action.wheel) {
            (ActionId::Wheel, Some(wheel)) => {
                self.handle_wheel_action(&button, wheel, action.battery)
                    .await;
            }
            (action_id, _) => {
                let receiver = Arc::clone(self);
                let _ = tokio::spawn(async move {
                    receiver
                        .handle_regular_action(&button, action_id, action.battery)
                        .await;
                });
            }
        }

        ActionOutcome::Accepted
    }

    async fn handle_regular_action(&self, button: &ButtonConfig, action: ActionId, battery: f64) {
        self.publish(
            &self.action_topic(button, ActionId::Battery),
            battery.to_string(),
            PublishOptions::retained(),
        )
        .await;

        let topic = self.action_topic(button, action);
        self.publish(&topic, PRESSED.into(), PublishOptions::default())
            .await;
        tokio::time::sleep(RELEASE_DELAY).await;
        self.publish(&topic, RELEASED.into(), PublishOptions::default())
            .await;
    }

    async fn handle_wheel_action(&self, button: &ButtonConfig, wheel: f64, battery: f64) {
        let (Some(min), Some(max)) = (button.wheel_min, button.wheel_max) else {
            return;
        };
        let speed = button.wheel_speed.unwrap_or(1.);

        let value = {
            let mut wheel_states = self.wheel_states.lock();
            let Some(state) = wheel_states.get_mut(&button.mac) else {
                return;
            };
            *state = (*state + wheel * speed).max(min).min(max);
            *state
        };

        self.publish(
            &self.action_topic(button, ActionId::Battery),
            battery.to_string(),
            PublishOptions::retained(),
        )
        .await;
        self.publish(
            &self.action_topic(button, ActionId::Wheel),
            value.to_string(),
            PublishOptions::retained(),
        )
        .await;
    }

    /// Builds the Home Assistant descriptors of all buttons.
    ///
    /// # Errors
    ///
    /// A descriptor cannot be serialized.
    pub fn announcements(&self) -> Result<Vec<Announcement>> {
        let mut buttons: Vec<&ButtonConfig> = self.buttons.values().collect();
        buttons.sort_by(|a, b| a.mac.cmp(&b.mac));

        let mut announcements = Vec::new();
        for button in buttons {
            for &action in button.button_type.announced_actions() {
                let unique_id = format!("{}_{}", button.mac, action.name());
                let topic = self.action_topic(button, action);

                let announcement = if let Some((trigger_type, subtype)) = action.trigger() {
                    let mut config =
                        DeviceTriggerConfig::new(topic, trigger_type, subtype, button.device_info());
                    config.payload = Some(PRESSED.into());
                    Announcement::new(
                        ComponentType::DeviceTrigger,
                        MYSTROM_NODE_ID,
                        &unique_id,
                        &config,
                    )?
                } else {
                    let config = SensorConfig {
                        device: Some(button.device_info()),
                        device_class: (action == ActionId::Battery)
                            .then_some(SensorDeviceClass::Battery),
                        name: Some(format!("{} {}", button.name, action.friendly_name())),
                        state_topic: topic,
                        unique_id: Some(unique_id.clone()),
                        unit_of_measurement: (action == ActionId::Battery).then(|| "%".into()),
                        ..SensorConfig::default()
                    };
                    Announcement::new(ComponentType::Sensor, MYSTROM_NODE_ID, &unique_id, &config)?
                };
                announcements.push(announcement);
            }
        }

        Ok(announcements)
    }

    /// Publishes the Home Assistant descriptors, when discovery is enabled.
    pub async fn announce(&self) {
        if !self.home_assistant_discovery {
            return;
        }

        match self.announcements() {
            Ok(announcements) => {
                for announcement in announcements {
                    self.publish(
                        &announcement.topic,
                        announcement.payload,
                        PublishOptions::retained(),
                    )
                    .await;
                }
            }
            Err(e) => error!("Unable to build the button descriptors: {e}"),
        }
    }
}

async fn handle_button_call<B: MessageBus + 'static>(
    State(receiver): State<Arc<ButtonReceiver<B>>>,
    Query(query): Query<ButtonQuery>,
) -> ActionOutcome {
    receiver.handle_action(&query).await
}
