//! Home Assistant `MQTT` discovery descriptors.
//!
//! A descriptor is a JSON document published, retained, on
//! `homeassistant/<component>/<node id>/<object id>/config`. Home Assistant
//! reads it to create an entity bound to the state topics of a device.

use serde::Serialize;

use crate::bus::sensor_topic;
use crate::device::SwitchDetails;
use crate::error::Result;
use crate::sensor::{Availability, RelayState, SensorType};

/// The discovery topic prefix.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Home Assistant component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// A sensor reporting a value.
    Sensor,
    /// A sensor reporting an on/off value.
    BinarySensor,
    /// A controllable switch.
    Switch,
    /// A trigger usable in device automations.
    #[serde(rename = "device_automation")]
    DeviceTrigger,
}

impl ComponentType {
    /// Returns the topic segment of the component.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Switch => "switch",
            Self::DeviceTrigger => "device_automation",
        }
    }
}

/// Sensor device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDeviceClass {
    /// Battery level in percent.
    Battery,
    /// Relative humidity.
    Humidity,
    /// Light level.
    Illuminance,
    /// Signal strength.
    SignalStrength,
    /// Temperature.
    Temperature,
    /// Power.
    Power,
    /// Pressure.
    Pressure,
    /// Timestamp.
    Timestamp,
}

/// Device trigger types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTriggerType {
    /// A short press.
    ButtonShortPress,
    /// A short press release.
    ButtonShortRelease,
    /// A long press.
    ButtonLongPress,
    /// A long press release.
    ButtonLongRelease,
    /// A double press.
    ButtonDoublePress,
    /// A triple press.
    ButtonTriplePress,
}

/// Device trigger subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTriggerSubtype {
    /// Turn on.
    TurnOn,
    /// Turn off.
    TurnOff,
    /// First button.
    #[serde(rename = "button_1")]
    Button1,
    /// Second button.
    #[serde(rename = "button_2")]
    Button2,
    /// Third button.
    #[serde(rename = "button_3")]
    Button3,
    /// Fourth button.
    #[serde(rename = "button_4")]
    Button4,
}

/// The device block shared by all entities of a physical device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Connections, such as `["mac", "AA:BB:CC:DD:EE:FF"]`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<(String, String)>,
    /// Unique identifiers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    /// Manufacturer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Firmware version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    /// Identifier of a device routing messages for this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
}

impl DeviceInfo {
    /// Creates a [`DeviceInfo`] identified by a `MAC` address.
    #[must_use]
    pub fn with_mac(mac: &str) -> Self {
        Self {
            connections: format_mac_address(mac)
                .map(|mac| vec![("mac".into(), mac)])
                .unwrap_or_default(),
            identifiers: vec![mac.into()],
            ..Self::default()
        }
    }
}

/// Sensor descriptor.
///
/// Fields are named after the Home Assistant configuration keys.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<SensorDeviceClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_update: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_not_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
}

/// Switch descriptor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwitchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_not_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
}

/// Device trigger descriptor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceTriggerConfig {
    automation_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    pub topic: String,
    #[serde(rename = "type")]
    pub trigger_type: DeviceTriggerType,
    pub subtype: DeviceTriggerSubtype,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
}

impl DeviceTriggerConfig {
    /// Creates a [`DeviceTriggerConfig`].
    #[must_use]
    pub fn new(
        topic: String,
        trigger_type: DeviceTriggerType,
        subtype: DeviceTriggerSubtype,
        device: DeviceInfo,
    ) -> Self {
        Self {
            automation_type: "trigger",
            payload: None,
            qos: None,
            topic,
            trigger_type,
            subtype,
            device,
            unique_id: None,
        }
    }
}

/// A marshalled descriptor, ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Discovery topic.
    pub topic: String,
    /// JSON descriptor.
    pub payload: String,
}

impl Announcement {
    /// Marshals a descriptor for the given component and object.
    ///
    /// # Errors
    ///
    /// The descriptor cannot be serialized.
    pub fn new<T: Serialize>(
        component: ComponentType,
        node_id: &str,
        object_id: &str,
        config: &T,
    ) -> Result<Self> {
        Ok(Self {
            topic: discovery_topic(component, node_id, object_id),
            payload: serde_json::to_string_pretty(config)?,
        })
    }
}

/// Builds a discovery topic.
#[must_use]
pub fn discovery_topic(component: ComponentType, node_id: &str, object_id: &str) -> String {
    format!(
        "{DISCOVERY_PREFIX}/{}/{node_id}/{object_id}/config",
        component.as_str()
    )
}

/// Formats a `MAC` address as colon separated byte pairs.
///
/// An odd trailing digit is dropped. Returns [`None`] when no pair exists.
#[must_use]
pub fn format_mac_address(mac: &str) -> Option<String> {
    let digits: Vec<char> = mac.chars().collect();
    let pairs: Vec<String> = digits
        .chunks_exact(2)
        .map(|pair| pair.iter().collect())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join(":"))
    }
}

const fn sensor_unit(sensor: SensorType) -> Option<&'static str> {
    match sensor {
        SensorType::Power => Some("W"),
        SensorType::Amperage => Some("A"),
        SensorType::Temperature => Some("°C"),
        SensorType::Relay | SensorType::RelayCommand | SensorType::Availability => None,
    }
}

const fn sensor_device_class(sensor: SensorType) -> Option<SensorDeviceClass> {
    match sensor {
        SensorType::Power => Some(SensorDeviceClass::Power),
        SensorType::Temperature => Some(SensorDeviceClass::Temperature),
        SensorType::Amperage
        | SensorType::Relay
        | SensorType::RelayCommand
        | SensorType::Availability => None,
    }
}

fn switch_device_info(details: &SwitchDetails) -> DeviceInfo {
    DeviceInfo {
        manufacturer: Some(details.manufacturer.clone()),
        model: Some(details.device_name.clone()),
        name: Some(details.name.clone()),
        sw_version: details.firmware_version.clone(),
        ..DeviceInfo::with_mac(&details.mac)
    }
}

/// Builds the descriptors announcing the sensors of a switch.
///
/// Numeric sensors become [`ComponentType::Sensor`] entities, the relay
/// becomes a [`ComponentType::Switch`] entity. Command and availability
/// channels are part of those entities and are not announced on their own.
///
/// # Errors
///
/// A descriptor cannot be serialized.
pub fn switch_announcements(
    details: &SwitchDetails,
    sensor_types: &[SensorType],
    topic_prefix: &str,
    node_id: &str,
) -> Result<Vec<Announcement>> {
    let availability_topic = sensor_topic(topic_prefix, &details.mac, SensorType::Availability);

    let mut announcements = Vec::with_capacity(sensor_types.len());
    for &sensor in sensor_types {
        let unique_id = format!("{}_{}", details.mac, sensor.key());
        let name = format!("{} {}", details.name, sensor.friendly_name());
        let state_topic = sensor_topic(topic_prefix, &details.mac, sensor);

        let announcement = match sensor {
            SensorType::Power | SensorType::Amperage | SensorType::Temperature => {
                let config = SensorConfig {
                    availability_topic: Some(availability_topic.clone()),
                    device: Some(switch_device_info(details)),
                    device_class: sensor_device_class(sensor),
                    force_update: Some(true),
                    name: Some(name),
                    payload_available: Some(Availability::Online.payload().into()),
                    payload_not_available: Some(Availability::Offline.payload().into()),
                    state_topic,
                    unique_id: Some(unique_id.clone()),
                    unit_of_measurement: sensor_unit(sensor).map(Into::into),
                    ..SensorConfig::default()
                };
                Announcement::new(ComponentType::Sensor, node_id, &unique_id, &config)?
            }
            SensorType::Relay => {
                let config = SwitchConfig {
                    availability_topic: Some(availability_topic.clone()),
                    command_topic: Some(sensor_topic(
                        topic_prefix,
                        &details.mac,
                        SensorType::RelayCommand,
                    )),
                    device: Some(switch_device_info(details)),
                    name: Some(name),
                    payload_available: Some(Availability::Online.payload().into()),
                    payload_not_available: Some(Availability::Offline.payload().into()),
                    payload_off: Some(RelayState::Off.payload().into()),
                    payload_on: Some(RelayState::On.payload().into()),
                    state_off: Some(RelayState::Off.payload().into()),
                    state_on: Some(RelayState::On.payload().into()),
                    state_topic: Some(state_topic),
                    unique_id: Some(unique_id.clone()),
                    ..SwitchConfig::default()
                };
                Announcement::new(ComponentType::Switch, node_id, &unique_id, &config)?
            }
            SensorType::RelayCommand | SensorType::Availability => continue,
        };
        announcements.push(announcement);
    }

    Ok(announcements)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::device::SwitchDetails;
    use crate::sensor::SensorType;

    use super::{
        ComponentType, DeviceInfo, DeviceTriggerConfig, DeviceTriggerSubtype, DeviceTriggerType,
        discovery_topic, format_mac_address, switch_announcements,
    };

    fn details() -> SwitchDetails {
        SwitchDetails {
            name: "Kitchen".into(),
            host: "10.0.0.2".into(),
            mac: "AABBCCDDEEFF".into(),
            ip: Some("10.0.0.2".into()),
            device_name: "WS2".into(),
            device_type: "106".into(),
            manufacturer: "myStrom AG".into(),
            firmware_version: Some("3.82.60".into()),
        }
    }

    #[test]
    fn mac_formatting() {
        assert_eq!(
            format_mac_address("AABBCCDDEEFF").as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
        assert_eq!(format_mac_address("ABC").as_deref(), Some("AB"));
        assert_eq!(format_mac_address("A"), None);
        assert_eq!(format_mac_address(""), None);
    }

    #[test]
    fn topics() {
        assert_eq!(
            discovery_topic(ComponentType::DeviceTrigger, "mystrom", "AABB_single"),
            "homeassistant/device_automation/mystrom/AABB_single/config"
        );
        assert_eq!(
            discovery_topic(ComponentType::BinarySensor, "node", "object"),
            "homeassistant/binary_sensor/node/object/config"
        );
    }

    #[test]
    fn switch_sensors() {
        let announcements = switch_announcements(
            &details(),
            &[
                SensorType::Power,
                SensorType::Temperature,
                SensorType::Relay,
                SensorType::Availability,
            ],
            "prefix",
            "mystrom",
        )
        .unwrap();

        // Availability is not an entity on its own.
        assert_eq!(announcements.len(), 3);

        let power = &announcements[0];
        assert_eq!(
            power.topic,
            "homeassistant/sensor/mystrom/AABBCCDDEEFF_power/config"
        );
        assert_eq!(
            serde_json::from_str::<Value>(&power.payload).unwrap(),
            json!({
                "availability_topic": "prefix/AABBCCDDEEFF/available",
                "device": {
                    "connections": [["mac", "AA:BB:CC:DD:EE:FF"]],
                    "identifiers": ["AABBCCDDEEFF"],
                    "manufacturer": "myStrom AG",
                    "model": "WS2",
                    "name": "Kitchen",
                    "sw_version": "3.82.60",
                },
                "device_class": "power",
                "force_update": true,
                "name": "Kitchen Power",
                "payload_available": "online",
                "payload_not_available": "offline",
                "state_topic": "prefix/AABBCCDDEEFF/power",
                "unique_id": "AABBCCDDEEFF_power",
                "unit_of_measurement": "W",
            })
        );

        let relay = &announcements[2];
        assert_eq!(
            relay.topic,
            "homeassistant/switch/mystrom/AABBCCDDEEFF_relay/config"
        );
        let relay = serde_json::from_str::<Value>(&relay.payload).unwrap();
        assert_eq!(relay["command_topic"], "prefix/AABBCCDDEEFF/relay_command");
        assert_eq!(relay["state_topic"], "prefix/AABBCCDDEEFF/relay");
        assert_eq!(relay["payload_on"], "on");
        assert_eq!(relay["state_off"], "off");
    }

    #[test]
    fn amperage_has_no_device_class() {
        let announcements =
            switch_announcements(&details(), &[SensorType::Amperage], "prefix", "node").unwrap();

        let amperage = serde_json::from_str::<Value>(&announcements[0].payload).unwrap();
        assert!(amperage.get("device_class").is_none());
        assert_eq!(amperage["unit_of_measurement"], "A");
    }

    #[test]
    fn device_trigger() {
        let trigger = DeviceTriggerConfig::new(
            "mystrom/wifi_buttons/AABB/single".into(),
            DeviceTriggerType::ButtonShortPress,
            DeviceTriggerSubtype::Button1,
            DeviceInfo::with_mac("AABB"),
        );

        assert_eq!(
            serde_json::to_value(&trigger).unwrap(),
            json!({
                "automation_type": "trigger",
                "topic": "mystrom/wifi_buttons/AABB/single",
                "type": "button_short_press",
                "subtype": "button_1",
                "device": {
                    "connections": [["mac", "AA:BB"]],
                    "identifiers": ["AABB"],
                },
            })
        );
    }
}
