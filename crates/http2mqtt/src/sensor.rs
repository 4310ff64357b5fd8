use serde::{Deserialize, Serialize};

/// All sensor kinds exposed by a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Instantaneous power in Watt.
    Power,
    /// Instantaneous current in Ampere.
    Amperage,
    /// Device temperature in degrees Celsius.
    Temperature,
    /// Relay state, polled from the device.
    Relay,
    /// Inbound relay commands. Never polled.
    RelayCommand,
    /// Availability derived from polling outcomes. Never polled.
    Availability,
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.friendly_name().fmt(f)
    }
}

impl SensorType {
    /// Returns the topic segment of the sensor.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Amperage => "amperage",
            Self::Temperature => "temperature",
            Self::Relay => "relay",
            Self::RelayCommand => "relay_command",
            Self::Availability => "available",
        }
    }

    /// Returns a human readable name of the sensor.
    #[must_use]
    pub const fn friendly_name(self) -> &'static str {
        match self {
            Self::Power => "Power",
            Self::Amperage => "Amperage",
            Self::Temperature => "Temperature",
            Self::Relay => "Relay",
            Self::RelayCommand => "Relay Command",
            Self::Availability => "Availability",
        }
    }

    /// Returns the number of decimal places of a published value.
    ///
    /// Only numeric sensors have a precision.
    #[must_use]
    pub const fn precision(self) -> Option<usize> {
        match self {
            Self::Power | Self::Amperage => Some(3),
            Self::Temperature => Some(2),
            Self::Relay | Self::RelayCommand | Self::Availability => None,
        }
    }

    /// Whether the sensor carries numeric samples.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        self.precision().is_some()
    }

    /// Whether the sensor is reported as `0` while its switch is unavailable.
    #[must_use]
    pub const fn is_zeroed_when_unavailable(self) -> bool {
        matches!(self, Self::Power | Self::Amperage)
    }

    /// Formats a value with the sensor precision.
    ///
    /// Returns [`None`] for non-numeric sensors.
    #[must_use]
    pub fn format_value(self, value: f64) -> Option<String> {
        self.precision()
            .map(|precision| format!("{value:.precision$}"))
    }
}

/// The state of a switch relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// The relay is closed.
    On,
    /// The relay is open.
    Off,
}

impl From<bool> for RelayState {
    fn from(is_on: bool) -> Self {
        if is_on { Self::On } else { Self::Off }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.payload().fmt(f)
    }
}

impl RelayState {
    /// Returns the message payload of the relay state.
    #[must_use]
    pub const fn payload(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    /// Parses a relay state from a message payload.
    #[must_use]
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// The availability of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// The last poll succeeded.
    Online,
    /// The last poll failed.
    Offline,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.payload().fmt(f)
    }
}

impl Availability {
    /// Returns the message payload of the availability.
    #[must_use]
    pub const fn payload(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// A sensor report fetched from a switch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    /// Relay state.
    pub relay: RelayState,
    /// Power in Watt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    /// Current in Ampere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amperage: Option<f64>,
    /// Temperature in degrees Celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl SensorReport {
    /// Creates a [`SensorReport`] carrying only a relay state.
    #[must_use]
    pub const fn new(relay: RelayState) -> Self {
        Self {
            relay,
            power: None,
            amperage: None,
            temperature: None,
        }
    }

    /// Sets the power value.
    #[must_use]
    pub const fn power(mut self, power: f64) -> Self {
        self.power = Some(power);
        self
    }

    /// Sets the amperage value.
    #[must_use]
    pub const fn amperage(mut self, amperage: f64) -> Self {
        self.amperage = Some(amperage);
        self
    }

    /// Sets the temperature value.
    #[must_use]
    pub const fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Returns the reported value of a numeric sensor.
    #[must_use]
    pub const fn value(&self, sensor: SensorType) -> Option<f64> {
        match sensor {
            SensorType::Power => self.power,
            SensorType::Amperage => self.amperage,
            SensorType::Temperature => self.temperature,
            SensorType::Relay | SensorType::RelayCommand | SensorType::Availability => None,
        }
    }
}
