use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sensor::{RelayState, SensorReport, SensorType};

/// An opaque identifier of a physical switch, such as its host address.
///
/// It is unique and stable for the whole lifetime of the process.
pub type DeviceId = String;

/// Static switch metadata, fetched once when a switch is announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchDetails {
    /// Configured display name.
    pub name: String,
    /// Connection address.
    pub host: String,
    /// Hardware identifier.
    pub mac: String,
    /// IP address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Device model name.
    pub device_name: String,
    /// Device model type.
    pub device_type: String,
    /// Device manufacturer.
    pub manufacturer: String,
    /// Firmware version, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// The contract a switch family implements to be driven by a
/// [`crate::driver::SwitchDriver`].
pub trait SwitchClient: Send + Sync {
    /// Returns the identifiers of all configured switches.
    fn switch_ids(&self) -> Vec<DeviceId>;

    /// Fetches the static metadata of a switch.
    ///
    /// [`None`] means the switch is unknown and must be retried later.
    fn switch_details(&self, id: &str)
    -> impl Future<Output = Result<Option<SwitchDetails>>> + Send;

    /// Returns the sensor types supported by a switch.
    ///
    /// # Errors
    ///
    /// An error is returned when the switch is not configured.
    fn sensor_types(&self, id: &str) -> Result<&'static [SensorType]>;

    /// Fetches the current sensor report of a switch.
    ///
    /// Both an error and [`None`] mean the switch is unreachable.
    fn sensor_report(&self, id: &str)
    -> impl Future<Output = Result<Option<SensorReport>>> + Send;

    /// Changes the relay state of a switch.
    fn set_relay_state(&self, id: &str, state: RelayState)
    -> impl Future<Output = Result<()>> + Send;
}
