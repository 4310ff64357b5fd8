use hashbrown::HashMap;

use crate::device::DeviceId;
use crate::sensor::{Availability, RelayState};

/// Last known state of a switch.
///
/// Both fields are undefined until the switch is polled for the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchState {
    /// Last known availability.
    pub availability: Option<Availability>,
    /// Last known relay state.
    pub relay: Option<RelayState>,
}

/// In-memory table of switch states.
///
/// Entries are created on first access and never removed.
#[derive(Debug, Default)]
pub struct SwitchStates {
    states: HashMap<DeviceId, SwitchState>,
}

impl SwitchStates {
    /// Creates an empty [`SwitchStates`] table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, device: &str) -> &mut SwitchState {
        self.states.entry_ref(device).or_default()
    }

    /// Returns the state of a switch.
    pub fn get(&mut self, device: &str) -> SwitchState {
        *self.entry(device)
    }

    /// Sets the availability of a switch.
    pub fn set_availability(&mut self, device: &str, availability: Availability) {
        self.entry(device).availability = Some(availability);
    }

    /// Returns the availability of a switch.
    pub fn availability(&mut self, device: &str) -> Option<Availability> {
        self.entry(device).availability
    }

    /// Whether a switch is [`Availability::Online`].
    pub fn is_available(&mut self, device: &str) -> bool {
        self.availability(device) == Some(Availability::Online)
    }

    /// Sets the relay state of a switch.
    pub fn set_relay(&mut self, device: &str, relay: RelayState) {
        self.entry(device).relay = Some(relay);
    }

    /// Returns the relay state of a switch.
    pub fn relay(&mut self, device: &str) -> Option<RelayState> {
        self.entry(device).relay
    }

    /// Whether the relay of a switch is [`RelayState::On`].
    pub fn is_relay_on(&mut self, device: &str) -> bool {
        self.relay(device) == Some(RelayState::On)
    }
}
