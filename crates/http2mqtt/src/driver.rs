use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;

use hashbrown::HashMap;

use parking_lot::Mutex;

use tokio::sync::mpsc;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::aggregator::SensorAggregator;
use crate::bus::{InboundMessage, MessageBus, PublishOptions, sensor_topic};
use crate::device::{DeviceId, SwitchClient, SwitchDetails};
use crate::error::{Error, ErrorKind, Result};
use crate::homeassistant::switch_announcements;
use crate::rate_limit::RateLimiter;
use crate::sensor::{Availability, RelayState, SensorReport, SensorType};
use crate::states::{SwitchState, SwitchStates};

// The capacity of the relay command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

// Default interval between two polls.
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);

// Default interval between two sensor publications.
const DEFAULT_SENSOR_UPDATE_INTERVAL: Duration = Duration::from_secs(300);

/// Options of a [`SwitchDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOptions {
    /// Interval between two poll cycles. It also paces discovery.
    pub polling_interval: Duration,
    /// Interval between two sensor publication cycles.
    ///
    /// Expected to be greater than the polling interval.
    pub sensor_update_interval: Duration,
    /// Prefix of all switch topics.
    pub mqtt_topic: String,
    /// Node identifier used in Home Assistant discovery topics.
    pub discovery_node_id: String,
    /// Whether Home Assistant discovery descriptors are published.
    pub home_assistant_discovery: bool,
}

impl SwitchOptions {
    /// Creates [`SwitchOptions`] with default intervals and discovery
    /// disabled.
    #[must_use]
    pub fn new(mqtt_topic: impl Into<String>, discovery_node_id: impl Into<String>) -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            sensor_update_interval: DEFAULT_SENSOR_UPDATE_INTERVAL,
            mqtt_topic: mqtt_topic.into(),
            discovery_node_id: discovery_node_id.into(),
            home_assistant_discovery: false,
        }
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Sets the sensor update interval.
    #[must_use]
    pub const fn sensor_update_interval(mut self, interval: Duration) -> Self {
        self.sensor_update_interval = interval;
        self
    }

    /// Enables or disables Home Assistant discovery.
    #[must_use]
    pub const fn home_assistant_discovery(mut self, enabled: bool) -> Self {
        self.home_assistant_discovery = enabled;
        self
    }
}

// A switch whose details have been fetched.
#[derive(Debug, Clone)]
struct Switch {
    details: SwitchDetails,
    sensor_types: &'static [SensorType],
}

impl Switch {
    fn supports(&self, sensor: SensorType) -> bool {
        self.sensor_types.contains(&sensor)
    }

    fn numeric_sensors(&self) -> impl Iterator<Item = SensorType> + '_ {
        self.sensor_types
            .iter()
            .copied()
            .filter(|sensor| sensor.is_numeric())
    }

    fn zeroed_sensors(&self) -> impl Iterator<Item = SensorType> + '_ {
        self.numeric_sensors()
            .filter(|sensor| sensor.is_zeroed_when_unavailable())
    }
}

#[derive(Debug, Default)]
struct Registry {
    switches: HashMap<DeviceId, Switch>,
    // Relay command topic to switch identifier.
    command_topics: HashMap<String, DeviceId>,
}

/// Drives a family of switches.
///
/// The driver announces the switches returned by a [`SwitchClient`],
/// polls their sensors, tracks their availability and relay state,
/// periodically publishes averaged sensor values on a [`MessageBus`],
/// and forwards relay commands received from the bus to the switches.
///
/// Every switch is handled independently: the failure of a switch is
/// logged and never interrupts the other switches nor the driver loops.
pub struct SwitchDriver<C, B>
where
    C: SwitchClient,
    B: MessageBus,
{
    client: C,
    bus: B,
    options: SwitchOptions,
    registry: Mutex<Registry>,
    states: Mutex<SwitchStates>,
    sensors: Mutex<SensorAggregator>,
    discovery_limiter: RateLimiter,
    update_limiter: RateLimiter,
    publish_limiter: RateLimiter,
}

impl<C, B> SwitchDriver<C, B>
where
    C: SwitchClient,
    B: MessageBus,
{
    /// Creates a [`SwitchDriver`].
    #[must_use]
    pub fn new(client: C, bus: B, options: SwitchOptions) -> Self {
        Self {
            discovery_limiter: RateLimiter::new(options.polling_interval),
            update_limiter: RateLimiter::new(options.polling_interval),
            publish_limiter: RateLimiter::new(options.sensor_update_interval),
            client,
            bus,
            options,
            registry: Mutex::new(Registry::default()),
            states: Mutex::new(SwitchStates::new()),
            sensors: Mutex::new(SensorAggregator::new()),
        }
    }

    /// Returns the driver options.
    #[must_use]
    pub const fn options(&self) -> &SwitchOptions {
        &self.options
    }

    /// Returns the identifiers of the announced switches.
    #[must_use]
    pub fn announced_switches(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.registry.lock().switches.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the last known state of a switch.
    #[must_use]
    pub fn switch_state(&self, id: &str) -> SwitchState {
        self.states.lock().get(id)
    }

    /// Runs the discovery, polling, publication and command loops until
    /// the token is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        info!(
            topic = %self.options.mqtt_topic,
            polling_interval = ?self.update_limiter.interval(),
            sensor_update_interval = ?self.publish_limiter.interval(),
            "Switch driver started"
        );

        let ((), (), (), ()) = tokio::join!(
            run_cycles(&token, || self.announce_switches(&sender)),
            run_cycles(&token, || self.update_switch_states()),
            run_cycles(&token, || self.publish_sensor_values()),
            self.run_commands(receiver, &token),
        );
    }

    /// Handles a relay command for a switch.
    ///
    /// The buffered sensor values of the switch are published first.
    /// The local relay state changes only when the switch confirms the
    /// command.
    ///
    /// # Errors
    ///
    /// The switch is not announced or refused the command.
    pub async fn handle_relay_command(&self, id: &str, state: RelayState) -> Result<()> {
        let switch = self.switch(id).ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("Relay command for the unannounced switch `{id}`"),
            )
        })?;

        info!(
            mac = %switch.details.mac,
            name = %switch.details.name,
            relay = %state,
            "Received relay command"
        );

        // No heartbeat here, availability is only published by the polling
        // and publication loops.
        let available = self.states.lock().is_available(id);
        self.flush_sensor_values(id, &switch, available).await;

        self.client.set_relay_state(id, state).await?;

        self.states.lock().set_relay(id, state);
        self.publish(
            &self.topic(&switch, SensorType::Relay),
            state.payload(),
            PublishOptions::default(),
        )
        .await;

        Ok(())
    }

    fn switch(&self, id: &str) -> Option<Switch> {
        self.registry.lock().switches.get(id).cloned()
    }

    fn switches(&self) -> Vec<(DeviceId, Switch)> {
        self.registry
            .lock()
            .switches
            .iter()
            .map(|(id, switch)| (id.clone(), switch.clone()))
            .collect()
    }

    fn topic(&self, switch: &Switch, sensor: SensorType) -> String {
        sensor_topic(&self.options.mqtt_topic, &switch.details.mac, sensor)
    }

    async fn publish(&self, topic: &str, payload: impl Into<String>, options: PublishOptions) {
        if let Err(e) = self.bus.publish(topic, payload.into(), options).await {
            error!(topic, "Failed to publish: {e}");
        }
    }

    async fn publish_availability(&self, switch: &Switch, availability: Availability) {
        self.publish(
            &self.topic(switch, SensorType::Availability),
            availability.payload(),
            PublishOptions::retained(),
        )
        .await;
    }

    async fn announce_switches(&self, sender: &mpsc::Sender<InboundMessage>) {
        self.discovery_limiter.acquire().await;

        let new_ids: Vec<DeviceId> = {
            let registry = self.registry.lock();
            self.client
                .switch_ids()
                .into_iter()
                .filter(|id| !registry.switches.contains_key(id))
                .collect()
        };

        let results = join_all(new_ids.iter().map(|id| self.announce_switch(id, sender))).await;
        for (id, result) in new_ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(switch = %id, "Switch unreachable during announcement: {e}");
            }
        }
    }

    async fn announce_switch(&self, id: &str, sender: &mpsc::Sender<InboundMessage>) -> Result<()> {
        let details = self.client.switch_details(id).await?.ok_or_else(|| {
            Error::new(
                ErrorKind::UnknownDevice,
                format!("No details for the switch `{id}`"),
            )
        })?;
        let switch = Switch {
            sensor_types: self.client.sensor_types(id)?,
            details,
        };

        let command_topic = self.topic(&switch, SensorType::RelayCommand);
        self.bus.subscribe(&command_topic, sender.clone()).await?;

        {
            let mut registry = self.registry.lock();
            let _ = registry.command_topics.insert(command_topic, id.into());
            let _ = registry.switches.insert(id.into(), switch.clone());
        }

        info!(
            mac = %switch.details.mac,
            name = %switch.details.name,
            "Switch announced"
        );

        if self.options.home_assistant_discovery {
            for announcement in switch_announcements(
                &switch.details,
                switch.sensor_types,
                &self.options.mqtt_topic,
                &self.options.discovery_node_id,
            )? {
                self.publish(
                    &announcement.topic,
                    announcement.payload,
                    PublishOptions::retained(),
                )
                .await;
            }
        }

        self.publish_availability(&switch, Availability::Online).await;

        Ok(())
    }

    async fn update_switch_states(&self) {
        self.update_limiter.acquire().await;

        let switches = self.switches();
        let _: Vec<()> = join_all(
            switches
                .iter()
                .map(|(id, switch)| self.update_switch_state(id, switch)),
        )
        .await;
    }

    async fn update_switch_state(&self, id: &str, switch: &Switch) {
        match self.client.sensor_report(id).await {
            Ok(Some(report)) => self.report_received(id, switch, &report).await,
            Ok(None) => {
                warn!(mac = %switch.details.mac, "Switch unreachable: no report");
                self.switch_unreachable(id, switch).await;
            }
            Err(e) => {
                warn!(mac = %switch.details.mac, "Switch unreachable: {e}");
                self.switch_unreachable(id, switch).await;
            }
        }
    }

    async fn report_received(&self, id: &str, switch: &Switch, report: &SensorReport) {
        debug!(mac = %switch.details.mac, ?report, "Fetched switch report");

        {
            let mut sensors = self.sensors.lock();
            for sensor in switch.numeric_sensors() {
                if let Some(value) = report.value(sensor) {
                    sensors.record(id, sensor, value);
                }
            }
        }

        let (relay_changed, became_available) = {
            let mut states = self.states.lock();
            let relay_changed = states.relay(id) != Some(report.relay);
            let became_available = !states.is_available(id);
            states.set_availability(id, Availability::Online);
            states.set_relay(id, report.relay);
            (relay_changed, became_available)
        };

        if relay_changed && switch.supports(SensorType::Relay) {
            info!(
                mac = %switch.details.mac,
                name = %switch.details.name,
                relay = %report.relay,
                "Switch relay changed"
            );
            self.publish(
                &self.topic(switch, SensorType::Relay),
                report.relay.payload(),
                PublishOptions::default(),
            )
            .await;
        }

        if became_available {
            info!(
                mac = %switch.details.mac,
                name = %switch.details.name,
                availability = %Availability::Online,
                "Switch availability changed"
            );
            self.publish_availability(switch, Availability::Online)
                .await;
        }
    }

    async fn switch_unreachable(&self, id: &str, switch: &Switch) {
        let (was_available, relay_was_on) = {
            let mut states = self.states.lock();
            let previous = (states.is_available(id), states.is_relay_on(id));
            states.set_availability(id, Availability::Offline);
            states.set_relay(id, RelayState::Off);
            previous
        };

        if was_available {
            info!(
                mac = %switch.details.mac,
                name = %switch.details.name,
                availability = %Availability::Offline,
                "Switch availability changed"
            );
            self.publish_availability(switch, Availability::Offline)
                .await;
        }

        if relay_was_on && switch.supports(SensorType::Relay) {
            info!(
                mac = %switch.details.mac,
                name = %switch.details.name,
                relay = %RelayState::Off,
                "Switch relay changed due to unavailability"
            );
            self.publish(
                &self.topic(switch, SensorType::Relay),
                RelayState::Off.payload(),
                PublishOptions::default(),
            )
            .await;
        }

        if !was_available {
            return;
        }

        // Values sampled while the switch was reachable go out first. No
        // heartbeat, the retained availability must stay `offline`.
        self.flush_sensor_values(id, switch, true).await;

        for sensor in switch.zeroed_sensors() {
            self.sensors.lock().record(id, sensor, 0.);
            if let Some(payload) = sensor.format_value(0.) {
                self.publish(
                    &self.topic(switch, sensor),
                    payload,
                    PublishOptions::default(),
                )
                .await;
            }
        }
    }

    async fn publish_sensor_values(&self) {
        self.publish_limiter.acquire().await;

        let switches = self.switches();
        let _: Vec<()> = join_all(
            switches
                .iter()
                .map(|(id, switch)| self.publish_switch_sensor_values(id, switch)),
        )
        .await;
    }

    async fn publish_switch_sensor_values(&self, id: &str, switch: &Switch) {
        // Heartbeat, keeps the retained availability fresh.
        self.publish_availability(switch, Availability::Online)
            .await;

        let available = self.states.lock().is_available(id);
        self.flush_sensor_values(id, switch, available).await;
    }

    async fn flush_sensor_values(&self, id: &str, switch: &Switch, available: bool) {
        debug!(mac = %switch.details.mac, available, "Flushing sensor values");

        for sensor in switch.numeric_sensors() {
            let average = self.sensors.lock().take_average(id, sensor);
            let value = match average {
                Some(value) => value,
                None if !available && sensor.is_zeroed_when_unavailable() => 0.,
                None => continue,
            };

            let Some(payload) = sensor.format_value(value) else {
                continue;
            };

            debug!(
                mac = %switch.details.mac,
                %sensor,
                value = %payload,
                "Publish sensor value"
            );
            self.publish(
                &self.topic(switch, sensor),
                payload,
                PublishOptions::default(),
            )
            .await;
        }
    }

    async fn run_commands(
        &self,
        mut receiver: mpsc::Receiver<InboundMessage>,
        token: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = token.cancelled() => { break; }
                // Commands are handled one at a time, in arrival order
                message = receiver.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    self.handle_command_message(message).await;
                }
            }
        }
    }

    async fn handle_command_message(&self, message: InboundMessage) {
        let id = self
            .registry
            .lock()
            .command_topics
            .get(&message.topic)
            .cloned();
        let Some(id) = id else {
            warn!(topic = %message.topic, "Message on an unknown command topic, discard it");
            return;
        };

        let Some(state) = RelayState::from_payload(message.payload.trim()) else {
            warn!(
                topic = %message.topic,
                payload = %message.payload,
                "Invalid relay command, discard it"
            );
            return;
        };

        if let Err(e) = self.handle_relay_command(&id, state).await {
            error!(switch = %id, relay = %state, "Failed to set relay state: {e}");
        }
    }
}

// Repeats a cycle until the token is cancelled. A cycle interrupted by the
// cancellation is dropped.
async fn run_cycles<F, Fut>(token: &CancellationToken, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            () = token.cancelled() => { break; }
            () = cycle() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::sleep;

    use tokio_util::sync::CancellationToken;

    use crate::bus::InboundMessage;
    use crate::error::ErrorKind;
    use crate::sensor::{Availability, RelayState, SensorReport, SensorType};
    use crate::tests::{FakeSwitchClient, MemoryBus};

    use super::{SwitchDriver, SwitchOptions};

    const PREFIX: &str = "test/switches";
    const ID: &str = "10.0.0.1";
    const MAC: &str = "AABBCCDDEE01";

    const FULL_SENSORS: &[SensorType] = &[
        SensorType::Power,
        SensorType::Amperage,
        SensorType::Temperature,
        SensorType::Relay,
    ];
    const POWER_SENSORS: &[SensorType] =
        &[SensorType::Power, SensorType::Temperature, SensorType::Relay];
    const RELAY_SENSORS: &[SensorType] = &[SensorType::Relay];

    type Driver = SwitchDriver<FakeSwitchClient, MemoryBus>;

    fn options() -> SwitchOptions {
        SwitchOptions::new(PREFIX, "test")
            .polling_interval(Duration::from_secs(1))
            .sensor_update_interval(Duration::from_secs(300))
    }

    fn driver(client: FakeSwitchClient, options: SwitchOptions) -> (Driver, MemoryBus) {
        let bus = MemoryBus::default();
        (SwitchDriver::new(client, bus.clone(), options), bus)
    }

    fn topic(mac: &str, sensor: SensorType) -> String {
        format!("{PREFIX}/{mac}/{}", sensor.key())
    }

    async fn announce(driver: &Driver) -> mpsc::Receiver<InboundMessage> {
        let (sender, receiver) = mpsc::channel(8);
        driver.announce_switches(&sender).await;
        receiver
    }

    #[tokio::test(start_paused = true)]
    async fn first_report_publishes_relay_and_availability_once() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On).power(10.));
        let (driver, bus) = driver(client, options());

        let _receiver = announce(&driver).await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);
        bus.clear();

        driver.update_switch_states().await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["on"]);
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);
        assert!(
            bus.published()
                .iter()
                .filter(|message| message.topic.ends_with("/available"))
                .all(|message| message.options.retain)
        );

        let state = driver.switch_state(ID);
        assert_eq!(state.availability, Some(Availability::Online));
        assert_eq!(state.relay, Some(RelayState::On));

        // An unchanged report publishes nothing.
        bus.clear();
        driver.update_switch_states().await;
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn relay_is_published_once_per_change() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On));
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        driver.update_switch_states().await;
        driver.update_switch_states().await;

        driver.client.set_report(ID, SensorReport::new(RelayState::Off));
        driver.update_switch_states().await;
        driver.update_switch_states().await;

        driver.client.set_report(ID, SensorReport::new(RelayState::On));
        driver.update_switch_states().await;

        assert_eq!(
            bus.published_to(&topic(MAC, SensorType::Relay)),
            ["on", "off", "on"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unavailability_is_published_once() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, FULL_SENSORS);
        client.set_report(
            ID,
            SensorReport::new(RelayState::On)
                .power(10.)
                .amperage(0.5)
                .temperature(30.),
        );
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        driver.update_switch_states().await;
        bus.clear();

        driver.client.set_unreachable(ID, true);
        driver.update_switch_states().await;

        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["offline"]);
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["off"]);
        // Buffered values are flushed, then zeroed sensors report zero.
        assert_eq!(
            bus.published_to(&topic(MAC, SensorType::Power)),
            ["10.000", "0.000"]
        );
        assert_eq!(
            bus.published_to(&topic(MAC, SensorType::Amperage)),
            ["0.500", "0.000"]
        );
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Temperature)), ["30.00"]);

        let state = driver.switch_state(ID);
        assert_eq!(state.availability, Some(Availability::Offline));
        assert_eq!(state.relay, Some(RelayState::Off));

        // Further failures are silent.
        bus.clear();
        driver.update_switch_states().await;
        driver.update_switch_states().await;
        assert!(bus.published().is_empty());

        // The next publication reports the injected zeros.
        driver.publish_sensor_values().await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Power)), ["0.000"]);
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Amperage)), ["0.000"]);
        assert!(bus.published_to(&topic(MAC, SensorType::Temperature)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_publishes_availability_once() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, RELAY_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On));
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        driver.update_switch_states().await;
        driver.client.set_unreachable(ID, true);
        driver.update_switch_states().await;
        bus.clear();

        driver.client.set_unreachable(ID, false);
        driver.update_switch_states().await;
        driver.update_switch_states().await;

        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["on"]);
        assert!(driver.switch_state(ID).availability == Some(Availability::Online));
    }

    #[tokio::test(start_paused = true)]
    async fn absent_report_means_unreachable() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, RELAY_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::Off));
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        driver.update_switch_states().await;
        bus.clear();

        driver.client.clear_report(ID);
        driver.update_switch_states().await;

        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["offline"]);
        // The relay was already off.
        assert!(bus.published_to(&topic(MAC, SensorType::Relay)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_values_are_averaged() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On).power(10.));
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        driver.update_switch_states().await;
        driver
            .client
            .set_report(ID, SensorReport::new(RelayState::On).power(20.));
        driver.update_switch_states().await;
        bus.clear();

        driver.publish_sensor_values().await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Power)), ["15.000"]);
        // Heartbeat.
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);

        // An empty window of an available switch publishes nothing.
        bus.clear();
        driver.publish_sensor_values().await;
        assert!(bus.published_to(&topic(MAC, SensorType::Power)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_sensors_are_never_published() {
        const OTHER_ID: &str = "10.0.0.2";
        const OTHER_MAC: &str = "AABBCCDDEE02";

        let client = FakeSwitchClient::default()
            .with_switch(ID, MAC, RELAY_SENSORS)
            .with_switch(OTHER_ID, OTHER_MAC, &[SensorType::Power, SensorType::Relay]);
        let report = SensorReport::new(RelayState::On).power(5.).temperature(20.);
        client.set_report(ID, report);
        client.set_report(OTHER_ID, report);
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;
        assert_eq!(driver.announced_switches(), [ID, OTHER_ID]);

        driver.update_switch_states().await;
        driver.publish_sensor_values().await;

        driver.client.set_unreachable(ID, true);
        driver.client.set_unreachable(OTHER_ID, true);
        driver.update_switch_states().await;
        driver.publish_sensor_values().await;

        assert!(bus.published_to(&topic(MAC, SensorType::Power)).is_empty());
        assert!(bus.published_to(&topic(MAC, SensorType::Temperature)).is_empty());
        assert!(bus.published_to(&topic(OTHER_MAC, SensorType::Temperature)).is_empty());
        assert_eq!(
            bus.published_to(&topic(OTHER_MAC, SensorType::Power)),
            ["5.000", "0.000", "0.000"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_switch_publishes_zeroed_sensors_only() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        client.set_unreachable(ID, true);
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;

        // Never seen online, so the transition is silent.
        driver.update_switch_states().await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);
        bus.clear();

        driver.publish_sensor_values().await;
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Power)), ["0.000"]);
        assert!(bus.published_to(&topic(MAC, SensorType::Temperature)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_relay_command_keeps_the_state() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, RELAY_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::Off));
        client.fail_relay(ID, true);
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;
        driver.update_switch_states().await;
        bus.clear();

        let error = driver
            .handle_relay_command(ID, RelayState::On)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Device);
        assert!(bus.published_to(&topic(MAC, SensorType::Relay)).is_empty());
        assert_eq!(driver.switch_state(ID).relay, Some(RelayState::Off));

        driver.client.fail_relay(ID, false);
        driver.handle_relay_command(ID, RelayState::On).await.unwrap();
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["on"]);
        assert_eq!(driver.switch_state(ID).relay, Some(RelayState::On));
        assert_eq!(driver.client.relay_commands(ID), [RelayState::On]);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_command_flushes_sensor_values() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::Off).power(2.));
        let (driver, bus) = driver(client, options());
        let _receiver = announce(&driver).await;
        driver.update_switch_states().await;
        bus.clear();

        driver.handle_relay_command(ID, RelayState::On).await.unwrap();

        assert_eq!(bus.published_to(&topic(MAC, SensorType::Power)), ["2.000"]);
        // The flush carries no availability heartbeat.
        let topics: Vec<String> = bus
            .published()
            .into_iter()
            .map(|message| message.topic)
            .collect();
        assert_eq!(
            topics,
            [topic(MAC, SensorType::Power), topic(MAC, SensorType::Relay)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn relay_command_for_unknown_switch() {
        let (driver, bus) = driver(FakeSwitchClient::default(), options());

        let error = driver
            .handle_relay_command(ID, RelayState::On)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::UnknownDevice);
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn announcement_is_retried() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, RELAY_SENSORS);
        client.set_details_available(ID, false);
        let (driver, bus) = driver(client, options());

        let _receiver = announce(&driver).await;
        assert!(driver.announced_switches().is_empty());
        assert!(bus.published().is_empty());

        driver.client.set_details_available(ID, true);
        let _receiver = announce(&driver).await;
        assert_eq!(driver.announced_switches(), [ID]);
        assert!(bus.is_subscribed(&topic(MAC, SensorType::RelayCommand)));
        assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);

        // Announced switches are not announced again.
        bus.clear();
        let _receiver = announce(&driver).await;
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn home_assistant_descriptors() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, POWER_SENSORS);
        let (driver, bus) = driver(client, options().home_assistant_discovery(true));

        let _receiver = announce(&driver).await;

        let retained: Vec<String> = bus
            .published()
            .into_iter()
            .filter(|message| message.options.retain)
            .map(|message| message.topic)
            .collect();
        assert_eq!(
            retained,
            [
                format!("homeassistant/sensor/test/{MAC}_power/config"),
                format!("homeassistant/sensor/test/{MAC}_temperature/config"),
                format!("homeassistant/switch/test/{MAC}_relay/config"),
                topic(MAC, SensorType::Availability),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_handles_commands_until_cancelled() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, RELAY_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::Off));
        let (driver, bus) = driver(client, options());
        let token = CancellationToken::new();

        let command_topic = topic(MAC, SensorType::RelayCommand);
        let ((), ()) = tokio::join!(driver.run(token.clone()), async {
            sleep(Duration::from_millis(10)).await;
            bus.deliver(&command_topic, "toggle").await;
            bus.deliver(&command_topic, " on\n").await;
            sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        assert_eq!(driver.client.relay_commands(ID), [RelayState::On]);
        assert_eq!(
            bus.published_to(&topic(MAC, SensorType::Relay)).last(),
            Some(&"on".to_string())
        );
        assert_eq!(driver.switch_state(ID).relay, Some(RelayState::On));
    }

    fn paced_options() -> SwitchOptions {
        options().sensor_update_interval(Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn run_paces_the_polling_and_publish_loops() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, FULL_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On).power(10.).amperage(1.));
        let (driver, bus) = driver(client, paced_options());
        let token = CancellationToken::new();

        let ((), ()) = tokio::join!(driver.run(token.clone()), async {
            // Checkpoints sit between two slots of both loops.
            sleep(Duration::from_millis(500)).await;
            let fetches = driver.client.report_fetches(ID);
            bus.clear();

            sleep(Duration::from_secs(9)).await;
            assert_eq!(driver.client.report_fetches(ID), fetches + 9);
            assert!(bus.published_to(&topic(MAC, SensorType::Availability)).is_empty());
            assert!(bus.published_to(&topic(MAC, SensorType::Power)).is_empty());

            sleep(Duration::from_secs(1)).await;
            assert_eq!(driver.client.report_fetches(ID), fetches + 10);
            assert_eq!(bus.published_to(&topic(MAC, SensorType::Availability)), ["online"]);
            assert_eq!(bus.published_to(&topic(MAC, SensorType::Power)), ["10.000"]);
            assert_eq!(bus.published_to(&topic(MAC, SensorType::Amperage)), ["1.000"]);

            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_the_offline_transition_once() {
        let client = FakeSwitchClient::default().with_switch(ID, MAC, FULL_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On).power(10.).amperage(1.));
        let (driver, bus) = driver(client, paced_options());
        let token = CancellationToken::new();

        let availability = topic(MAC, SensorType::Availability);
        let power = topic(MAC, SensorType::Power);
        let amperage = topic(MAC, SensorType::Amperage);

        let ((), ()) = tokio::join!(driver.run(token.clone()), async {
            sleep(Duration::from_millis(500)).await;
            bus.clear();

            sleep(Duration::from_secs(3)).await;
            driver.client.set_unreachable(ID, true);

            // The transition flushes the buffered values, then the zeroes,
            // and leaves `offline` as the last availability.
            sleep(Duration::from_secs(1)).await;
            assert_eq!(bus.published_to(&availability), ["offline"]);
            assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["off"]);
            assert_eq!(bus.published_to(&power), ["10.000", "0.000"]);
            assert_eq!(bus.published_to(&amperage), ["1.000", "0.000"]);

            // Later polls of the unreachable switch publish nothing.
            sleep(Duration::from_secs(5)).await;
            assert_eq!(bus.published_to(&availability), ["offline"]);
            assert_eq!(bus.published_to(&power), ["10.000", "0.000"]);

            // The publish cycle keeps its heartbeat and the zeroed values.
            sleep(Duration::from_secs(1)).await;
            assert_eq!(bus.published_to(&availability), ["offline", "online"]);
            assert_eq!(bus.published_to(&power), ["10.000", "0.000", "0.000"]);
            assert_eq!(bus.published_to(&amperage), ["1.000", "0.000", "0.000"]);

            token.cancel();
        });

        assert_eq!(driver.switch_state(ID).availability, Some(Availability::Offline));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_switch_does_not_delay_its_siblings() {
        const SLOW_ID: &str = "10.0.0.2";
        const SLOW_MAC: &str = "AABBCCDDEE02";

        let client = FakeSwitchClient::default()
            .with_switch(ID, MAC, RELAY_SENSORS)
            .with_switch(SLOW_ID, SLOW_MAC, RELAY_SENSORS);
        client.set_report(ID, SensorReport::new(RelayState::On));
        client.set_report(SLOW_ID, SensorReport::new(RelayState::On));
        client.set_report_delay(SLOW_ID, Duration::from_secs(30));
        let (driver, bus) = driver(client, options());
        let token = CancellationToken::new();

        let ((), ()) = tokio::join!(driver.run(token.clone()), async {
            sleep(Duration::from_millis(1500)).await;

            assert_eq!(bus.published_to(&topic(MAC, SensorType::Relay)), ["on"]);
            assert_eq!(driver.switch_state(ID).relay, Some(RelayState::On));

            // The slow switch is still answering its first poll.
            assert!(bus.published_to(&topic(SLOW_MAC, SensorType::Relay)).is_empty());
            assert!(
                !bus.published_to(&topic(SLOW_MAC, SensorType::Availability))
                    .contains(&"offline".to_string())
            );
            assert_eq!(driver.switch_state(SLOW_ID).relay, None);

            token.cancel();
        });
    }
}
