use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;

use parking_lot::Mutex;

use tokio::sync::mpsc;

use crate::bus::{InboundMessage, MessageBus, PublishOptions};
use crate::device::{DeviceId, SwitchClient, SwitchDetails};
use crate::error::{Error, ErrorKind, Result};
use crate::sensor::{RelayState, SensorReport, SensorType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub(crate) topic: String,
    pub(crate) payload: String,
    pub(crate) options: PublishOptions,
}

#[derive(Debug, Default)]
struct MemoryBusInner {
    published: Vec<Published>,
    subscriptions: HashMap<String, mpsc::Sender<InboundMessage>>,
}

// A message bus recording every publication.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
}

impl MemoryBus {
    pub(crate) fn published(&self) -> Vec<Published> {
        self.inner.lock().published.clone()
    }

    pub(crate) fn published_to(&self, topic: &str) -> Vec<String> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.inner.lock().published.clear();
    }

    pub(crate) fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.lock().subscriptions.contains_key(topic)
    }

    // Delivers a message to the subscriber of a topic, if any.
    pub(crate) async fn deliver(&self, topic: &str, payload: &str) {
        let sender = self.inner.lock().subscriptions.get(topic).cloned();
        if let Some(sender) = sender {
            sender
                .send(InboundMessage::new(topic, payload))
                .await
                .unwrap();
        }
    }
}

impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String, options: PublishOptions) -> Result<()> {
        self.inner.lock().published.push(Published {
            topic: topic.into(),
            payload,
            options,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, sender: mpsc::Sender<InboundMessage>) -> Result<()> {
        let _ = self
            .inner
            .lock()
            .subscriptions
            .insert(topic.into(), sender);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeSwitch {
    mac: String,
    sensor_types: &'static [SensorType],
    details_available: bool,
    reachable: bool,
    report: Option<SensorReport>,
    relay_fails: bool,
    relay_commands: Vec<RelayState>,
    report_delay: Option<Duration>,
    report_fetches: usize,
}

// A switch client answering with scripted values.
#[derive(Debug, Default)]
pub(crate) struct FakeSwitchClient {
    switches: Mutex<HashMap<DeviceId, FakeSwitch>>,
}

impl FakeSwitchClient {
    pub(crate) fn with_switch(
        self,
        id: &str,
        mac: &str,
        sensor_types: &'static [SensorType],
    ) -> Self {
        let _ = self.switches.lock().insert(
            id.into(),
            FakeSwitch {
                mac: mac.into(),
                sensor_types,
                details_available: true,
                reachable: true,
                report: None,
                relay_fails: false,
                relay_commands: Vec::new(),
                report_delay: None,
                report_fetches: 0,
            },
        );
        self
    }

    fn update(&self, id: &str, update: impl FnOnce(&mut FakeSwitch)) {
        let mut switches = self.switches.lock();
        update(switches.get_mut(id).unwrap());
    }

    pub(crate) fn set_report(&self, id: &str, report: SensorReport) {
        self.update(id, |switch| switch.report = Some(report));
    }

    pub(crate) fn clear_report(&self, id: &str) {
        self.update(id, |switch| switch.report = None);
    }

    pub(crate) fn set_unreachable(&self, id: &str, unreachable: bool) {
        self.update(id, |switch| switch.reachable = !unreachable);
    }

    pub(crate) fn set_details_available(&self, id: &str, available: bool) {
        self.update(id, |switch| switch.details_available = available);
    }

    pub(crate) fn fail_relay(&self, id: &str, fails: bool) {
        self.update(id, |switch| switch.relay_fails = fails);
    }

    pub(crate) fn relay_commands(&self, id: &str) -> Vec<RelayState> {
        self.switches.lock()[id].relay_commands.clone()
    }

    // Every report of the switch is answered after `delay`.
    pub(crate) fn set_report_delay(&self, id: &str, delay: Duration) {
        self.update(id, |switch| switch.report_delay = Some(delay));
    }

    pub(crate) fn report_fetches(&self, id: &str) -> usize {
        self.switches.lock()[id].report_fetches
    }

    fn switch(&self, id: &str) -> Result<FakeSwitch> {
        self.switches
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::UnknownDevice, format!("No switch `{id}`")))
    }
}

impl SwitchClient for FakeSwitchClient {
    fn switch_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.switches.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn switch_details(&self, id: &str) -> Result<Option<SwitchDetails>> {
        let switch = self.switch(id)?;
        Ok(switch.details_available.then(|| SwitchDetails {
            name: format!("Switch {}", switch.mac),
            host: id.into(),
            mac: switch.mac,
            ip: Some(id.into()),
            device_name: "Fake".into(),
            device_type: "fake".into(),
            manufacturer: "Fake Devices".into(),
            firmware_version: None,
        }))
    }

    fn sensor_types(&self, id: &str) -> Result<&'static [SensorType]> {
        self.switch(id).map(|switch| switch.sensor_types)
    }

    async fn sensor_report(&self, id: &str) -> Result<Option<SensorReport>> {
        let switch = {
            let mut switches = self.switches.lock();
            let switch = switches
                .get_mut(id)
                .ok_or_else(|| Error::new(ErrorKind::UnknownDevice, format!("No switch `{id}`")))?;
            switch.report_fetches += 1;
            switch.clone()
        };

        if let Some(delay) = switch.report_delay {
            tokio::time::sleep(delay).await;
        }

        if switch.reachable {
            Ok(switch.report)
        } else {
            Err(Error::new(ErrorKind::Device, "Connection refused"))
        }
    }

    async fn set_relay_state(&self, id: &str, state: RelayState) -> Result<()> {
        let mut switches = self.switches.lock();
        let switch = switches
            .get_mut(id)
            .ok_or_else(|| Error::new(ErrorKind::UnknownDevice, format!("No switch `{id}`")))?;

        if switch.relay_fails {
            return Err(Error::new(ErrorKind::Device, "Relay command refused"));
        }

        switch.relay_commands.push(state);
        if let Some(report) = switch.report.as_mut() {
            report.relay = state;
        }
        Ok(())
    }
}
