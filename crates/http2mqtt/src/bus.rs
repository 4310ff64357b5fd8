use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::sensor::SensorType;

/// Delivery guarantee of a publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates are possible.
    AtLeastOnce,
    /// Exactly one delivery.
    ExactlyOnce,
}

/// Options of a publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Whether the broker keeps the message for late subscribers.
    pub retain: bool,
    /// Delivery guarantee.
    pub qos: QoS,
}

impl PublishOptions {
    /// Options of a retained publication.
    #[must_use]
    pub const fn retained() -> Self {
        Self {
            retain: true,
            qos: QoS::AtMostOnce,
        }
    }
}

/// A message received from a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Message payload.
    pub payload: String,
}

impl InboundMessage {
    /// Creates an [`InboundMessage`].
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe message bus.
pub trait MessageBus: Send + Sync {
    /// Publishes a payload on a topic.
    fn publish(
        &self,
        topic: &str,
        payload: String,
        options: PublishOptions,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to a topic.
    ///
    /// Every message received on the topic is forwarded to `sender`.
    /// Once the receiving half is dropped, the messages are discarded.
    fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<B: MessageBus> MessageBus for Arc<B> {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        options: PublishOptions,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).publish(topic, payload, options)
    }

    fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<InboundMessage>,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).subscribe(topic, sender)
    }
}

/// Builds the topic of a switch sensor: `<prefix>/<device>/<sensor key>`.
#[must_use]
pub fn sensor_topic(prefix: &str, device: &str, sensor: SensorType) -> String {
    format!("{prefix}/{device}/{}", sensor.key())
}
