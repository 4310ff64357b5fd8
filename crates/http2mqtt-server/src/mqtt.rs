use std::sync::Arc;
use std::time::Duration;

use http2mqtt::bus::{InboundMessage, MessageBus, PublishOptions, QoS};
use http2mqtt::error::{Error, ErrorKind, Result};

use hashbrown::HashMap;

use parking_lot::Mutex;

use rumqttc::v5::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, mqttbytes,
    mqttbytes::v5::Packet,
};

use tokio::sync::mpsc;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 64;

// Keep alive time to send `pingreq` to broker when the connection is idle.
const KEEP_ALIVE_TIME: Duration = Duration::from_secs(30);

// Pause before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

type Subscriptions = Arc<Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>>;

const fn mqtt_qos(qos: QoS) -> mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => mqttbytes::QoS::ExactlyOnce,
    }
}

fn bus_error(action: &str, topic: &str, e: &ClientError) -> Error {
    Error::new(
        ErrorKind::Bus,
        format!("Unable to {action} on `{topic}`: {e}"),
    )
}

// Forwards a received publication to the channel registered for its topic.
fn dispatch(subscriptions: &Subscriptions, topic: &[u8], payload: &[u8]) {
    let Ok(topic) = std::str::from_utf8(topic) else {
        warn!("Publication with a non UTF-8 topic, discard it");
        return;
    };

    // The guard is released before the message is forwarded.
    let sender = subscriptions.lock().get(topic).cloned();
    let Some(sender) = sender else {
        debug!("No subscriber for topic `{topic}`, discard the publication");
        return;
    };

    let message = InboundMessage::new(topic, String::from_utf8_lossy(payload));
    if let Err(e) = sender.try_send(message) {
        warn!("Unable to forward the publication on `{topic}`, discard it: {e}");
    }
}

/// A [`MessageBus`] backed by a single `MQTT` connection.
///
/// Publications and subscriptions are queued on the client. The connection
/// itself is driven by the paired [`MqttEventLoop`].
pub(crate) struct MqttBus {
    client: AsyncClient,
    subscriptions: Subscriptions,
}

impl MqttBus {
    pub(crate) fn new(config: &MqttConfig) -> (Self, MqttEventLoop) {
        let mut mqttoptions =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        let _ = mqttoptions.set_keep_alive(KEEP_ALIVE_TIME);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            let _ = mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, ASYNC_CHANNEL_CAPACITY);
        let subscriptions = Subscriptions::default();

        (
            Self {
                client: client.clone(),
                subscriptions: Arc::clone(&subscriptions),
            },
            MqttEventLoop {
                client,
                eventloop,
                subscriptions,
            },
        )
    }
}

impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: String, options: PublishOptions) -> Result<()> {
        self.client
            .publish(topic, mqtt_qos(options.qos), options.retain, payload)
            .await
            .map_err(|e| bus_error("publish", topic, &e))
    }

    async fn subscribe(&self, topic: &str, sender: mpsc::Sender<InboundMessage>) -> Result<()> {
        let _ = self.subscriptions.lock().insert(topic.into(), sender);

        self.client
            .subscribe(topic, mqttbytes::QoS::AtMostOnce)
            .await
            .map_err(|e| bus_error("subscribe", topic, &e))
    }
}

/// Drives the `MQTT` connection of a [`MqttBus`].
pub(crate) struct MqttEventLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Subscriptions,
}

impl MqttEventLoop {
    // Subscriptions are lost when the broker drops the session, so they are
    // issued again on every connection. A separate task queues them since
    // the request channel is only drained while the event loop is polled.
    fn resubscribe(&self) {
        let topics: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        if topics.is_empty() {
            return;
        }

        let client = self.client.clone();
        let _ = tokio::spawn(async move {
            for topic in topics {
                if let Err(e) = client.subscribe(topic.as_str(), mqttbytes::QoS::AtMostOnce).await {
                    error!("Impossible to subscribe again to topic `{topic}`: {e}");
                }
            }
        });
    }

    /// Polls the connection until the token is cancelled.
    pub(crate) async fn run(mut self, cancellation_token: CancellationToken) {
        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = cancellation_token.cancelled() => { break; }
                // Poll the `MQTT` event coming from the network
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("Connected to the MQTT broker");
                            self.resubscribe();
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            dispatch(&self.subscriptions, &publish.topic, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {e}");
                            tokio::select! {
                                () = cancellation_token.cancelled() => { break; }
                                () = tokio::time::sleep(RECONNECT_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("Unable to queue the MQTT disconnection: {e}");
        }
        info!("MQTT event loop stopped");
    }
}
