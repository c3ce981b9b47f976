//! Message bus connections over Zenoh, MQTT or NATS.
//!
//! A [`Bus`] owns one transport connection. Publishing goes through a cloneable
//! [`Publisher`]; subscriptions deliver onto an mpsc channel wrapped in a
//! [`Subscription`], consumed by a single task in delivery order. The
//! transport side never waits on a slow consumer: when the channel is full
//! the message is dropped and a warning is logged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, trace, warn};
use zenoh::sample::SampleKind;

use meterbus_common::config::{BusConfig, Transport, ZenohConfig};
use meterbus_common::topic::{validate_pattern, validate_topic};

use crate::error::{FrameworkError, Result};
use crate::mqtt::{MqttConnection, MqttPublisher};
use crate::nats;

/// A message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic, key expression or subject the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Anything a component can publish messages through.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// An open bus connection.
pub struct Bus {
    inner: BusInner,
}

enum BusInner {
    Zenoh(Arc<zenoh::Session>),
    Mqtt(MqttConnection),
    Nats(async_nats::Client),
}

impl Bus {
    /// Connect to the configured transport.
    ///
    /// `component` names the caller in logs and in generated MQTT client ids.
    pub async fn connect(config: &BusConfig, component: &str) -> Result<Self> {
        config.validate()?;

        let inner = match config {
            BusConfig::Zenoh(zenoh) => BusInner::Zenoh(Arc::new(open_zenoh(zenoh).await?)),
            BusConfig::Mqtt(mqtt) => BusInner::Mqtt(MqttConnection::connect(mqtt, component)),
            BusConfig::Nats(config) => BusInner::Nats(nats::connect(config, component).await?),
        };
        Ok(Self { inner })
    }

    /// The transport behind this connection.
    pub fn transport(&self) -> Transport {
        match &self.inner {
            BusInner::Zenoh(_) => Transport::Zenoh,
            BusInner::Mqtt(_) => Transport::Mqtt,
            BusInner::Nats(_) => Transport::Nats,
        }
    }

    /// Get a publisher sharing this connection.
    pub fn publisher(&self) -> Publisher {
        match &self.inner {
            BusInner::Zenoh(session) => Publisher {
                inner: PublisherInner::Zenoh(session.clone()),
            },
            BusInner::Mqtt(connection) => Publisher {
                inner: PublisherInner::Mqtt(connection.publisher()),
            },
            BusInner::Nats(client) => Publisher {
                inner: PublisherInner::Nats(client.clone()),
            },
        }
    }

    /// Subscribe to a pattern, delivering into a channel of `capacity` messages.
    pub async fn subscribe(&self, pattern: &str, capacity: usize) -> Result<Subscription> {
        validate_pattern(pattern, self.transport())?;

        let rx = match &self.inner {
            BusInner::Zenoh(session) => subscribe_zenoh(session, pattern, capacity).await?,
            BusInner::Mqtt(connection) => connection.subscribe(pattern, capacity).await?,
            BusInner::Nats(client) => nats::subscribe(client, pattern, capacity).await?,
        };

        info!(transport = %self.transport(), pattern = %pattern, "Subscribed");

        Ok(Subscription {
            pattern: pattern.to_string(),
            rx,
        })
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        match self.inner {
            BusInner::Zenoh(session) => session.close().await.map_err(|e| FrameworkError::Close {
                transport: "zenoh".to_string(),
                message: e.to_string(),
            }),
            BusInner::Mqtt(connection) => connection.close().await,
            BusInner::Nats(client) => nats::close(client).await,
        }
    }
}

/// Publisher for sending payloads to the bus.
#[derive(Clone, Debug)]
pub struct Publisher {
    inner: PublisherInner,
}

#[derive(Clone, Debug)]
enum PublisherInner {
    Zenoh(Arc<zenoh::Session>),
    Mqtt(MqttPublisher),
    Nats(async_nats::Client),
}

#[async_trait]
impl MessageSink for Publisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        validate_topic(topic, self.transport())?;

        match &self.inner {
            PublisherInner::Zenoh(session) => {
                session
                    .put(topic, payload)
                    .await
                    .map_err(|e| FrameworkError::Publish {
                        topic: topic.to_string(),
                        message: e.to_string(),
                    })
            }
            PublisherInner::Mqtt(publisher) => publisher.publish(topic, payload),
            PublisherInner::Nats(client) => nats::publish(client, topic, payload).await,
        }
    }
}

impl Publisher {
    /// The transport this publisher sends on.
    pub fn transport(&self) -> Transport {
        match &self.inner {
            PublisherInner::Zenoh(_) => Transport::Zenoh,
            PublisherInner::Mqtt(_) => Transport::Mqtt,
            PublisherInner::Nats(_) => Transport::Nats,
        }
    }
}

/// Messages delivered for one subscription pattern.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    /// Wrap an existing channel, e.g. to feed a consumer from another source.
    pub fn from_receiver(pattern: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            pattern: pattern.into(),
            rx,
        }
    }

    /// The pattern this subscription was declared with.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next message; `None` once the transport side is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Hand a message to a subscription channel without blocking.
///
/// Returns `false` once the receiving side has been dropped.
pub(crate) fn forward(tx: &mpsc::Sender<BusMessage>, message: BusMessage, pattern: &str) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!(
                pattern = %pattern,
                topic = %message.topic,
                "Subscriber is falling behind, dropping message"
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn open_zenoh(config: &ZenohConfig) -> Result<zenoh::Session> {
    let mut zenoh_config = zenoh::Config::default();
    let error = |e: &dyn std::fmt::Display| FrameworkError::connection("zenoh", e);

    zenoh_config
        .insert_json5("mode", &format!("\"{}\"", config.mode))
        .map_err(|e| error(&e))?;

    if !config.connect.is_empty() {
        let endpoints_json = serde_json::to_string(&config.connect).map_err(|e| error(&e))?;
        zenoh_config
            .insert_json5("connect/endpoints", &endpoints_json)
            .map_err(|e| error(&e))?;
    }

    if !config.listen.is_empty() {
        let endpoints_json = serde_json::to_string(&config.listen).map_err(|e| error(&e))?;
        zenoh_config
            .insert_json5("listen/endpoints", &endpoints_json)
            .map_err(|e| error(&e))?;
    }

    info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await.map_err(|e| error(&e))?;

    info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

async fn subscribe_zenoh(
    session: &zenoh::Session,
    pattern: &str,
    capacity: usize,
) -> Result<mpsc::Receiver<BusMessage>> {
    let subscriber = session
        .declare_subscriber(pattern.to_string())
        .await
        .map_err(|e| FrameworkError::Subscribe {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

    let (tx, rx) = mpsc::channel(capacity);
    let pattern = pattern.to_string();

    tokio::spawn(async move {
        while let Ok(sample) = subscriber.recv_async().await {
            if sample.kind() == SampleKind::Delete {
                trace!(key = %sample.key_expr(), "Ignoring delete sample");
                continue;
            }

            let message = BusMessage {
                topic: sample.key_expr().as_str().to_string(),
                payload: sample.payload().to_bytes().into_owned(),
            };

            if !forward(&tx, message, &pattern) {
                break;
            }
        }
        trace!(pattern = %pattern, "Zenoh subscription closed");
    });

    Ok(rx)
}
