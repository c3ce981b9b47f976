//! NATS transport using async-nats.
//!
//! The client reconnects on its own after the initial connection succeeds;
//! connection state changes are logged from the client's event callback.

use async_nats::{Client, ConnectOptions, Event};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use meterbus_common::config::NatsConfig;

use crate::bus::{BusMessage, forward};
use crate::error::{FrameworkError, Result};

/// Connect to the configured server.
pub(crate) async fn connect(config: &NatsConfig, component: &str) -> Result<Client> {
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| format!("meterbus-{}", component));

    info!(url = %config.url, name = %name, "Connecting to NATS");

    let client = ConnectOptions::new()
        .name(name)
        .event_callback(|event| async move {
            match event {
                Event::Connected => info!("Connected to NATS server"),
                Event::Disconnected => warn!("Disconnected from NATS server"),
                other => debug!(event = ?other, "NATS client event"),
            }
        })
        .connect(config.url.as_str())
        .await
        .map_err(|e| FrameworkError::connection("nats", e))?;

    Ok(client)
}

pub(crate) async fn publish(client: &Client, subject: &str, payload: Vec<u8>) -> Result<()> {
    client
        .publish(subject.to_string(), payload.into())
        .await
        .map_err(|e| FrameworkError::Publish {
            topic: subject.to_string(),
            message: e.to_string(),
        })
}

pub(crate) async fn subscribe(
    client: &Client,
    pattern: &str,
    capacity: usize,
) -> Result<mpsc::Receiver<BusMessage>> {
    let mut subscriber =
        client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| FrameworkError::Subscribe {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

    let (tx, rx) = mpsc::channel(capacity);
    let pattern = pattern.to_string();

    tokio::spawn(async move {
        while let Some(message) = subscriber.next().await {
            let message = BusMessage {
                topic: message.subject.to_string(),
                payload: message.payload.to_vec(),
            };

            if !forward(&tx, message, &pattern) {
                break;
            }
        }
        trace!(pattern = %pattern, "NATS subscription closed");
    });

    Ok(rx)
}

/// Flush pending publishes before the client is dropped.
pub(crate) async fn close(client: Client) -> Result<()> {
    client.flush().await.map_err(|e| FrameworkError::Close {
        transport: "nats".to_string(),
        message: e.to_string(),
    })
}
