//! MQTT transport using rumqttc.
//!
//! The rumqttc event loop runs in its own task. It owns reconnection: after a
//! connection error it waits `reconnect_delay_ms` and polls again, and on every
//! ConnAck it re-issues the registered subscriptions (sessions are clean).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use meterbus_common::config::{MqttConfig, MqttQos, Transport};
use meterbus_common::topic_matches;

use crate::bus::{BusMessage, forward};
use crate::error::{FrameworkError, Result};

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// How long `close` waits for the DISCONNECT packet to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) fn to_qos(qos: MqttQos) -> QoS {
    match qos {
        MqttQos::AtMostOnce => QoS::AtMostOnce,
        MqttQos::AtLeastOnce => QoS::AtLeastOnce,
        MqttQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// A subscription filter and the channel its messages go to.
struct Route {
    filter: String,
    tx: mpsc::Sender<BusMessage>,
}

type Routes = Arc<Mutex<Vec<Route>>>;

/// An MQTT client plus its event-loop task.
pub(crate) struct MqttConnection {
    client: AsyncClient,
    qos: QoS,
    routes: Routes,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttConnection {
    /// Create the client and start the event loop.
    ///
    /// Never fails: an unreachable broker is reported and retried by the
    /// event loop.
    pub(crate) fn connect(config: &MqttConfig, component: &str) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("meterbus-{}-{}", component, std::process::id()));

        let mut options = MqttOptions::new(client_id.clone(), &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let qos = to_qos(config.qos);
        let routes: Routes = Arc::new(Mutex::new(Vec::new()));

        info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        let task = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            routes.clone(),
            qos,
            config.reconnect_delay(),
        ));

        Self {
            client,
            qos,
            routes,
            event_loop: Some(task),
        }
    }

    pub(crate) fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            qos: self.qos,
        }
    }

    pub(crate) async fn subscribe(
        &self,
        filter: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.routes.lock().push(Route {
            filter: filter.to_string(),
            tx,
        });

        self.client
            .subscribe(filter, self.qos)
            .await
            .map_err(|e| FrameworkError::Subscribe {
                pattern: filter.to_string(),
                message: e.to_string(),
            })?;

        Ok(rx)
    }

    pub(crate) async fn close(mut self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| FrameworkError::Close {
                transport: "mqtt".to_string(),
                message: e.to_string(),
            });

        if let Some(mut task) = self.event_loop.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                debug!("MQTT event loop did not stop in time, aborting");
                task.abort();
            }
        }

        result
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
    }
}

/// Publishing half of an MQTT connection.
#[derive(Clone)]
pub(crate) struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl std::fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("qos", &self.qos)
            .finish()
    }
}

impl MqttPublisher {
    /// Queue a publish without waiting; a full request queue (broker
    /// unreachable) is reported as an error instead of blocking the caller.
    pub(crate) fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(|e| FrameworkError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    routes: Routes,
    qos: QoS,
    reconnect_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "Connected to MQTT broker");
                resubscribe(&client, &routes, qos);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                dispatch(&routes, message);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_ms = reconnect_delay.as_millis() as u64,
                    "MQTT connection error"
                );
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

fn resubscribe(client: &AsyncClient, routes: &Routes, qos: QoS) {
    for route in routes.lock().iter() {
        if let Err(e) = client.try_subscribe(route.filter.as_str(), qos) {
            warn!(filter = %route.filter, error = %e, "Failed to re-subscribe");
        }
    }
}

fn dispatch(routes: &Routes, message: BusMessage) {
    let mut routes = routes.lock();
    routes.retain(|route| {
        if !topic_matches(&route.filter, &message.topic, Transport::Mqtt) {
            return true;
        }
        forward(&route.tx, message.clone(), &route.filter)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_qos(MqttQos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_qos(MqttQos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_qos(MqttQos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_dispatch_routes_by_filter() {
        let (meter_tx, mut meter_rx) = mpsc::channel(4);
        let (other_tx, mut other_rx) = mpsc::channel(4);
        let routes: Routes = Arc::new(Mutex::new(vec![
            Route {
                filter: "openfmb/metermodule/#".to_string(),
                tx: meter_tx,
            },
            Route {
                filter: "openfmb/other/+".to_string(),
                tx: other_tx,
            },
        ]));

        dispatch(
            &routes,
            BusMessage {
                topic: "openfmb/metermodule/MeterReadingProfile/modbus".to_string(),
                payload: b"0, 16480".to_vec(),
            },
        );

        let received = meter_rx.try_recv().unwrap();
        assert_eq!(received.payload, b"0, 16480");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_drops_closed_routes() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let routes: Routes = Arc::new(Mutex::new(vec![Route {
            filter: "a/#".to_string(),
            tx,
        }]));

        dispatch(
            &routes,
            BusMessage {
                topic: "a/b".to_string(),
                payload: Vec::new(),
            },
        );

        assert!(routes.lock().is_empty());
    }
}
