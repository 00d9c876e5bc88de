//! MQTT bus client.
//!
//! Thin wrapper around `rumqttc`: owns the background event loop, the
//! process-wide connection flag and the last-will registration. The event
//! loop task is the only writer of the connection flag; the poll loop only
//! reads it. Reconnects are driven by `rumqttc` itself; a lost connection
//! is retried until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

/// Payload of the retained liveness message while the bridge runs.
pub const PAYLOAD_ONLINE: &str = "online";
/// Liveness payload on shutdown, also registered as the last will.
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Errors from bus publications.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),
}

/// Well-known topics under the configured topic root.
#[derive(Debug, Clone)]
pub struct Topics {
    /// Retained "online"/"offline" liveness topic.
    pub state: String,
    /// Canonical value map, published each cycle.
    pub values: String,
}

impl Topics {
    pub fn new(root: &str) -> Self {
        Self {
            state: format!("{}/state", root),
            values: format!("{}/values", root),
        }
    }
}

/// Map the configured QoS level to the protocol level.
pub fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Bus operations the bridge loop depends on. The broker-backed
/// implementation is [`MqttBus`]; tests substitute a recording bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Whether the broker connection is currently up.
    fn is_connected(&self) -> bool;

    fn topics(&self) -> &Topics;

    /// Fire-and-forget publish into the outbound queue.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError>;

    /// Publish the retained "online" liveness message.
    async fn publish_online(&self) -> Result<(), BusError>;

    /// Best-effort shutdown of the bus.
    async fn shutdown(self);
}

/// Handle to the MQTT connection.
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    qos: QoS,
    topics: Topics,
}

impl MqttBus {
    /// Create the client and spawn the background event loop.
    ///
    /// Returns the bus handle and a channel that yields one event per
    /// (re)connection, so the bridge can republish liveness and discovery
    /// metadata on every connect edge. The actual TCP connection is
    /// established (and re-established) by the event loop; a broker that is
    /// down at startup is simply retried.
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::UnboundedReceiver<()>) {
        let topics = Topics::new(&config.topic_root);
        let qos = qos_level(config.qos);

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(&topics.state, PAYLOAD_OFFLINE, qos, true));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, event_loop) = AsyncClient::new(options, 16);

        let connected = Arc::new(AtomicBool::new(false));
        let shutting_down = Arc::new(AtomicBool::new(false));
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(
            event_loop,
            connected.clone(),
            shutting_down.clone(),
            connect_tx,
        ));

        (
            Self {
                client,
                connected,
                shutting_down,
                qos,
                topics,
            },
            connect_rx,
        )
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn topics(&self) -> &Topics {
        &self.topics
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), BusError> {
        self.client.publish(topic, self.qos, retain, payload).await?;
        Ok(())
    }

    async fn publish_online(&self) -> Result<(), BusError> {
        self.publish(&self.topics.state, PAYLOAD_ONLINE.into(), true)
            .await
    }

    /// Best-effort shutdown: retained "offline", then stop the event loop
    /// and disconnect.
    async fn shutdown(self) {
        if let Err(err) = self
            .publish(&self.topics.state, PAYLOAD_OFFLINE.into(), true)
            .await
        {
            warn!(error = %err, "failed to publish offline state");
        }

        self.shutting_down.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.disconnect().await {
            debug!(error = %err, "MQTT disconnect failed");
        }
    }
}

/// Background delivery loop: drives the connection, maintains the connection
/// flag and signals connect edges.
async fn run_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    connect_tx: mpsc::UnboundedSender<()>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("connected to MQTT broker");
                    connected.store(true, Ordering::SeqCst);
                    let _ = connect_tx.send(());
                } else {
                    warn!(code = ?ack.code, "MQTT connection refused");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::SeqCst);
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %err, "MQTT connection lost, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    debug!("MQTT event loop stopped");
}
