//! MQTT broker delivery
//!
//! Publishes queued messages to a broker with rumqttc. The client's event
//! loop runs on its own task; it reconnects after every connection error and
//! keeps the session alive with pings.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use super::TelemetryMessage;

/// Port used when none is configured, with and without TLS
pub const DEFAULT_TLS_PORT: u16 = 8883;
pub const DEFAULT_PLAIN_PORT: u16 = 1883;

/// Smallest keepalive the client accepts
pub const MIN_KEEPALIVE_SECS: u64 = 5;

/// Requests the client buffers while the broker is unreachable
const REQUEST_CAPACITY: usize = 64;

/// Pause between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for queued publishes to go out on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker endpoint and credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    /// Defaults to 8883 with TLS, 1883 without
    pub port: Option<u16>,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            tls: true,
            username: None,
            password: None,
            keepalive_secs: 60,
        }
    }
}

impl BrokerConfig {
    pub fn port(&self) -> u16 {
        match (self.port, self.tls) {
            (Some(port), _) => port,
            (None, true) => DEFAULT_TLS_PORT,
            (None, false) => DEFAULT_PLAIN_PORT,
        }
    }

    /// Client options for this broker, identifying as `client_id`
    pub fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.as_str(), self.port());
        let keepalive = self.keepalive_secs.max(MIN_KEEPALIVE_SECS);
        options.set_keep_alive(Duration::from_secs(keepalive));
        if let Some(username) = &self.username {
            let password = self.password.clone().unwrap_or_default();
            options.set_credentials(username.as_str(), password);
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Publish queued messages to the broker until every sender is dropped, then
/// disconnect.
///
/// Messages are handed to the client without waiting; when the client's
/// buffer is full (broker down for a while) new messages are dropped.
pub async fn deliver_to_broker(
    mut rx: mpsc::UnboundedReceiver<TelemetryMessage>,
    options: MqttOptions,
) {
    let (host, port) = options.broker_address();
    tracing::info!(%host, port, client_id = %options.client_id(), "Connecting to MQTT broker");

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let mut driver = tokio::spawn(drive(eventloop));

    let mut queued: u64 = 0;
    let mut dropped: u64 = 0;
    while let Some(message) = rx.recv().await {
        let payload = match serde_json::to_vec(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Could not encode message");
                dropped += 1;
                continue;
            }
        };
        let topic = message.topic.as_str();
        match client.try_publish(topic, QoS::AtLeastOnce, message.retain, payload) {
            Ok(()) => queued += 1,
            Err(e) => {
                tracing::warn!(topic, error = %e, "Broker queue full, message dropped");
                dropped += 1;
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        tracing::debug!(error = %e, "Could not request disconnect");
    }
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut driver).await.is_err() {
        tracing::warn!("Broker did not drain in time, giving up");
        driver.abort();
    }
    tracing::debug!(queued, dropped, "Broker delivery stopped");
}

/// Poll the event loop until the client disconnects
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(code = ?ack.code, "Connected to MQTT broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("Disconnected from MQTT broker");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
