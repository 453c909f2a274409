//! Telemetry publishing
//!
//! Status snapshots and one-time discovery metadata are turned into
//! topic/payload messages in the layout Home Assistant's MQTT discovery
//! expects, then queued for a background delivery task that publishes them
//! to an MQTT broker or writes them out as JSON lines. Publishing never
//! blocks or fails the session loop.

mod delivery;
mod discovery;
mod mqtt;

pub use delivery::deliver;
pub use discovery::{discovery_messages, SENSOR_FIELDS};
pub use mqtt::{
    deliver_to_broker, BrokerConfig, DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT, MIN_KEEPALIVE_SECS,
};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::protocol::{DeviceIdentity, Status};

/// Consumer of status snapshots and device metadata
pub trait TelemetrySink {
    /// Queue a status snapshot. Best effort, never fails the caller.
    fn publish(&self, status: &Status);

    /// Describe the device to the consumer. Only the first call per sink
    /// has an effect.
    fn publish_discovery(&self, identity: &DeviceIdentity);
}

/// One message for the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    /// Broker should keep the last message for late subscribers
    pub retain: bool,
}

/// Topic layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Topic carrying status snapshots
    pub state_topic: String,
    /// Prefix Home Assistant listens on for discovery
    pub discovery_prefix: String,
    /// Node id used in discovery topics and unique ids
    pub node_id: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            state_topic: "home/kettler/status".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            node_id: "kettler".to_string(),
        }
    }
}

/// Sink queueing messages for a delivery task
pub struct TopicSink {
    topics: TopicConfig,
    tx: mpsc::UnboundedSender<TelemetryMessage>,
    discovery_sent: AtomicBool,
}

impl TopicSink {
    /// Create a sink and the receiving end for [`deliver`]
    pub fn channel(topics: TopicConfig) -> (Self, mpsc::UnboundedReceiver<TelemetryMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            topics,
            tx,
            discovery_sent: AtomicBool::new(false),
        };
        (sink, rx)
    }

    fn enqueue(&self, message: TelemetryMessage) {
        if let Err(e) = self.tx.send(message) {
            tracing::warn!(topic = %e.0.topic, "Telemetry delivery task is gone, message dropped");
        }
    }
}

impl TelemetrySink for TopicSink {
    fn publish(&self, status: &Status) {
        match serde_json::to_value(status) {
            Ok(payload) => self.enqueue(TelemetryMessage {
                topic: self.topics.state_topic.clone(),
                payload,
                retain: false,
            }),
            Err(e) => tracing::warn!(error = %e, "Could not encode status"),
        }
    }

    fn publish_discovery(&self, identity: &DeviceIdentity) {
        if self.discovery_sent.swap(true, Ordering::SeqCst) {
            tracing::debug!("Discovery already sent, skipping");
            return;
        }
        let messages = discovery_messages(&self.topics, identity);
        tracing::info!(count = messages.len(), "Sending discovery messages");
        for message in messages {
            self.enqueue(message);
        }
    }
}
