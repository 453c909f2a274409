use serde_json::json;

use super::{TelemetryMessage, TopicConfig};
use crate::protocol::DeviceIdentity;

/// Status fields exposed as sensors: (field, unit, display name)
pub const SENSOR_FIELDS: &[(&str, &str, &str)] = &[
    ("heart_rate_bpm", "bpm", "Heart Rate"),
    ("exercise_rpm", "rpm", "Exercise RPM"),
    ("speed_kmph", "km/h", "Speed"),
    ("distance_km", "km", "Distance"),
    ("dest_power_watt", "W", "Destination Power"),
    ("energy_kjoule", "kJ", "Energy"),
    ("time_elapsed_sec", "s", "Time Elapsed"),
    ("real_power_watt", "W", "Real Power"),
];

/// Build one retained sensor config message per status field
pub fn discovery_messages(topics: &TopicConfig, identity: &DeviceIdentity) -> Vec<TelemetryMessage> {
    let node = &topics.node_id;
    SENSOR_FIELDS
        .iter()
        .map(|(field, unit, name)| TelemetryMessage {
            topic: format!(
                "{}/sensor/{node}/{node}_{field}/config",
                topics.discovery_prefix
            ),
            payload: json!({
                "name": name,
                "state_topic": topics.state_topic,
                "unit_of_measurement": unit,
                "unique_id": format!("{node}/{field}"),
                "value_template": format!("{{{{ value_json.{field} }}}}"),
                "device": {
                    "identifiers": ["serial_number", identity.serial_number],
                    "name": "Kettler",
                    "model": identity.device_model,
                    "manufacturer": "Kettler",
                    "sw_version": identity.version,
                    "hw_version": identity.device_id,
                },
            }),
            retain: true,
        })
        .collect()
}
