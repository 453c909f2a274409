//! Bridge configuration
//!
//! Loaded from a JSON file; every field except the console port has a
//! default. Validated once at startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::activity::{DEFAULT_SAMPLES, DEFAULT_SAMPLE_INTERVAL};
use crate::session::SessionConfig;
use crate::supervisor::DEFAULT_BACKOFF;
use crate::telemetry::{BrokerConfig, TopicConfig, MIN_KEEPALIVE_SECS};

/// Environment variable overriding `device.port`
pub const PORT_ENV: &str = "KETTLER_PORT";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub device: DeviceSettings,
    pub session: SessionSettings,
    /// Activity pin; absent selects continuous polling
    pub activity: Option<ActivitySettings>,
    pub telemetry: TelemetrySettings,
    /// Stats database; absent disables session recording
    pub stats: Option<StatsSettings>,
    /// Pause before restarting after a failure
    pub restart_backoff_secs: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            session: SessionSettings::default(),
            activity: None,
            telemetry: TelemetrySettings::default(),
            stats: None,
            restart_backoff_secs: DEFAULT_BACKOFF.as_secs_f64(),
        }
    }
}

/// Console connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Serial device (e.g. "/dev/ttyUSB0") or "tcp://host:port"
    pub port: Option<String>,
    /// Talk to the built-in simulated console instead
    pub demo: bool,
}

/// Session loop timing, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub poll_interval_secs: f64,
    pub idle_reset_secs: f64,
    pub idle_publish_interval_secs: Option<f64>,
    pub warmup_secs: f64,
    pub post_reset_pause_secs: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs_f64(),
            idle_reset_secs: defaults.idle_reset.as_secs_f64(),
            idle_publish_interval_secs: None,
            warmup_secs: defaults.warmup.as_secs_f64(),
            post_reset_pause_secs: defaults.post_reset_pause.as_secs_f64(),
        }
    }
}

/// Activity pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySettings {
    /// GPIO number (BCM numbering on a Raspberry Pi)
    pub pin: u32,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

fn default_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_sample_interval_ms() -> u64 {
    DEFAULT_SAMPLE_INTERVAL.as_millis() as u64
}

/// Telemetry output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// MQTT client identifier
    pub client_id: String,
    /// MQTT broker; absent writes JSON lines to `output` instead
    pub broker: Option<BrokerConfig>,
    /// Where messages go without a broker: a file path, or "-" for stdout
    pub output: String,
    #[serde(flatten)]
    pub topics: TopicConfig,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            client_id: "kettler".to_string(),
            broker: None,
            output: "-".to_string(),
            topics: TopicConfig::default(),
        }
    }
}

/// Stats database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSettings {
    pub database: PathBuf,
}

impl BridgeConfig {
    /// Read and apply environment overrides. Callers apply their own
    /// overrides and then [`BridgeConfig::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        if let Ok(port) = std::env::var(PORT_ENV) {
            config.device.port = Some(port);
        }
        Ok(config)
    }

    /// Parse without validating
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check every value the loop relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.device.demo && self.device.port.as_deref().map_or(true, str::is_empty) {
            return invalid(format!("device.port is required (or set {PORT_ENV})"));
        }

        let s = &self.session;
        for (name, value) in [
            ("session.poll_interval_secs", s.poll_interval_secs),
            ("session.idle_reset_secs", s.idle_reset_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be a positive number, got {value}"));
            }
        }
        for (name, value) in [
            ("session.warmup_secs", Some(s.warmup_secs)),
            ("session.post_reset_pause_secs", Some(s.post_reset_pause_secs)),
            ("session.idle_publish_interval_secs", s.idle_publish_interval_secs),
            ("restart_backoff_secs", Some(self.restart_backoff_secs)),
        ] {
            if let Some(value) = value {
                if !(value.is_finite() && value >= 0.0) {
                    return invalid(format!("{name} must not be negative, got {value}"));
                }
            }
        }

        if let Some(activity) = &self.activity {
            if activity.samples == 0 {
                return invalid("activity.samples must be at least 1".to_string());
            }
        }
        if self.telemetry.output.is_empty() {
            return invalid("telemetry.output must not be empty".to_string());
        }
        if let Some(broker) = &self.telemetry.broker {
            if broker.host.is_empty() {
                return invalid("telemetry.broker.host must not be empty".to_string());
            }
            if self.telemetry.client_id.is_empty() {
                return invalid("telemetry.client_id must not be empty".to_string());
            }
            if broker.keepalive_secs < MIN_KEEPALIVE_SECS {
                return invalid(format!(
                    "telemetry.broker.keepalive_secs must be at least {MIN_KEEPALIVE_SECS}"
                ));
            }
        }
        Ok(())
    }

    /// Timing for the session loop; call after [`BridgeConfig::validate`]
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            poll_interval: Duration::from_secs_f64(s.poll_interval_secs),
            idle_reset: Duration::from_secs_f64(s.idle_reset_secs),
            idle_publish_interval: s.idle_publish_interval_secs.map(Duration::from_secs_f64),
            warmup: Duration::from_secs_f64(s.warmup_secs),
            post_reset_pause: Duration::from_secs_f64(s.post_reset_pause_secs),
        }
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.restart_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config_defaults() {
        let config = BridgeConfig::from_json(r#"{"device": {"port": "/dev/ttyUSB0"}}"#).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device.port.as_deref(), Some("/dev/ttyUSB0"));
        assert!(config.activity.is_none());
        assert!(config.stats.is_none());
        assert_eq!(config.session_config(), SessionConfig::default());
        assert_eq!(config.restart_backoff(), Duration::from_secs(10));
        assert_eq!(config.telemetry.topics.state_topic, "home/kettler/status");
    }

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::from_json(
            r#"{
                "device": {"port": "tcp://pi.local:4000"},
                "session": {"poll_interval_secs": 1, "idle_reset_secs": 120,
                            "idle_publish_interval_secs": 60},
                "activity": {"pin": 17},
                "telemetry": {"output": "/var/log/kettler.jsonl", "state_topic": "gym/bike"},
                "stats": {"database": "/var/lib/kettler/stats.db"}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        let activity = config.activity.as_ref().unwrap();
        assert_eq!(activity.pin, 17);
        assert_eq!(activity.samples, 5);
        assert_eq!(activity.sample_interval_ms, 100);
        assert_eq!(config.telemetry.topics.state_topic, "gym/bike");
        assert_eq!(config.telemetry.topics.node_id, "kettler");
        assert_eq!(
            config.session_config().idle_publish_interval,
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_broker_config() {
        let config = BridgeConfig::from_json(
            r#"{
                "device": {"demo": true},
                "telemetry": {"client_id": "bike",
                              "broker": {"host": "homeassistant", "username": "kettler",
                                         "password": "secret"}}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        let broker = config.telemetry.broker.as_ref().unwrap();
        assert_eq!(broker.host, "homeassistant");
        assert!(broker.tls);
        assert_eq!(broker.port(), 8883);
        assert_eq!(broker.keepalive_secs, 60);
        assert_eq!(broker.username.as_deref(), Some("kettler"));
        assert_eq!(broker.password.as_deref(), Some("secret"));
        assert_eq!(config.telemetry.output, "-");
        assert!(BridgeConfig::default().telemetry.broker.is_none());
    }

    #[test]
    fn test_bad_broker_rejected() {
        for json in [
            r#"{"device": {"demo": true}, "telemetry": {"broker": {"host": ""}}}"#,
            r#"{"device": {"demo": true}, "telemetry": {"broker": {"keepalive_secs": 2}}}"#,
            r#"{"device": {"demo": true}, "telemetry": {"client_id": "", "broker": {}}}"#,
        ] {
            let config = BridgeConfig::from_json(json).unwrap();
            assert!(config.validate().is_err(), "accepted {json}");
        }
    }

    #[test]
    fn test_missing_port_rejected_unless_demo() {
        let config = BridgeConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let demo = BridgeConfig::from_json(r#"{"device": {"demo": true}}"#).unwrap();
        demo.validate().unwrap();
    }

    #[test]
    fn test_bad_timings_rejected() {
        for json in [
            r#"{"device": {"demo": true}, "session": {"poll_interval_secs": 0}}"#,
            r#"{"device": {"demo": true}, "session": {"idle_reset_secs": -5}}"#,
            r#"{"device": {"demo": true}, "restart_backoff_secs": -1}"#,
            r#"{"device": {"demo": true}, "activity": {"pin": 4, "samples": 0}}"#,
        ] {
            let config = BridgeConfig::from_json(json).unwrap();
            assert!(config.validate().is_err(), "accepted {json}");
        }
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/kettler.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kettler.json");
        fs::write(&path, r#"{"device": {"demo": true}}"#).unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        assert!(config.device.demo);
    }
}
