//! Exercise session tracking
//!
//! Turns polled console status (and optionally activity pin samples) into
//! use/idle transitions, telemetry publishes, idle resets and completed
//! session records.

pub mod clock;
mod machine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use machine::{Phase, SessionMachine};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::Status;
use crate::stats::SessionRecord;

/// Timing of the session loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Pause between status polls
    pub poll_interval: Duration,
    /// Time without use after which the session closes and the console resets
    pub idle_reset: Duration,
    /// Without an activity sampler: minimum time between publishes while
    /// idle. `None` publishes every poll.
    pub idle_publish_interval: Option<Duration>,
    /// Settle delay after the activity pin rises
    pub warmup: Duration,
    /// Extra pause after the console reset settle window
    pub post_reset_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            idle_reset: Duration::from_secs(300),
            idle_publish_interval: None,
            warmup: Duration::from_secs(5),
            post_reset_pause: Duration::from_secs(5),
        }
    }
}

/// What a step of the session loop did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Confirmed low-to-high edge on the activity pin
    ActivityDetected,
    /// Warm-up finished, the console answered
    WarmedUp,
    /// First in-use status of a new session
    SessionStarted { start_time: DateTime<Utc> },
    /// Session closed at idle timeout
    SessionClosed(SessionRecord),
    /// Console reset after inactivity
    DeviceReset,
}

/// An open session
#[derive(Debug, Clone)]
struct Session {
    start_time: DateTime<Utc>,
    last_use_time: DateTime<Utc>,
    latest: Status,
}

impl Session {
    fn into_record(self) -> SessionRecord {
        SessionRecord {
            start_time: self.start_time,
            end_time: self.last_use_time,
            distance_km: self.latest.distance_km,
            time_elapsed_sec: self.latest.time_elapsed_sec,
            energy_kjoule: self.latest.energy_kjoule,
        }
    }
}
