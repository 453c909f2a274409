//! # Kettler Core Library
//!
//! Core functionality for bridging Kettler exercise consoles to a home
//! automation broker.
//!
//! This library provides:
//! - Serial protocol communication with the console
//! - Session tracking with idle reset
//! - Activity pin sampling
//! - Telemetry messages with Home Assistant discovery
//! - Session statistics and reports
//!
//! ## Example
//!
//! ```rust,ignore
//! use kettler_core::protocol::KettlerDevice;
//!
//! let mut device = KettlerDevice::open("/dev/ttyUSB0")?;
//! println!("{}", device.identity().device_model);
//! println!("{}", device.status()?);
//! ```

pub mod activity;
pub mod config;
pub mod demo;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::activity::{ActivitySampler, ActivityState, DebouncedSampler, SysfsPin};
    pub use crate::config::BridgeConfig;
    pub use crate::protocol::{ExerciseDevice, KettlerDevice, ProtocolError, Status};
    pub use crate::session::{SessionConfig, SessionEvent, SessionMachine, SystemClock};
    pub use crate::stats::{SessionRecord, SqliteStatsStore, StatsStore};
    pub use crate::supervisor::Supervisor;
    pub use crate::telemetry::{TelemetrySink, TopicSink};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
