//! Console Protocol
//!
//! Implements the Kettler console's line-oriented ASCII protocol: framed
//! commands, single-line and multi-line responses, status decoding and the
//! parameter setters.

pub mod commands;
mod device;
mod error;
pub mod serial;
mod status;
mod stream;

use std::time::Duration;

pub use commands::{Command, CommandLine, ERROR_TOKEN, LINE_TERMINATOR};
pub use device::{
    DeviceOptions, ExerciseDevice, KettlerDevice, MAX_DISTANCE_TENTHS, MAX_TIME_SECS, MAX_WATTS,
};
pub use error::ProtocolError;
pub use serial::{list_ports, open_port, PortInfo};
pub use status::{DeviceIdentity, Status, STATUS_ALTERNATIVE_FIELDS, STATUS_FIELDS};
pub use stream::{Channel, SerialChannel, TcpChannel};

/// Fixed baud rate of the console
pub const BAUD_RATE: u32 = 57600;

/// Read timeout for a single-line response, and per read while draining a
/// multi-line one
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the console is left alone after a reset
pub const RESET_SETTLE: Duration = Duration::from_secs(2);
