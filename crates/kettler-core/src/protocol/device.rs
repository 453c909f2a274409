//! Console client
//!
//! Owns the transport and turns it into typed requests and responses. The
//! client is single-owner: every operation takes `&mut self` and runs to
//! completion (bounded by the read timeout) before the next one starts.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use super::{
    open_port, Channel, Command, CommandLine, DeviceIdentity, ProtocolError, SerialChannel,
    Status, TcpChannel, ERROR_TOKEN, LINE_TERMINATOR, READ_TIMEOUT, RESET_SETTLE,
};

/// Largest distance accepted by `PD`, in tenths of a km
pub const MAX_DISTANCE_TENTHS: i64 = 9999;

/// Largest power accepted by `PW`, in watts
pub const MAX_WATTS: i64 = 999;

/// Largest time accepted by `PT`, in seconds
pub const MAX_TIME_SECS: i64 = 9959;

/// The operations the session loop needs from a console
pub trait ExerciseDevice {
    /// Poll the current exercise status
    fn status(&mut self) -> Result<Status, ProtocolError>;

    /// Reset the console and wait out its settle window
    fn reset(&mut self) -> Result<(), ProtocolError>;
}

/// Timing knobs for the client
#[derive(Debug, Clone, Copy)]
pub struct DeviceOptions {
    /// Upper bound for a single-line read
    pub read_timeout: Duration,
    /// How long the console is left alone after `RS`
    pub reset_settle: Duration,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
            reset_settle: RESET_SETTLE,
        }
    }
}

/// A connected Kettler console
pub struct KettlerDevice {
    /// Transport, released when the client is dropped
    channel: Box<dyn Channel>,
    /// Identity read during construction
    identity: DeviceIdentity,
    options: DeviceOptions,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl KettlerDevice {
    /// Open the console on a serial port, or on `tcp://host:port` for a
    /// networked serial server, and read its identity.
    pub fn open(port: &str) -> Result<Self, ProtocolError> {
        let channel: Box<dyn Channel> = match port.strip_prefix("tcp://") {
            Some(addr) => {
                let stream =
                    TcpStream::connect(addr).map_err(|e| ProtocolError::TransportOpen {
                        port: port.to_string(),
                        reason: e.to_string(),
                    })?;
                Box::new(TcpChannel::new(stream))
            }
            None => Box::new(SerialChannel::new(open_port(port)?)),
        };
        Self::with_channel(channel, DeviceOptions::default())
    }

    /// Run the identity handshake over an already open channel
    pub fn with_channel(
        mut channel: Box<dyn Channel>,
        options: DeviceOptions,
    ) -> Result<Self, ProtocolError> {
        channel.set_timeout(options.read_timeout)?;

        let mut device = Self {
            channel,
            identity: DeviceIdentity::default(),
            options,
            tx_bytes: 0,
            rx_bytes: 0,
        };
        device.identity = device.load_identity()?;

        tracing::info!(
            device_id = %device.identity.device_id,
            model = %device.identity.device_model,
            serial = %device.identity.serial_number,
            version = %device.identity.version,
            "Console connected"
        );
        Ok(device)
    }

    fn load_identity(&mut self) -> Result<DeviceIdentity, ProtocolError> {
        let device_id = self.query(Command::DeviceId)?;
        if device_id.is_empty() {
            return Err(ProtocolError::NoDevice);
        }
        Ok(DeviceIdentity {
            device_id,
            device_model: self.query(Command::DeviceModel)?,
            serial_number: self.query(Command::SerialNumber)?,
            version: self.query(Command::Version)?,
        })
    }

    /// Identity read when the client was opened
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Exercise status via `ST`
    pub fn status(&mut self) -> Result<Status, ProtocolError> {
        let raw = self.query(Command::Status)?;
        Status::parse(&raw)
    }

    /// Exercise status via `ES1`
    pub fn status_alternative(&mut self) -> Result<Status, ProtocolError> {
        let raw = self.query(Command::StatusAlternative)?;
        Status::parse_alternative(&raw)
    }

    /// Console clock as reported by `TR`
    pub fn device_time(&mut self) -> Result<String, ProtocolError> {
        self.query(Command::DeviceTime)
    }

    /// Reset the console, then leave it alone for the settle window.
    ///
    /// Readiness is not verified afterwards.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.query(Command::Reset)?;
        tracing::debug!(
            settle_ms = self.options.reset_settle.as_millis() as u64,
            "Console reset, waiting for it to settle"
        );
        std::thread::sleep(self.options.reset_settle);
        Ok(())
    }

    /// Enter command mode. Only a reset leaves it again.
    pub fn enter_command_mode(&mut self) -> Result<(), ProtocolError> {
        self.query(Command::CommandMode).map(|_| ())
    }

    /// Set the target distance in km (sent in tenths, 0..=999.9 km)
    pub fn put_distance(&mut self, km: f64) -> Result<(), ProtocolError> {
        if !km.is_finite() {
            return Err(ProtocolError::Validation(format!(
                "distance must be a number, got {km}"
            )));
        }
        let tenths = (km * 10.0).trunc() as i64;
        if tenths < 0 {
            return Err(ProtocolError::Validation(format!(
                "distance must be positive, got {km} km"
            )));
        }
        if tenths > MAX_DISTANCE_TENTHS {
            return Err(ProtocolError::Validation(format!(
                "distance must be at most 999.9 km, got {km} km"
            )));
        }
        self.write_param(Command::PutDistance, tenths.to_string())
    }

    /// Set the target power in watts (0..=999)
    pub fn put_watts(&mut self, watts: i64) -> Result<(), ProtocolError> {
        if !(0..=MAX_WATTS).contains(&watts) {
            return Err(ProtocolError::Validation(format!(
                "watts must be between 0 and {MAX_WATTS}, got {watts}"
            )));
        }
        self.write_param(Command::PutWatts, watts.to_string())
    }

    /// Set the target time in seconds (0..=9959), sent as MMSS
    pub fn put_time(&mut self, seconds: i64) -> Result<(), ProtocolError> {
        if !(0..=MAX_TIME_SECS).contains(&seconds) {
            return Err(ProtocolError::Validation(format!(
                "time must be between 0 and {MAX_TIME_SECS} seconds, got {seconds}"
            )));
        }
        self.write_param(Command::PutTime, encode_mmss(seconds))
    }

    fn write_param(&mut self, command: Command, param: String) -> Result<(), ProtocolError> {
        let line = CommandLine::with_param(command, param);
        self.send_command(&line, true).map(|_| ())
    }

    /// Send a command without parameter and require an error-free answer
    fn query(&mut self, command: Command) -> Result<String, ProtocolError> {
        self.send_command(&CommandLine::new(command), true)
    }

    /// Send a command and read its single-line response
    pub fn send_command(
        &mut self,
        line: &CommandLine,
        check_error: bool,
    ) -> Result<String, ProtocolError> {
        self.write_line(line)?;
        let bytes = self.read_line()?;
        let response = String::from_utf8(bytes).map_err(|e| {
            ProtocolError::InvalidResponse(String::from_utf8_lossy(e.as_bytes()).into_owned())
        })?;

        tracing::trace!(command = %line, response = %response, "Console exchange");

        if check_error && response == ERROR_TOKEN {
            return Err(ProtocolError::Device {
                command: line.to_string(),
            });
        }
        Ok(response)
    }

    /// Send operator text and collect everything the console answers.
    ///
    /// Reads until the transport goes quiet, so this always takes at least
    /// one read timeout. Diagnostics only, never used by the poll loop.
    pub fn send_raw(&mut self, text: &str, check_error: bool) -> Result<String, ProtocolError> {
        let line = CommandLine::raw(text);
        self.write_line(&line)?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 256];
        loop {
            match self.channel.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(ref e) if is_timeout(e) => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.rx_bytes = self.rx_bytes.saturating_add(response.len() as u64);

        let error_line = [ERROR_TOKEN.as_bytes(), LINE_TERMINATOR].concat();
        if check_error && (response == ERROR_TOKEN.as_bytes() || response == error_line) {
            return Err(ProtocolError::Device {
                command: line.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    fn write_line(&mut self, line: &CommandLine) -> Result<(), ProtocolError> {
        // Leftovers of a response that arrived after its read timed out
        // would otherwise be read as the answer to this command.
        if let Err(e) = self.channel.clear_input_buffer() {
            tracing::debug!(error = %e, "Could not clear console input buffer (continuing)");
        }

        let bytes = line.to_bytes();
        self.channel.write_all(&bytes)?;
        self.channel.flush()?;
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        Ok(())
    }

    /// Read until CR LF or until the read timeout elapses, whichever is first.
    /// A single trailing CR LF is stripped.
    fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let deadline = Instant::now() + self.options.read_timeout;
        let mut response = Vec::new();
        let mut byte = [0u8; 1];

        while !response.ends_with(LINE_TERMINATOR) && Instant::now() < deadline {
            match self.channel.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => response.push(byte[0]),
                Err(ref e) if is_timeout(e) => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.rx_bytes = self.rx_bytes.saturating_add(response.len() as u64);

        if response.ends_with(LINE_TERMINATOR) {
            response.truncate(response.len() - LINE_TERMINATOR.len());
        }
        Ok(response)
    }

    /// Release the transport now instead of at end of scope
    pub fn close(self) {
        drop(self);
    }
}

impl ExerciseDevice for KettlerDevice {
    fn status(&mut self) -> Result<Status, ProtocolError> {
        KettlerDevice::status(self)
    }

    fn reset(&mut self) -> Result<(), ProtocolError> {
        KettlerDevice::reset(self)
    }
}

impl Drop for KettlerDevice {
    fn drop(&mut self) {
        tracing::debug!(
            tx_bytes = self.tx_bytes,
            rx_bytes = self.rx_bytes,
            "Console transport released"
        );
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Encode seconds as the zero padded MMSS parameter of `PT`
fn encode_mmss(seconds: i64) -> String {
    format!("{:02}{:02}", seconds / 60, seconds % 60)
}
