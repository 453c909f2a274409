//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the console
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Could not open serial port {port}: {reason}")]
    TransportOpen { port: String, reason: String },

    /// The port opened but the identity query came back empty
    #[error("No device id: port opened but no device responded")]
    NoDevice,

    /// The console answered a command with its error token
    #[error("Device returned an error for command {command}")]
    Device { command: String },

    /// The response did not have the expected shape
    #[error("Invalid response from device: {0:?}")]
    InvalidResponse(String),

    /// A caller supplied parameter is out of range; nothing was sent
    #[error("Invalid parameter: {0}")]
    Validation(String),

    /// Transport failure after the port was opened
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the failed poll may succeed if repeated later.
    ///
    /// `TransportOpen`, `NoDevice` and `Validation` will fail the same way
    /// again until something outside the client changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::Device { .. } | ProtocolError::InvalidResponse(_) | ProtocolError::Io(_)
        )
    }
}
