//! Protocol commands
//!
//! Defines the commands of the Kettler console protocol that the client uses.
//! Every command is a short ASCII token, optionally followed by a single space
//! and a parameter, terminated by CR LF.

/// Line terminator for commands and single-line responses
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Literal the console sends when it rejects a command
pub const ERROR_TOKEN: &str = "ERROR";

/// Commands understood by the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Device ID ('ID')
    DeviceId,
    /// Device model ('KI')
    DeviceModel,
    /// Serial number ('SN')
    SerialNumber,
    /// Firmware version ('VE')
    Version,
    /// Device clock ('TR')
    DeviceTime,
    /// Exercise status ('ST')
    Status,
    /// Exercise status, extended layout ('ES1')
    StatusAlternative,
    /// Reset the console ('RS')
    Reset,
    /// Enter command mode ('CM')
    CommandMode,
    /// Put distance in tenths of a km ('PD')
    PutDistance,
    /// Put power in watts ('PW')
    PutWatts,
    /// Put time as MMSS ('PT')
    PutTime,
}

impl Command {
    /// Get the ASCII token sent on the wire
    pub fn token(&self) -> &'static str {
        match self {
            Command::DeviceId => "ID",
            Command::DeviceModel => "KI",
            Command::SerialNumber => "SN",
            Command::Version => "VE",
            Command::DeviceTime => "TR",
            Command::Status => "ST",
            Command::StatusAlternative => "ES1",
            Command::Reset => "RS",
            Command::CommandMode => "CM",
            Command::PutDistance => "PD",
            Command::PutWatts => "PW",
            Command::PutTime => "PT",
        }
    }

    /// Look a command up by its wire token
    pub fn from_token(token: &str) -> Option<Self> {
        let cmd = match token {
            "ID" => Command::DeviceId,
            "KI" => Command::DeviceModel,
            "SN" => Command::SerialNumber,
            "VE" => Command::Version,
            "TR" => Command::DeviceTime,
            "ST" => Command::Status,
            "ES1" => Command::StatusAlternative,
            "RS" => Command::Reset,
            "CM" => Command::CommandMode,
            "PD" => Command::PutDistance,
            "PW" => Command::PutWatts,
            "PT" => Command::PutTime,
            _ => return None,
        };
        Some(cmd)
    }
}

/// A framed command line: token plus optional parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The token to send (e.g. "ST", "PW")
    pub token: String,
    /// Optional parameter, separated from the token by one space
    pub param: Option<String>,
}

impl CommandLine {
    /// Create a command line without a parameter
    pub fn new(command: Command) -> Self {
        Self {
            token: command.token().to_string(),
            param: None,
        }
    }

    /// Create a command line with a parameter
    pub fn with_param(command: Command, param: impl Into<String>) -> Self {
        Self {
            token: command.token().to_string(),
            param: Some(param.into()),
        }
    }

    /// Wrap arbitrary text typed by an operator (diagnostic passthrough)
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            token: text.into(),
            param: None,
        }
    }

    /// Convert the command to bytes, appending CR LF for transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.token.as_bytes().to_vec();
        if let Some(param) = &self.param {
            bytes.push(b' ');
            bytes.extend_from_slice(param.as_bytes());
        }
        bytes.extend_from_slice(LINE_TERMINATOR);
        bytes
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{} {}", self.token, param),
            None => f.write_str(&self.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tokens() {
        assert_eq!(Command::Status.token(), "ST");
        assert_eq!(Command::StatusAlternative.token(), "ES1");
        assert_eq!(Command::Reset.token(), "RS");
    }

    #[test]
    fn test_token_lookup() {
        assert_eq!(Command::from_token("KI"), Some(Command::DeviceModel));
        assert_eq!(Command::from_token("XX"), None);
    }

    #[test]
    fn test_command_line_to_bytes() {
        assert_eq!(CommandLine::new(Command::Status).to_bytes(), b"ST\r\n".to_vec());
        assert_eq!(
            CommandLine::with_param(Command::PutTime, "0530").to_bytes(),
            b"PT 0530\r\n".to_vec()
        );
    }

    #[test]
    fn test_command_line_display() {
        let line = CommandLine::with_param(Command::PutWatts, "100");
        assert_eq!(line.to_string(), "PW 100");
    }
}
