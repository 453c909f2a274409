//! Serial port handling
//!
//! Opens the console's serial port with its fixed framing: 57600 baud, 8-N-1,
//! no flow control, 1 s read timeout.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::fmt;
use std::path::Path;

use super::{ProtocolError, BAUD_RATE, READ_TIMEOUT};

/// A serial port the console might be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path (e.g. "/dev/ttyUSB0")
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => write!(
                f,
                "{:<20} {vid:04x}:{pid:04x} {}",
                self.name,
                self.product.as_deref().unwrap_or("")
            ),
            _ => f.write_str(&self.name),
        }
    }
}

/// USB serial adapters (the usual cable to the console) first, then ACM
/// devices, then everything else; numbered devices in numeric order.
fn port_sort_key(name: &str) -> (u8, u32, &str) {
    let base = name.rsplit('/').next().unwrap_or(name);
    let numbered = |prefix: &str| {
        base.strip_prefix(prefix)
            .map(|n| n.parse().unwrap_or(u32::MAX))
    };
    if let Some(n) = numbered("ttyUSB") {
        (0, n, base)
    } else if let Some(n) = numbered("ttyACM") {
        (1, n, base)
    } else {
        (2, 0, base)
    }
}

/// `ttyUSB*`/`ttyACM*` nodes in `dir`, for adapters enumeration missed
fn usb_tty_nodes(dir: &Path) -> Vec<PortInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyUSB") || name.starts_with("ttyACM"))
        .map(|name| PortInfo::bare(dir.join(name).to_string_lossy().into_owned()))
        .collect()
}

/// Candidate ports, best guess first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = match serialport::available_ports() {
        Ok(found) => found.into_iter().map(PortInfo::from).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Serial port enumeration failed");
            Vec::new()
        }
    };
    if cfg!(target_os = "linux") {
        ports.extend(usb_tty_nodes(Path::new("/dev")));
    }

    // Stable sort keeps enumerated entries (with USB ids) ahead of their
    // /dev duplicates, which dedup then drops.
    ports.sort_by(|a, b| port_sort_key(&a.name).cmp(&port_sort_key(&b.name)));
    ports.dedup_by(|later, earlier| later.name == earlier.name);
    ports
}

/// Open a serial port with the console's framing parameters
pub fn open_port(name: &str) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let open_err = |e: serialport::Error| ProtocolError::TransportOpen {
        port: name.to_string(),
        reason: e.to_string(),
    };

    let port = serialport::new(name, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(open_err)?;

    port.clear(serialport::ClearBuffer::All).map_err(open_err)?;
    tracing::debug!(port = name, baud = BAUD_RATE, "Serial port opened");
    Ok(port)
}
