//! Transports the console client can talk over

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Byte stream to the console.
///
/// Implemented for a local serial port, for a TCP serial server (ser2net and
/// friends) and by the simulated console. Reads that time out must fail with
/// `TimedOut` or `WouldBlock`.
pub trait Channel: Read + Write + Send {
    /// Bound every read and write by `timeout`
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Local serial port
pub struct SerialChannel(Box<dyn SerialPort>);

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self(port)
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(self.0.set_timeout(timeout)?)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        Ok(self.0.clear(ClearBuffer::Input)?)
    }
}

/// Console behind a TCP serial server
pub struct TcpChannel(TcpStream);

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self(stream)
    }

    /// Read and discard until the socket would block
    fn drain(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 512];
        loop {
            match self.0.read(&mut scratch) {
                // Peer closed; the next real read reports it
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for TcpChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Channel for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_read_timeout(Some(timeout))?;
        self.0.set_write_timeout(Some(timeout))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.0.set_nonblocking(true)?;
        let drained = self.drain();
        self.0.set_nonblocking(false)?;
        drained
    }
}
