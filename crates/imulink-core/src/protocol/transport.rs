//! Transport seam between the link session and the physical device

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{serial, ProtocolError};

/// An open byte channel to the sensor.
///
/// Reads must be bounded by a timeout: a read that times out returns
/// `ErrorKind::TimedOut` (or `WouldBlock`) so the reader can observe
/// shutdown promptly.
pub trait Transport: Read + Write + Send {
    /// Number of bytes waiting to be read; an error means the link is dead
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Discard pending input
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Opens transports and reports whether the device is plugged in
pub trait Connector: Send + Sync {
    /// Whether the device is currently enumerable, independent of any open handle
    fn is_present(&self) -> bool;

    /// Open a new transport to the device
    fn open(&self) -> Result<Box<dyn Transport>, ProtocolError>;

    /// Human readable identity used in logs
    fn describe(&self) -> String;
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// Connector for a named serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Connector for `port_name`; `timeout` bounds every read
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
        }
    }
}

impl Connector for SerialConnector {
    fn is_present(&self) -> bool {
        serial::port_exists(&self.port_name)
    }

    fn open(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        let port = serial::open_port(&self.port_name, self.baud_rate, self.timeout)?;
        let mut transport = SerialTransport::new(port);
        transport.clear_input()?;
        Ok(Box::new(transport))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}
