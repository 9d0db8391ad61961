//! `serialport` backend for the detector link.
//!
//! Requires the `instrument_serial` feature. Without it every method that
//! touches the port fails with [`DaqError::SerialFeatureDisabled`].

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::SerialDevice;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::{ClearBuffer, SerialPort};

/// Serial device backed by the `serialport` crate.
pub struct SerialPortDevice {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Per-read timeout handed to the driver
    timeout: Duration,

    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialPortDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortDevice")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SerialPortDevice {
    /// Create a closed device for `port_name` at `baud_rate`.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(10),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set the driver read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Port name
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Driver read timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[cfg(feature = "instrument_serial")]
    fn port_mut(&mut self) -> AppResult<&mut (dyn SerialPort + 'static)> {
        self.port
            .as_deref_mut()
            .ok_or(DaqError::SerialPortNotConnected)
    }
}

#[cfg(feature = "instrument_serial")]
impl SerialDevice for SerialPortDevice {
    fn open(&mut self) -> AppResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        tracing::info!(port = %self.port_name, baud = self.baud_rate, "Serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_available(&mut self) -> AppResult<usize> {
        Ok(self.port_mut()?.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        let port = self.port_mut()?;
        let queued = port.bytes_to_read()? as usize;
        if queued == 0 {
            return Ok(0);
        }
        let len = queued.min(buf.len());
        match port.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> AppResult<()> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl SerialDevice for SerialPortDevice {
    fn open(&mut self) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    fn bytes_available(&mut self) -> AppResult<usize> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn read_available(&mut self, _buf: &mut [u8]) -> AppResult<usize> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn clear_input(&mut self) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_device_reports_not_connected() {
        let mut device = SerialPortDevice::new("/dev/null-interf", 115_200);
        assert!(!device.is_open());
        assert!(device.bytes_available().is_err());
        device.close().unwrap();
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[test]
    fn test_open_without_feature() {
        let mut device = SerialPortDevice::new("/dev/ttyACM0", 115_200);
        assert!(matches!(device.open(), Err(DaqError::SerialFeatureDisabled)));
    }
}
