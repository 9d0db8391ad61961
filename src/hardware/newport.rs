//! Newport picomotor controller driver.
//!
//! Text protocol, one command per line:
//!
//! | Command      | Meaning                     | Reply        |
//! |--------------|-----------------------------|--------------|
//! | `{id}PR{v}`  | move relative by `v` steps  | none         |
//! | `{id}PA{v}`  | move to absolute `v`        | none         |
//! | `{id}PA?`    | target of last absolute move| `{id}>{v}`   |
//! | `{id}TP?`    | current position            | `{id}>{v}`   |
//! | `{id}DH?`    | home position               | `{id}>{v}`   |
//! | `{id}DH{v}`  | define home position        | none         |
//! | `{id}MD?`    | motion done                 | `{id}>{done}` |
//!
//! Replies carry a two-character prefix; the payload starts at character 2.
//!
//! The controller talks to the hardware through a [`CommandTransport`]; the
//! serial implementation is [`SerialCommandTransport`].

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{CommandTransport, MotorController};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Integer payload of a query reply, starting at character 2.
pub fn parse_payload(command: &str, reply: &str) -> AppResult<i64> {
    let payload = reply.trim().get(2..).unwrap_or("").trim();
    payload.parse::<i64>().map_err(|_| {
        DaqError::Motor(format!(
            "Malformed reply to '{command}': '{}'",
            reply.trim()
        ))
    })
}

/// Motion-done flag of an `MD?` reply: the digit at character 2.
pub fn parse_done_flag(command: &str, reply: &str) -> AppResult<bool> {
    reply
        .trim()
        .chars()
        .nth(2)
        .and_then(|c| c.to_digit(10))
        .map(|digit| digit != 0)
        .ok_or_else(|| {
            DaqError::Motor(format!(
                "Malformed reply to '{command}': '{}'",
                reply.trim()
            ))
        })
}

/// Newport controller speaking the picomotor command set.
#[derive(Debug)]
pub struct NewportController<T: CommandTransport> {
    transport: T,
}

impl<T: CommandTransport> NewportController<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn query(&self, command: String) -> AppResult<i64> {
        let reply = self.transport.command(&command).await?;
        parse_payload(&command, &reply)
    }
}

#[async_trait]
impl<T: CommandTransport> MotorController for NewportController<T> {
    async fn move_relative(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        tracing::debug!(motor_id, steps, "Newport: relative move");
        self.transport
            .command(&format!("{motor_id}PR{steps}"))
            .await
            .map(|_| ())
    }

    async fn move_absolute(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        tracing::debug!(motor_id, steps, "Newport: absolute move");
        self.transport
            .command(&format!("{motor_id}PA{steps}"))
            .await
            .map(|_| ())
    }

    async fn position(&self, motor_id: u8) -> AppResult<i64> {
        self.query(format!("{motor_id}TP?")).await
    }

    async fn home_position(&self, motor_id: u8) -> AppResult<i64> {
        self.query(format!("{motor_id}DH?")).await
    }

    async fn set_home_position(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        self.transport
            .command(&format!("{motor_id}DH{steps}"))
            .await
            .map(|_| ())
    }

    async fn target(&self, motor_id: u8) -> AppResult<i64> {
        self.query(format!("{motor_id}PA?")).await
    }

    async fn is_done(&self, motor_id: u8) -> AppResult<bool> {
        let command = format!("{motor_id}MD?");
        let reply = self.transport.command(&command).await?;
        parse_done_flag(&command, &reply)
    }
}

// =============================================================================
// SerialCommandTransport
// =============================================================================

/// Command transport over a serial line.
///
/// Commands are terminated with `line_terminator`; replies are read up to
/// `response_delimiter`. Only queries (commands ending in `?`) wait for a
/// reply. Blocking I/O runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SerialCommandTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    response_delimiter: u8,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl std::fmt::Debug for SerialCommandTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialCommandTransport")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SerialCommandTransport {
    /// Create an unconnected transport.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r".to_string(),
            response_delimiter: b'\n',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the command terminator.
    #[must_use]
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the reply delimiter byte.
    #[must_use]
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Open the serial port.
    #[cfg(feature = "instrument_serial")]
    pub fn connect(&mut self) -> AppResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;
        tracing::info!(port = %self.port_name, "Motor controller connected");
        self.port = Some(Arc::new(Mutex::new(port)));
        Ok(())
    }

    /// Open the serial port.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn connect(&mut self) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

#[async_trait]
impl CommandTransport for SerialCommandTransport {
    #[cfg(feature = "instrument_serial")]
    async fn command(&self, command: &str) -> AppResult<String> {
        let port = self
            .port
            .as_ref()
            .ok_or(DaqError::SerialPortNotConnected)?
            .clone();

        let framed = format!("{command}{}", self.line_terminator);
        let expects_reply = command.ends_with('?');
        let delimiter = self.response_delimiter;
        let timeout = self.timeout;
        let command = command.to_string();

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut port = port.blocking_lock();
            port.write_all(framed.as_bytes())?;
            port.flush()?;
            tracing::trace!(command = %command, "Sent motor command");

            if !expects_reply {
                return Ok(String::new());
            }

            let mut reply = Vec::new();
            let mut byte = [0u8; 1];
            let start = std::time::Instant::now();
            loop {
                if start.elapsed() > timeout {
                    return Err(DaqError::Motor(format!(
                        "No reply to '{command}' after {timeout:?}"
                    )));
                }
                match port.read(&mut byte) {
                    Ok(1) if byte[0] == delimiter => break,
                    Ok(1) => reply.push(byte[0]),
                    Ok(_) => return Err(DaqError::Serial("Unexpected end of stream".into())),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(e.into()),
                }
            }

            let reply = String::from_utf8_lossy(&reply).trim().to_string();
            tracing::trace!(command = %command, reply = %reply, "Motor reply");
            Ok(reply)
        })
        .await
        .map_err(|e| DaqError::Worker(format!("Serial I/O task failed: {e}")))?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn command(&self, _command: &str) -> AppResult<String> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("1TP?", "1>1250").unwrap(), 1250);
        assert_eq!(parse_payload("2DH?", "2>-40\r").unwrap(), -40);
        assert_eq!(parse_payload("3PA?", "3>+75").unwrap(), 75);
    }

    #[test]
    fn test_parse_payload_rejects_garbage() {
        let err = parse_payload("1TP?", "1>").unwrap_err();
        assert!(matches!(err, DaqError::Motor(_)));
        assert!(parse_payload("1TP?", "1>abc").is_err());
    }

    #[test]
    fn test_parse_done_flag() {
        assert!(parse_done_flag("1MD?", "1>1").unwrap());
        assert!(!parse_done_flag("1MD?", "1>0").unwrap());
        assert!(parse_done_flag("1MD?", "1>").is_err());
    }

    #[tokio::test]
    async fn test_unconnected_transport() {
        let transport = SerialCommandTransport::new("/dev/ttyUSB9", 19_200);
        assert!(transport.command("1TP?").await.is_err());
    }
}
