use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::codec::Command;

// Serial errors
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    #[error("Failed to write {command} to serial port: {source}")]
    Write { command: Command, source: io::Error },

    #[error("Failed to read from serial port: {0}")]
    Read(io::Error),

    #[error("Serial worker error: {0}")]
    Worker(String),
}

/// Blocking access to one serial device.
///
/// No operation retries; callers decide what a failure means for them.
pub trait SerialTransport: Send + fmt::Debug {
    /// Writes the single byte of `command`.
    fn send(&mut self, command: Command) -> Result<(), SerialError>;

    /// Waits up to `timeout` for a newline terminated line.
    ///
    /// `Ok(None)` means nothing complete arrived in time, which is routine.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SerialError>;

    /// Non-blocking check for unread data.
    fn has_pending(&mut self) -> bool;
}

// serialport backed transport
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    name: String,
    // Bytes read past the last returned line
    buffer: Vec<u8>,
}

impl fmt::Debug for SerialPortTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SerialPortTransport")
            .field("name", &self.name)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl SerialPortTransport {
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, SerialError> {
        info!("Opening serial port {} at {} baud", name, baud_rate);
        let port = serialport::new(name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|source| SerialError::Open {
                port: name.to_string(),
                source,
            })?;
        info!("Serial port {} opened", name);

        Ok(Self {
            port,
            name: name.to_string(),
            buffer: Vec::with_capacity(64),
        })
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        Some(decode_line(&line))
    }
}

impl SerialTransport for SerialPortTransport {
    fn send(&mut self, command: Command) -> Result<(), SerialError> {
        debug!("Writing {} ({:?}) to {}", command, command.encode() as char, self.name);
        self.port
            .write_all(&[command.encode()])
            .and_then(|_| self.port.flush())
            .map_err(|source| SerialError::Write { command, source })
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, SerialError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    "No complete line from {} within {:?} ({} bytes buffered)",
                    self.name,
                    timeout,
                    self.buffer.len()
                );
                return Ok(None);
            }

            self.port
                .set_timeout(remaining)
                .map_err(|e| SerialError::Read(e.into()))?;

            match self.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SerialError::Read(e)),
            }
        }
    }

    fn has_pending(&mut self) -> bool {
        if !self.buffer.is_empty() {
            return true;
        }
        match self.port.bytes_to_read() {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Unable to query pending bytes on {}: {}", self.name, e);
                false
            }
        }
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        info!("Closing serial port {}", self.name);
    }
}

// Strips the line terminator and tolerates non UTF-8 noise
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"SENSOR_VALUE:12\r\n"), "SENSOR_VALUE:12");
        assert_eq!(decode_line(b"LIGHT OFF\n"), "LIGHT OFF");
        assert_eq!(decode_line(b"no newline"), "no newline");
    }

    #[test]
    fn decode_line_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"ok\xff\n"), "ok\u{fffd}");
    }
}
