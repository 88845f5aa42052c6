//! Serial port transport
//!
//! Wraps a `serialport` handle. The blocking port calls run on tokio's
//! blocking pool; reads and writes use separate handles so the monitoring
//! and sending loops never wait on each other.

use super::{baudrate_candidates, CandidateSource, Transport, TransportFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use printlink_core::{ConnectionError, Result};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const READ_SLICE: Duration = Duration::from_millis(100);

/// Check if a port name looks like a printer connection
///
/// Valid patterns:
/// - Windows: COM* (COM1, COM2, etc.)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*, /dev/ttyAMA*, /dev/rfcomm*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*, /dev/tty.usb*
pub fn is_printer_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    [
        "/dev/ttyUSB",
        "/dev/ttyACM",
        "/dev/ttyAMA",
        "/dev/rfcomm",
        "/dev/cu.usbserial-",
        "/dev/cu.usbmodem",
        "/dev/tty.usb",
    ]
    .iter()
    .any(|prefix| port_name.starts_with(prefix))
}

struct Reader {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl Reader {
    fn read_line(&mut self, timeout: Duration, cancel: &AtomicBool) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                return Ok(self.pending.drain(..=pos).collect());
            }

            let now = Instant::now();
            if now >= deadline || cancel.swap(false, Ordering::SeqCst) {
                return Ok(Vec::new());
            }

            self.port
                .set_timeout((deadline - now).min(READ_SLICE))
                .map_err(|e| ConnectionError::ReadFailed {
                    reason: e.to_string(),
                })?;

            match self.port.read(&mut buf) {
                Ok(0) => return Err(ConnectionError::Closed.into()),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    continue
                }
                Err(e) => {
                    return Err(ConnectionError::ReadFailed {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
    }
}

/// An open serial port.
pub struct SerialTransport {
    name: String,
    baudrate: u32,
    reader: Arc<Mutex<Option<Reader>>>,
    writer: Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>,
    cancel_reads: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open `port` at `baudrate`. Blocks the calling thread.
    pub fn open_blocking(port: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let handle = serialport::new(port, baudrate)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", port, e);
                ConnectionError::FailedToOpen {
                    port: port.to_string(),
                    baudrate,
                    reason: e.to_string(),
                }
            })?;

        let writer = handle.try_clone().map_err(|e| ConnectionError::FailedToOpen {
            port: port.to_string(),
            baudrate,
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: port.to_string(),
            baudrate,
            reader: Arc::new(Mutex::new(Some(Reader {
                port: handle,
                pending: Vec::new(),
            }))),
            writer: Arc::new(Mutex::new(Some(writer))),
            cancel_reads: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn baudrate(&self) -> u32 {
        self.baudrate
    }

    async fn read_line(&self, timeout: Duration) -> Result<Vec<u8>> {
        let reader = self.reader.clone();
        let cancel = self.cancel_reads.clone();
        tokio::task::spawn_blocking(move || match reader.lock().as_mut() {
            Some(reader) => reader.read_line(timeout, &cancel),
            None => Err(ConnectionError::Closed.into()),
        })
        .await
        .map_err(|e| ConnectionError::ReadFailed {
            reason: e.to_string(),
        })?
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut guard = writer.lock();
            let port = guard.as_mut().ok_or(ConnectionError::Closed)?;
            match port.write(&data) {
                Ok(n) => {
                    port.flush().ok();
                    Ok(n)
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(ConnectionError::WriteFailed {
                    reason: e.to_string(),
                }
                .into()),
            }
        })
        .await
        .map_err(|e| ConnectionError::WriteFailed {
            reason: e.to_string(),
        })?
    }

    async fn close(&self) -> Result<()> {
        self.cancel_reads.store(true, Ordering::SeqCst);
        let reader = self.reader.clone();
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            writer.lock().take();
            reader.lock().take();
        })
        .await
        .map_err(|e| ConnectionError::Other {
            message: e.to_string(),
        })?;
        tracing::debug!("Closed serial port {}", self.name);
        Ok(())
    }

    fn cancel_pending_reads(&self) {
        self.cancel_reads.store(true, Ordering::SeqCst);
    }
}

/// Opens [`SerialTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransportFactory;

#[async_trait]
impl TransportFactory for SerialTransportFactory {
    async fn open(
        &self,
        port: &str,
        baudrate: u32,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>> {
        let port = port.to_string();
        let transport = tokio::task::spawn_blocking(move || {
            SerialTransport::open_blocking(&port, baudrate, timeout)
        })
        .await
        .map_err(|e| ConnectionError::Other {
            message: e.to_string(),
        })??;
        Ok(Arc::new(transport))
    }
}

/// Serial ports reported by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SerialCandidates {
    additional_baudrates: Vec<u32>,
}

impl SerialCandidates {
    /// Try `additional_baudrates` before the default ones.
    pub fn new(additional_baudrates: Vec<u32>) -> Self {
        Self {
            additional_baudrates,
        }
    }
}

impl CandidateSource for SerialCandidates {
    fn candidate_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(|e| {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            ConnectionError::Enumeration {
                reason: e.to_string(),
            }
        })?;
        Ok(ports
            .into_iter()
            .map(|port| port.port_name)
            .filter(|name| is_printer_port(name))
            .collect())
    }

    fn candidate_baudrates(&self) -> Vec<u32> {
        baudrate_candidates(&self.additional_baudrates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_port_patterns() {
        assert!(is_printer_port("COM3"));
        assert!(!is_printer_port("COM"));
        assert!(!is_printer_port("COMX"));
        assert!(is_printer_port("/dev/ttyUSB0"));
        assert!(is_printer_port("/dev/ttyACM1"));
        assert!(is_printer_port("/dev/ttyAMA0"));
        assert!(is_printer_port("/dev/cu.usbmodem14101"));
        assert!(!is_printer_port("/dev/ttyS0"));
        assert!(!is_printer_port("/dev/null"));
    }
}
