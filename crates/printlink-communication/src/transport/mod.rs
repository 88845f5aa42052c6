//! Byte transports underneath the protocol engine
//!
//! The engine only talks to a [`Transport`]: it reads newline terminated
//! lines with a timeout and writes raw bytes. Transports are created by a
//! [`TransportFactory`]; autodetection asks a [`CandidateSource`] which ports
//! and baud rates to try.
//!
//! Implementations:
//! - [`serial`]: real serial ports through the `serialport` crate
//! - [`virtual_port`]: an in-memory printer for tests and dry runs

pub mod serial;
pub mod virtual_port;

use async_trait::async_trait;
use printlink_core::Result;
use std::sync::Arc;
use std::time::Duration;

pub use serial::{is_printer_port, SerialCandidates, SerialTransport, SerialTransportFactory};
pub use virtual_port::{VirtualPort, VirtualPrinter, VirtualTransportFactory};

/// Baud rates tried during autodetection, most likely first.
pub const DEFAULT_BAUDRATES: [u32; 7] = [115200, 250000, 230400, 57600, 38400, 19200, 9600];

/// An open, line-oriented byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Port name.
    fn name(&self) -> &str;

    /// Baud rate in use.
    fn baudrate(&self) -> u32;

    /// Read one line including its terminator.
    ///
    /// Returns an empty buffer when `timeout` elapses and
    /// `ConnectionError::Closed` at end of stream.
    async fn read_line(&self, timeout: Duration) -> Result<Vec<u8>>;

    /// Write bytes, returning how many were accepted.
    async fn write(&self, data: &[u8]) -> Result<usize>;

    /// Close the stream. Further reads and writes fail.
    async fn close(&self) -> Result<()>;

    /// Make an in-flight read return early.
    fn cancel_pending_reads(&self) {}

    /// Make an in-flight write return early.
    fn cancel_pending_writes(&self) {}
}

/// Opens transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open `port` at `baudrate`; `timeout` bounds the open itself.
    async fn open(&self, port: &str, baudrate: u32, timeout: Duration)
        -> Result<Arc<dyn Transport>>;
}

/// Ports and baud rates to try during autodetection.
pub trait CandidateSource: Send + Sync {
    /// Ports that might have a printer attached.
    fn candidate_ports(&self) -> Result<Vec<String>>;

    /// Baud rates to try on every port.
    fn candidate_baudrates(&self) -> Vec<u32>;
}

/// Fixed candidate lists.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidates {
    /// Ports to try.
    pub ports: Vec<String>,
    /// Baud rates to try.
    pub baudrates: Vec<u32>,
}

impl StaticCandidates {
    /// Create a candidate source from fixed lists.
    pub fn new(ports: Vec<String>, baudrates: Vec<u32>) -> Self {
        Self { ports, baudrates }
    }
}

impl CandidateSource for StaticCandidates {
    fn candidate_ports(&self) -> Result<Vec<String>> {
        Ok(self.ports.clone())
    }

    fn candidate_baudrates(&self) -> Vec<u32> {
        self.baudrates.clone()
    }
}

/// Baud rates to try: `additional` first, then the defaults, without duplicates.
pub fn baudrate_candidates(additional: &[u32]) -> Vec<u32> {
    let mut result = Vec::with_capacity(additional.len() + DEFAULT_BAUDRATES.len());
    for baudrate in additional.iter().chain(DEFAULT_BAUDRATES.iter()) {
        if !result.contains(baudrate) {
            result.push(*baudrate);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baudrate_candidates() {
        assert_eq!(baudrate_candidates(&[]), DEFAULT_BAUDRATES.to_vec());
        let candidates = baudrate_candidates(&[500000, 115200]);
        assert_eq!(candidates[0], 500000);
        assert_eq!(candidates[1], 115200);
        assert_eq!(candidates.len(), DEFAULT_BAUDRATES.len() + 1);
    }
}
