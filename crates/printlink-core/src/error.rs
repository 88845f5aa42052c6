//! Error handling for printlink
//!
//! Provides the error types shared by every layer of the engine:
//! - Connection errors (transport open/read/write/close)
//! - Protocol errors (operations rejected by the engine)
//! - Fatal error reasons reported alongside `Error` events
//!
//! All error types use `thiserror` for ergonomic error handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection error type
///
/// Represents failures of the byte transport underneath the protocol engine.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port} at {baudrate} baud: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The baud rate that was requested.
        baudrate: u32,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The transport has been closed
    #[error("Transport is closed")]
    Closed,

    /// Reading from the transport failed
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// The reason the read failed.
        reason: String,
    },

    /// Writing to the transport failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Nothing could be written within the allowed number of passes
    #[error("Could not write anything to the serial port in {passes} tries")]
    WriteStalled {
        /// The number of write passes that made no progress.
        passes: u32,
    },

    /// Candidate port enumeration failed
    #[error("Port enumeration failed: {reason}")]
    Enumeration {
        /// The reason enumeration failed.
        reason: String,
    },

    /// Generic connection error
    #[error("Connection error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Protocol error type
///
/// Raised when an operation on the engine cannot be performed in its current state.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// A print was requested without a selected file
    #[error("No file selected for printing")]
    NoFileSelected,

    /// The operation is not allowed in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: String,
        /// The label of the state the engine was in.
        state: String,
    },

    /// A job data source failed
    #[error("Job source error: {reason}")]
    JobSource {
        /// The reason the job source failed.
        reason: String,
    },

    /// A custom temperature id collides with a reserved heater id
    #[error("Reserved temperature identifier: {identifier}")]
    ReservedIdentifier {
        /// The rejected identifier.
        identifier: String,
    },
}

/// Reason tag carried by fatal error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The transport failed or reported an error.
    Connection,
    /// No working port/baud combination was found.
    Autodetect,
    /// Too many consecutive communication timeouts.
    Timeout,
    /// The firmware reported a fatal error.
    Firmware,
    /// A resend could not be served from the line history.
    Resend,
    /// The firmware keeps requesting the same line.
    ResendLoop,
    /// An unexpected internal failure.
    Crash,
    /// A print could not be started.
    StartPrint,
}

impl ErrorReason {
    /// Wire/tag representation of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Connection => "connection",
            ErrorReason::Autodetect => "autodetect",
            ErrorReason::Timeout => "timeout",
            ErrorReason::Firmware => "firmware",
            ErrorReason::Resend => "resend",
            ErrorReason::ResendLoop => "resend_loop",
            ErrorReason::Crash => "crash",
            ErrorReason::StartPrint => "start_print",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for printlink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if the transport reported itself closed
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Connection(ConnectionError::Closed))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reason_tags() {
        assert_eq!(ErrorReason::ResendLoop.to_string(), "resend_loop");
        assert_eq!(ErrorReason::StartPrint.as_str(), "start_print");
        assert_eq!(ErrorReason::Autodetect.to_string(), "autodetect");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ConnectionError::Closed.into();
        assert!(err.is_connection_error());
        assert!(err.is_closed());

        let err: Error = ProtocolError::NoFileSelected.into();
        assert!(err.is_protocol_error());
        assert_eq!(err.to_string(), "No file selected for printing");
    }

    #[test]
    fn test_error_display() {
        let err = ConnectionError::FailedToOpen {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115200,
            reason: "busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open port /dev/ttyUSB0 at 115200 baud: busy"
        );
        assert_eq!(Error::other("boom").to_string(), "boom");
    }
}
