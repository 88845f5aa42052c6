//! Connection and print lifecycle state.

use serde::{Deserialize, Serialize};

/// Where the active job's lines come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// A file on the host, streamed line by line.
    Local,
    /// A file stored on the printer's SD card.
    SdCard,
    /// A host file being copied onto the printer's SD card.
    Streaming,
}

/// Lifecycle state of a printer connection.
///
/// Exactly one state is active at a time. Only the engine's state transition
/// function changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Nothing has happened yet.
    #[default]
    None,
    /// The transport is being opened.
    OpeningTransport,
    /// Port and baud rate are being autodetected.
    DetectingTransport,
    /// Waiting for the firmware handshake.
    Connecting,
    /// Connected and idle.
    Operational,
    /// A job is starting.
    Starting,
    /// A job is running.
    Printing,
    /// A job is paused.
    Paused,
    /// A pause was requested and is being finalized.
    Pausing,
    /// A resume was requested and is being finalized.
    Resuming,
    /// The last job line was sent, waiting for the printer to finish.
    Finishing,
    /// A cancel was requested and is being finalized.
    Cancelling,
    /// A file is being copied to the SD card.
    TransferringFile,
    /// The connection was closed.
    Closed,
    /// The connection was closed after an error.
    ClosedWithError,
    /// A fatal error occurred.
    Error,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [ConnectionState; 16] = [
        ConnectionState::None,
        ConnectionState::OpeningTransport,
        ConnectionState::DetectingTransport,
        ConnectionState::Connecting,
        ConnectionState::Operational,
        ConnectionState::Starting,
        ConnectionState::Printing,
        ConnectionState::Paused,
        ConnectionState::Pausing,
        ConnectionState::Resuming,
        ConnectionState::Finishing,
        ConnectionState::Cancelling,
        ConnectionState::TransferringFile,
        ConnectionState::Closed,
        ConnectionState::ClosedWithError,
        ConnectionState::Error,
    ];

    /// True for the printing family: Starting, Printing, Cancelling, Pausing,
    /// Resuming and Finishing.
    pub fn is_printing(&self) -> bool {
        matches!(
            self,
            ConnectionState::Starting
                | ConnectionState::Printing
                | ConnectionState::Cancelling
                | ConnectionState::Pausing
                | ConnectionState::Resuming
                | ConnectionState::Finishing
        )
    }

    /// True for the printing family plus Operational, Paused and TransferringFile.
    pub fn is_operational(&self) -> bool {
        self.is_printing()
            || matches!(
                self,
                ConnectionState::Operational
                    | ConnectionState::Paused
                    | ConnectionState::TransferringFile
            )
    }

    /// True for Closed and ClosedWithError.
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::ClosedWithError)
    }

    /// True for Error and ClosedWithError.
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error | ConnectionState::ClosedWithError)
    }

    /// True while a job is printing, paused, pausing or cancelling.
    pub fn is_busy(&self) -> bool {
        self.is_printing() || matches!(self, ConnectionState::Paused)
    }

    /// Upper-case identifier, stable across releases.
    pub fn id(&self) -> &'static str {
        match self {
            ConnectionState::None => "NONE",
            ConnectionState::OpeningTransport => "OPEN_SERIAL",
            ConnectionState::DetectingTransport => "DETECT_SERIAL",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Operational => "OPERATIONAL",
            ConnectionState::Starting => "STARTING",
            ConnectionState::Printing => "PRINTING",
            ConnectionState::Paused => "PAUSED",
            ConnectionState::Pausing => "PAUSING",
            ConnectionState::Resuming => "RESUMING",
            ConnectionState::Finishing => "FINISHING",
            ConnectionState::Cancelling => "CANCELLING",
            ConnectionState::TransferringFile => "TRANSFERING_FILE",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::ClosedWithError => "CLOSED_WITH_ERROR",
            ConnectionState::Error => "ERROR",
        }
    }

    /// Human-readable label.
    ///
    /// `origin` refines the Starting/Printing labels for SD and streaming jobs,
    /// `error` fills in the error states.
    pub fn label(&self, origin: Option<JobOrigin>, error: Option<&str>) -> String {
        let error = error.unwrap_or("");
        match self {
            ConnectionState::None | ConnectionState::Closed => "Offline".to_string(),
            ConnectionState::OpeningTransport => "Opening serial connection".to_string(),
            ConnectionState::DetectingTransport => "Detecting serial connection".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Operational => "Operational".to_string(),
            ConnectionState::Starting => match origin {
                Some(JobOrigin::SdCard) => "Starting print from SD".to_string(),
                Some(JobOrigin::Streaming) => "Starting to send file to SD".to_string(),
                _ => "Starting".to_string(),
            },
            ConnectionState::Printing => match origin {
                Some(JobOrigin::SdCard) => "Printing from SD".to_string(),
                Some(JobOrigin::Streaming) => "Sending file to SD".to_string(),
                _ => "Printing".to_string(),
            },
            ConnectionState::Paused => "Paused".to_string(),
            ConnectionState::Pausing => "Pausing".to_string(),
            ConnectionState::Resuming => "Resuming".to_string(),
            ConnectionState::Finishing => "Finishing".to_string(),
            ConnectionState::Cancelling => "Cancelling".to_string(),
            ConnectionState::TransferringFile => "Transferring file to SD".to_string(),
            ConnectionState::Error => format!("Error: {}", error),
            ConnectionState::ClosedWithError => format!("Offline (Error: {})", error),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        for state in ConnectionState::ALL {
            if state.is_printing() {
                assert!(state.is_operational(), "{state} should be operational");
            }
        }
        assert!(ConnectionState::Paused.is_operational());
        assert!(!ConnectionState::Paused.is_printing());
        assert!(ConnectionState::TransferringFile.is_operational());
        assert!(!ConnectionState::Connecting.is_operational());
        assert!(ConnectionState::ClosedWithError.is_closed());
        assert!(ConnectionState::ClosedWithError.is_error());
    }

    #[test]
    fn test_labels() {
        assert_eq!(ConnectionState::None.label(None, None), "Offline");
        assert_eq!(
            ConnectionState::Printing.label(Some(JobOrigin::SdCard), None),
            "Printing from SD"
        );
        assert_eq!(
            ConnectionState::Starting.label(Some(JobOrigin::Streaming), None),
            "Starting to send file to SD"
        );
        assert_eq!(
            ConnectionState::ClosedWithError.label(None, Some("Too many timeouts")),
            "Offline (Error: Too many timeouts)"
        );
        assert_eq!(
            ConnectionState::Error.label(None, Some("boom")),
            "Error: boom"
        );
    }
}
