//! Event type definitions for the event bus.
//!
//! This module defines every notification the engine emits, organized by
//! category. Events are cloneable and serializable for logging/replay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{ConnectionState, JobOrigin, PositionRecord, SdFileEntry, TemperatureRecord};
use crate::error::ErrorReason;

/// Root event enum for all engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PrinterEvent {
    /// Connection lifecycle events
    Connection(ConnectionEvent),
    /// Print job events
    Job(JobEvent),
    /// Temperature and position updates
    Telemetry(TelemetryEvent),
    /// SD card events
    Sd(SdEvent),
    /// Host to SD card file transfers
    Transfer(TransferEvent),
    /// Firmware identification and capabilities
    Firmware(FirmwareEvent),
    /// Raw communication log
    Communication(CommunicationEvent),
    /// Error and diagnostic events
    Error(ErrorEvent),
}

impl PrinterEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            PrinterEvent::Connection(_) => EventCategory::Connection,
            PrinterEvent::Job(_) => EventCategory::Job,
            PrinterEvent::Telemetry(_) => EventCategory::Telemetry,
            PrinterEvent::Sd(_) => EventCategory::Sd,
            PrinterEvent::Transfer(_) => EventCategory::Transfer,
            PrinterEvent::Firmware(_) => EventCategory::Firmware,
            PrinterEvent::Communication(_) => EventCategory::Communication,
            PrinterEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            PrinterEvent::Connection(e) => e.description(),
            PrinterEvent::Job(e) => e.description(),
            PrinterEvent::Telemetry(e) => e.description(),
            PrinterEvent::Sd(e) => e.description(),
            PrinterEvent::Transfer(e) => e.description(),
            PrinterEvent::Firmware(e) => e.description(),
            PrinterEvent::Communication(e) => e.description(),
            PrinterEvent::Error(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle events.
    Connection,
    /// Print job events.
    Job,
    /// Temperature and position updates.
    Telemetry,
    /// SD card events.
    Sd,
    /// File transfer events.
    Transfer,
    /// Firmware identification events.
    Firmware,
    /// Raw communication log.
    Communication,
    /// Error and diagnostic events.
    Error,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Telemetry => write!(f, "Telemetry"),
            EventCategory::Sd => write!(f, "Sd"),
            EventCategory::Transfer => write!(f, "Transfer"),
            EventCategory::Firmware => write!(f, "Firmware"),
            EventCategory::Communication => write!(f, "Communication"),
            EventCategory::Error => write!(f, "Error"),
        }
    }
}

/// Connection lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The engine moved to a new state.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
        /// Human-readable label of the new state.
        label: String,
    },
    /// The firmware handshake completed.
    Connected {
        /// Port the printer is connected on.
        port: String,
        /// Baud rate in use.
        baudrate: u32,
    },
    /// The firmware asked the host to disconnect.
    ForceDisconnect,
    /// The firmware restarted on its own.
    PrinterReset {
        /// True if no job was running when it happened.
        idle: bool,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { from, to, label } => {
                format!("State changed from {} to {} ({})", from, to, label)
            }
            ConnectionEvent::Connected { port, baudrate } => {
                format!("Connected to {} at {} baud", port, baudrate)
            }
            ConnectionEvent::ForceDisconnect => "Firmware requested disconnect".to_string(),
            ConnectionEvent::PrinterReset { idle } => {
                format!("Printer reset detected (idle: {})", idle)
            }
        }
    }
}

/// Print job events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A file was selected, or the selection was cleared.
    FileSelected {
        /// Selected file, `None` when the selection was cleared.
        name: Option<String>,
        /// File size in bytes, if known.
        size: Option<u64>,
        /// Where the file lives.
        origin: Option<JobOrigin>,
    },
    /// A print started.
    PrintStarted {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
    },
    /// A print was paused.
    PrintPaused {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
    },
    /// A print was resumed.
    PrintResumed {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
    },
    /// A cancel was requested.
    PrintCancelling {
        /// Printed file.
        name: String,
        /// Firmware error that caused the cancel, if any.
        firmware_error: Option<String>,
    },
    /// A print was cancelled.
    PrintCancelled {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
        /// File position at the time of the cancel.
        position: u64,
    },
    /// A print finished.
    PrintDone {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
        /// Seconds since the print started.
        elapsed_secs: f64,
    },
    /// A print failed because the connection went away.
    PrintFailed {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
        /// Why the print failed.
        reason: String,
    },
    /// Job progress changed.
    Progress {
        /// Fraction completed, `None` when the size is unknown.
        progress: Option<f64>,
        /// Current byte position.
        position: u64,
    },
    /// File position recorded when a job was interrupted.
    FilePositionRecorded {
        /// Printed file.
        name: String,
        /// Where the file lives.
        origin: JobOrigin,
        /// Byte position at interruption.
        position: u64,
    },
}

impl JobEvent {
    fn description(&self) -> String {
        match self {
            JobEvent::FileSelected { name: Some(name), .. } => format!("File selected: {}", name),
            JobEvent::FileSelected { name: None, .. } => "File unselected".to_string(),
            JobEvent::PrintStarted { name, .. } => format!("Print started: {}", name),
            JobEvent::PrintPaused { name, .. } => format!("Print paused: {}", name),
            JobEvent::PrintResumed { name, .. } => format!("Print resumed: {}", name),
            JobEvent::PrintCancelling { name, .. } => format!("Cancelling print: {}", name),
            JobEvent::PrintCancelled { name, position, .. } => {
                format!("Print cancelled: {} at {}", name, position)
            }
            JobEvent::PrintDone { name, elapsed_secs, .. } => {
                format!("Print done: {} after {:.1}s", name, elapsed_secs)
            }
            JobEvent::PrintFailed { name, reason, .. } => {
                format!("Print failed: {} ({})", name, reason)
            }
            JobEvent::Progress { progress, position } => match progress {
                Some(p) => format!("Progress: {:.1}%", p * 100.0),
                None => format!("Progress: byte {}", position),
            },
            JobEvent::FilePositionRecorded { name, position, .. } => {
                format!("Recorded position {} of {}", position, name)
            }
        }
    }
}

/// Why a position report was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionReason {
    /// Snapshot taken for a pause.
    Pause,
    /// Snapshot taken for a cancel.
    Cancel,
}

/// Temperature and position updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// New temperature readings.
    Temperature(TemperatureRecord),
    /// New position report.
    Position {
        /// The reported position.
        position: PositionRecord,
        /// Snapshot reason, if the report completed one.
        reason: Option<PositionReason>,
    },
    /// The Z height changed.
    ZChange {
        /// New Z.
        z: f64,
        /// Previous Z, if known.
        old: Option<f64>,
    },
    /// The active tool changed.
    ToolChange {
        /// Previous tool.
        old: u32,
        /// New tool.
        new: u32,
    },
}

impl TelemetryEvent {
    fn description(&self) -> String {
        match self {
            TelemetryEvent::Temperature(_) => "Temperature update".to_string(),
            TelemetryEvent::Position { reason, .. } => match reason {
                Some(reason) => format!("Position update ({:?})", reason),
                None => "Position update".to_string(),
            },
            TelemetryEvent::ZChange { z, .. } => format!("Z changed to {}", z),
            TelemetryEvent::ToolChange { old, new } => format!("Tool changed T{} -> T{}", old, new),
        }
    }
}

/// SD card events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SdEvent {
    /// The card became available or unavailable.
    StateChanged {
        /// True if the card is ready.
        available: bool,
    },
    /// A file listing completed.
    FilesListed {
        /// Files on the card.
        files: Vec<SdFileEntry>,
    },
}

impl SdEvent {
    fn description(&self) -> String {
        match self {
            SdEvent::StateChanged { available } => format!("SD card available: {}", available),
            SdEvent::FilesListed { files } => format!("SD card lists {} files", files.len()),
        }
    }
}

/// Host to SD card file transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    /// A transfer started.
    Started {
        /// Host file.
        local: String,
        /// Target name on the card.
        remote: String,
        /// Bytes to transfer, if known.
        size: Option<u64>,
    },
    /// A transfer completed.
    Done {
        /// Host file.
        local: String,
        /// Target name on the card.
        remote: String,
        /// Seconds the transfer took.
        elapsed_secs: f64,
    },
    /// A transfer was aborted.
    Failed {
        /// Host file.
        local: String,
        /// Target name on the card.
        remote: String,
        /// Seconds until the transfer was aborted.
        elapsed_secs: f64,
    },
}

impl TransferEvent {
    fn description(&self) -> String {
        match self {
            TransferEvent::Started { local, remote, .. } => {
                format!("Transfer of {} to {} started", local, remote)
            }
            TransferEvent::Done { local, remote, elapsed_secs } => {
                format!("Transfer of {} to {} done in {:.1}s", local, remote, elapsed_secs)
            }
            TransferEvent::Failed { local, remote, .. } => {
                format!("Transfer of {} to {} failed", local, remote)
            }
        }
    }
}

/// Firmware identification and capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FirmwareEvent {
    /// A `NAME:` line was parsed.
    Info {
        /// Firmware name.
        name: String,
        /// All reported key/value pairs.
        data: BTreeMap<String, String>,
    },
    /// A `Cap:` line was parsed.
    Capability {
        /// Capability name.
        name: String,
        /// Whether it is enabled.
        enabled: bool,
    },
}

impl FirmwareEvent {
    fn description(&self) -> String {
        match self {
            FirmwareEvent::Info { name, .. } => format!("Firmware: {}", name),
            FirmwareEvent::Capability { name, enabled } => {
                format!("Capability {}: {}", name, enabled)
            }
        }
    }
}

/// Raw communication log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommunicationEvent {
    /// A terminal-style log line ("Send: ...", "Recv: ...").
    Log {
        /// The log line.
        line: String,
    },
}

impl CommunicationEvent {
    fn description(&self) -> String {
        match self {
            CommunicationEvent::Log { line } => line.clone(),
        }
    }
}

/// Error and diagnostic events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ErrorEvent {
    /// A fatal error ended the connection or the job.
    Fatal {
        /// Human-readable error.
        error: String,
        /// Reason tag.
        reason: ErrorReason,
    },
    /// A resend request could not be served while idle.
    ResendFailed {
        /// Requested line.
        line: u64,
        /// Next line number that would have been assigned.
        current_line: u64,
        /// History entries available.
        available: usize,
    },
}

impl ErrorEvent {
    fn description(&self) -> String {
        match self {
            ErrorEvent::Fatal { error, reason } => format!("Error ({}): {}", reason, error),
            ErrorEvent::ResendFailed {
                line, current_line, ..
            } => format!(
                "Could not serve resend of line {} (current line {})",
                line, current_line
            ),
        }
    }
}
