//! # printlink Core
//!
//! Types shared by every printlink crate:
//! - the error taxonomy and fatal error reasons
//! - the connection state machine's states and labels
//! - position, temperature and firmware capability records
//! - the event bus carrying engine notifications

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    ConnectionState, FirmwareCapabilities, JobOrigin, PositionRecord, SdFileEntry,
    TemperatureReading, TemperatureRecord,
};

pub use error::{ConnectionError, Error, ErrorReason, ProtocolError, Result};

pub use event_bus::{
    CommunicationEvent, ConnectionEvent, ErrorEvent, EventBus, EventCategory,
    EventFilter, FirmwareEvent, JobEvent, PositionReason, PrinterEvent, SdEvent,
    TelemetryEvent, TransferEvent,
};
