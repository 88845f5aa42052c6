//! # printlink Communication
//!
//! Host side of the serial G-code protocol spoken by RepRap style 3D printer
//! firmware (Marlin, Repetier, Prusa, Klipper and relatives).
//!
//! - [`transport`]: serial ports, an in-memory virtual printer and autodetection candidates
//! - [`protocol`]: line framing and checksums, G-code helpers, parsing of firmware replies
//! - [`pipeline`]: queues, the clear-to-send gate, line history and resend bookkeeping
//! - [`job`]: host file, SD card and file transfer job sources
//! - [`hooks`] and [`scripts`]: extension points for command rewriting and lifecycle scripts
//! - [`engine`]: [`PrinterComm`], the connection state machine driving all of the above

pub mod engine;
pub mod hooks;
pub mod job;
pub mod pipeline;
pub mod protocol;
pub mod scripts;
pub mod transport;

pub use engine::{JobHold, JobStatus, PrinterComm, PrinterCommBuilder};
pub use hooks::{CommandPhase, HookOutcome, Hooks, PhaseCommand, Rewrite};
pub use job::{Job, JobSource, LocalFileJob, SdCardJob, StreamingJob};
pub use pipeline::{tags, HistoryEntry, OutgoingCommand, Tags};
pub use protocol::TemperatureOffsets;
pub use scripts::{NoScripts, ScriptContext, ScriptProvider, StaticScripts};
pub use transport::{
    CandidateSource, SerialTransportFactory, StaticCandidates, Transport, TransportFactory,
    VirtualPrinter, VirtualTransportFactory,
};
