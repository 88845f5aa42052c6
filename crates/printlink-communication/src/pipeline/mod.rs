//! Send pipeline
//!
//! Everything between `send_command` and the sending loop:
//! - [`OutgoingCommand`] and the [`QueueItem`]s built from it
//! - the command, job and send queues
//! - the clear-to-send gate
//! - line numbering, history and resend bookkeeping

pub mod command;
pub mod flow_control;
pub mod history;
pub mod queues;

pub use command::{tags, Marker, OutgoingCommand, Payload, QueueItem, SentCallback, Tags};
pub use flow_control::ClearToSend;
pub use history::{HistoryEntry, LineHistory, LineTracker, ResendDecision, ResendLine};
pub use queues::{AlreadyQueued, JobQueue, SendQueue, TypedQueue};
