//! Outgoing commands and the items carried by the send pipeline.

use printlink_core::ConnectionState;
use std::collections::BTreeSet;

/// Provenance labels attached to a command (`source:job`, `trigger:...`).
pub type Tags = BTreeSet<String>;

/// Callback run once a command has been written to the transport.
pub struct SentCallback(Box<dyn FnOnce() + Send>);

impl SentCallback {
    /// Wrap a closure.
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(callback))
    }

    /// Run the callback.
    pub fn run(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for SentCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SentCallback")
    }
}

/// A command handed to `PrinterComm::send_command`.
///
/// ```rust,ignore
/// let cmd = OutgoingCommand::new("M105").with_type("temperature_poll");
/// comm.send_command(cmd);
/// ```
#[derive(Debug)]
pub struct OutgoingCommand {
    /// Command text.
    pub text: String,
    /// Deduplication key: at most one pending command per type and queue.
    pub command_type: Option<String>,
    /// Provenance labels.
    pub tags: Tags,
    /// Run after the command was written.
    pub on_sent: Option<SentCallback>,
    /// Bypass the command queue while printing.
    pub force: bool,
    /// Route through the job queue.
    pub part_of_job: bool,
}

impl OutgoingCommand {
    /// Create a command with no type, tags or callback.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command_type: None,
            tags: Tags::new(),
            on_sent: None,
            force: false,
            part_of_job: false,
        }
    }

    /// Set the deduplication type.
    pub fn with_type(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    /// Add a provenance tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several provenance tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Run `callback` once the command was written.
    pub fn on_sent(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_sent = Some(SentCallback::new(callback));
        self
    }

    /// Bypass the command queue while printing.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Route through the job queue.
    pub fn part_of_job(mut self) -> Self {
        self.part_of_job = true;
        self
    }
}

impl From<&str> for OutgoingCommand {
    fn from(text: &str) -> Self {
        OutgoingCommand::new(text)
    }
}

impl From<String> for OutgoingCommand {
    fn from(text: String) -> Self {
        OutgoingCommand::new(text)
    }
}

/// Engine action executed when the sender reaches it in the queue.
#[derive(Debug)]
pub enum Marker {
    /// Switch state, optionally only if still in `only_from`.
    SetState {
        /// Target state.
        to: ConnectionState,
        /// Required current state.
        only_from: Option<ConnectionState>,
    },
    /// Finish a file transfer to the SD card.
    FinishTransfer {
        /// Host file.
        local: String,
        /// Target name on the card.
        remote: String,
        /// Seconds the transfer took.
        elapsed_secs: f64,
        /// True if the transfer was cancelled.
        failed: bool,
    },
    /// Run an arbitrary callback.
    Callback(SentCallback),
}

/// Content of a pipeline item.
#[derive(Debug)]
pub enum Payload {
    /// A command line.
    Command(String),
    /// An engine action.
    Marker(Marker),
}

/// An item travelling through the command, job and send queues.
#[derive(Debug)]
pub struct QueueItem {
    /// Command or marker.
    pub payload: Payload,
    /// Deduplication key.
    pub command_type: Option<String>,
    /// Provenance labels.
    pub tags: Tags,
    /// Run after the command was written.
    pub on_sent: Option<SentCallback>,
    /// Line number to reuse, set for resent lines only.
    pub line_number: Option<u64>,
}

impl QueueItem {
    /// A plain command item.
    pub fn command(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Command(text.into()),
            command_type: None,
            tags: Tags::new(),
            on_sent: None,
            line_number: None,
        }
    }

    /// A marker item.
    pub fn marker(marker: Marker) -> Self {
        Self {
            payload: Payload::Marker(marker),
            command_type: None,
            tags: Tags::new(),
            on_sent: None,
            line_number: None,
        }
    }

    /// Set the deduplication type.
    pub fn with_type(mut self, command_type: Option<String>) -> Self {
        self.command_type = command_type;
        self
    }

    /// Replace the tags.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Command text, if the item is a command.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Command(text) => Some(text),
            Payload::Marker(_) => None,
        }
    }
}

impl From<OutgoingCommand> for QueueItem {
    fn from(cmd: OutgoingCommand) -> Self {
        Self {
            payload: Payload::Command(cmd.text),
            command_type: cmd.command_type,
            tags: cmd.tags,
            on_sent: cmd.on_sent,
            line_number: None,
        }
    }
}

/// Build a tag set from string slices.
pub fn tags<const N: usize>(labels: [&str; N]) -> Tags {
    labels.iter().map(|label| label.to_string()).collect()
}
