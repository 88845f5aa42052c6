use super::{FileReader, JobLine, JobSource};
use crate::protocol::{process_gcode_line, TemperatureOffsets};
use printlink_core::{JobOrigin, Result};
use std::path::PathBuf;
use tokio::time::Instant;

/// Copy of a host file onto the SD card.
///
/// Regular transfers strip comments and are checksummed. Special transfers
/// are for files that are not G-code: lines are only trimmed on the right,
/// blank lines skipped, and no checksum is sent.
pub struct StreamingJob {
    reader: FileReader,
    local: String,
    remote: String,
    special: bool,
}

impl StreamingJob {
    /// Transfer `path` (shown as `local`) to `remote` on the card.
    pub fn new(
        path: impl Into<PathBuf>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            reader: FileReader::new(path)?,
            local: local.into(),
            remote: remote.into(),
            special: false,
        })
    }

    /// Like [`StreamingJob::new`] for files that are not G-code.
    pub fn special(
        path: impl Into<PathBuf>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Result<Self> {
        let mut job = Self::new(path, local, remote)?;
        job.special = true;
        Ok(job)
    }

    /// Name of the host file.
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Target name on the card.
    pub fn remote_name(&self) -> &str {
        &self.remote
    }

    /// True for non G-code transfers.
    pub fn is_special(&self) -> bool {
        self.special
    }
}

impl JobSource for StreamingJob {
    fn origin(&self) -> JobOrigin {
        JobOrigin::Streaming
    }

    fn filename(&self) -> &str {
        &self.local
    }

    fn size(&self) -> Option<u64> {
        Some(self.reader.size)
    }

    fn pos(&self) -> u64 {
        self.reader.pos
    }

    fn start(&mut self) -> Result<()> {
        self.reader.start()
    }

    fn close(&mut self) {
        self.reader.close();
    }

    fn next_line(
        &mut self,
        _offsets: Option<&TemperatureOffsets>,
        _current_tool: Option<u32>,
    ) -> Result<Option<JobLine>> {
        if self.special {
            self.reader.next_line(|line| {
                let line = line.trim_end();
                (!line.is_empty()).then(|| line.to_string())
            })
        } else {
            self.reader.next_line(|line| process_gcode_line(line, None, None))
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(pos)
    }

    fn is_done(&self) -> bool {
        self.reader.done
    }

    fn set_done(&mut self, done: bool) {
        self.reader.done = done;
    }

    fn wants_checksum(&self) -> bool {
        !self.special
    }

    fn start_time(&self) -> Option<Instant> {
        self.reader.start_time
    }
}
