use super::{FileReader, JobLine, JobSource};
use crate::protocol::{process_gcode_line, TemperatureOffsets};
use printlink_core::{JobOrigin, Result};
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// Print of a G-code file on the host.
///
/// Comments are stripped, blank lines skipped and temperature offsets applied
/// as lines are read. Lines are always sent with a checksum.
pub struct LocalFileJob {
    reader: FileReader,
    name: String,
}

impl LocalFileJob {
    /// Select `path` for printing. Fails if it is not a readable file.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let reader = FileReader::new(path)?;
        let name = reader.path.display().to_string();
        Ok(Self { reader, name })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.reader.path
    }

    /// Lines handed out since the job started or last seeked.
    pub fn read_lines(&self) -> u64 {
        self.reader.read_lines
    }
}

impl JobSource for LocalFileJob {
    fn origin(&self) -> JobOrigin {
        JobOrigin::Local
    }

    fn filename(&self) -> &str {
        &self.name
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
        offsets: Option<&TemperatureOffsets>,
        current_tool: Option<u32>,
    ) -> Result<Option<JobLine>> {
        self.reader
            .next_line(|line| process_gcode_line(line, offsets, current_tool))
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
        true
    }

    fn start_time(&self) -> Option<Instant> {
        self.reader.start_time
    }
}
