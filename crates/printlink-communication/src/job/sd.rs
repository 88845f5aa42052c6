use super::{JobLine, JobSource};
use crate::protocol::TemperatureOffsets;
use printlink_core::{JobOrigin, Result};
use tokio::time::Instant;

/// Print of a file stored on the printer's SD card.
///
/// The firmware reads the file itself, so there are no lines to hand out.
/// Position and size come from `SD printing byte` and `File opened` reports.
#[derive(Debug, Clone)]
pub struct SdCardJob {
    filename: String,
    size: Option<u64>,
    pos: u64,
    start_time: Option<Instant>,
    done: bool,
}

impl SdCardJob {
    /// Create a job for `filename` on the card.
    pub fn new(filename: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            filename: filename.into(),
            size,
            pos: 0,
            start_time: None,
            done: false,
        }
    }

    /// Update the size reported by the firmware.
    pub fn set_size(&mut self, size: Option<u64>) {
        self.size = size;
    }

    /// Update the position reported by the firmware.
    pub fn set_pos(&mut self, pos: u64) {
        self.pos = pos;
    }
}

impl JobSource for SdCardJob {
    fn origin(&self) -> JobOrigin {
        JobOrigin::SdCard
    }

    fn filename(&self) -> &str {
        &self.filename
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn pos(&self) -> u64 {
        self.pos
    }

    fn start(&mut self) -> Result<()> {
        self.start_time = Some(Instant::now());
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {}

    fn next_line(
        &mut self,
        _offsets: Option<&TemperatureOffsets>,
        _current_tool: Option<u32>,
    ) -> Result<Option<JobLine>> {
        Ok(None)
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    fn wants_checksum(&self) -> bool {
        false
    }

    fn start_time(&self) -> Option<Instant> {
        self.start_time
    }
}
