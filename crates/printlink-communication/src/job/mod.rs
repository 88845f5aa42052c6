//! Job data sources
//!
//! A job supplies the lines of a print or file transfer:
//! - [`LocalFileJob`]: a G-code file on the host, streamed line by line
//! - [`SdCardJob`]: a file on the printer's SD card; the firmware reports progress
//! - [`StreamingJob`]: a host file copied onto the SD card
//!
//! All of them implement [`JobSource`]. The engine keeps the active one in a
//! [`Job`] so it can reach origin specific state where needed.

mod local;
mod sd;
mod streaming;

pub use local::LocalFileJob;
pub use sd::SdCardJob;
pub use streaming::StreamingJob;

use crate::protocol::TemperatureOffsets;
use printlink_core::{JobOrigin, ProtocolError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::time::{Duration, Instant};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// A line handed out by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLine {
    /// Processed command text.
    pub line: String,
    /// Byte position after the line.
    pub pos: u64,
    /// Number of lines handed out so far, this one included.
    pub line_number: u64,
}

/// Common interface of all job sources.
pub trait JobSource: Send {
    /// Where the job's data lives.
    fn origin(&self) -> JobOrigin;

    /// Display name of the job's file.
    fn filename(&self) -> &str;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Current byte position.
    fn pos(&self) -> u64;

    /// Fraction completed, `None` while the size is unknown.
    fn progress(&self) -> Option<f64> {
        match self.size() {
            Some(size) if size > 0 => Some(self.pos() as f64 / size as f64),
            _ => None,
        }
    }

    /// Mark the job as started and open its data.
    fn start(&mut self) -> Result<()>;

    /// Release the job's data.
    fn close(&mut self);

    /// Next line to send, `None` at the end of the data.
    fn next_line(
        &mut self,
        offsets: Option<&TemperatureOffsets>,
        current_tool: Option<u32>,
    ) -> Result<Option<JobLine>>;

    /// Continue from byte `pos`.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// True once the job ran to its end or was aborted.
    fn is_done(&self) -> bool;

    /// Set the done flag.
    fn set_done(&mut self, done: bool);

    /// True if the job's lines are sent with line number and checksum.
    fn wants_checksum(&self) -> bool;

    /// When the job started.
    fn start_time(&self) -> Option<Instant>;

    /// Time since the job started.
    fn elapsed(&self) -> Option<Duration> {
        self.start_time().map(|start| start.elapsed())
    }
}

/// The active job.
pub enum Job {
    /// Host file print.
    Local(LocalFileJob),
    /// SD card print.
    Sd(SdCardJob),
    /// Host file copied to the SD card.
    Streaming(StreamingJob),
}

impl Job {
    /// The job as its common interface.
    pub fn source(&self) -> &dyn JobSource {
        match self {
            Job::Local(job) => job,
            Job::Sd(job) => job,
            Job::Streaming(job) => job,
        }
    }

    /// The job as its mutable common interface.
    pub fn source_mut(&mut self) -> &mut dyn JobSource {
        match self {
            Job::Local(job) => job,
            Job::Sd(job) => job,
            Job::Streaming(job) => job,
        }
    }

    /// True for SD card prints.
    pub fn is_sd(&self) -> bool {
        matches!(self, Job::Sd(_))
    }

    /// True for transfers to the SD card.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Job::Streaming(_))
    }

    /// The SD card job, if that is what is active.
    pub fn as_sd_mut(&mut self) -> Option<&mut SdCardJob> {
        match self {
            Job::Sd(job) => Some(job),
            _ => None,
        }
    }

    /// The streaming job, if that is what is active.
    pub fn as_streaming(&self) -> Option<&StreamingJob> {
        match self {
            Job::Streaming(job) => Some(job),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("origin", &self.source().origin())
            .field("filename", &self.source().filename())
            .field("pos", &self.source().pos())
            .finish()
    }
}

fn source_error(path: &Path, err: impl std::fmt::Display) -> printlink_core::Error {
    ProtocolError::JobSource {
        reason: format!("{}: {}", path.display(), err),
    }
    .into()
}

/// Line reader over a host file shared by local and streaming jobs.
struct FileReader {
    path: PathBuf,
    handle: Option<BufReader<File>>,
    size: u64,
    pos: u64,
    read_lines: u64,
    start_time: Option<Instant>,
    done: bool,
}

impl FileReader {
    fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path).map_err(|e| source_error(&path, e))?;
        if !metadata.is_file() {
            return Err(source_error(&path, "not a file"));
        }
        Ok(Self {
            path,
            handle: None,
            size: metadata.len(),
            pos: 0,
            read_lines: 0,
            start_time: None,
            done: false,
        })
    }

    fn start(&mut self) -> Result<()> {
        self.start_time = Some(Instant::now());
        self.done = false;
        let file = File::open(&self.path).map_err(|e| source_error(&self.path, e))?;
        self.handle = Some(BufReader::new(file));
        self.pos = 0;
        self.read_lines = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.handle = None;
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        self.pos = handle
            .seek(SeekFrom::Start(pos))
            .map_err(|e| source_error(&self.path, e))?;
        self.read_lines = 0;
        Ok(())
    }

    /// Read raw lines until `process` accepts one.
    fn next_line<F>(&mut self, mut process: F) -> Result<Option<JobLine>>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if self.handle.is_none() {
            if !self.done {
                tracing::warn!("File {} is not open for reading", self.path.display());
            }
            return Ok(None);
        }

        let mut raw = Vec::new();
        loop {
            let Some(handle) = self.handle.as_mut() else {
                self.pos = self.size;
                self.done = true;
                if let Some(start) = self.start_time {
                    tracing::info!(
                        "Finished {} in {:.3} s",
                        self.path.display(),
                        start.elapsed().as_secs_f64()
                    );
                }
                return Ok(None);
            };

            raw.clear();
            let read = match handle.read_until(b'\n', &mut raw) {
                Ok(read) => read,
                Err(e) => {
                    self.close();
                    return Err(source_error(&self.path, e));
                }
            };
            self.pos += read as u64;
            if read == 0 {
                self.close();
                continue;
            }

            let bytes = if self.pos == read as u64 && raw.starts_with(&UTF8_BOM) {
                &raw[UTF8_BOM.len()..]
            } else {
                &raw[..]
            };
            if let Some(line) = process(&String::from_utf8_lossy(bytes)) {
                self.read_lines += 1;
                return Ok(Some(JobLine {
                    line,
                    pos: self.pos,
                    line_number: self.read_lines,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_without_size() {
        let job = SdCardJob::new("print.gco", None);
        assert_eq!(job.progress(), None);

        let mut job = SdCardJob::new("print.gco", Some(0));
        assert_eq!(job.progress(), None);
        job.set_size(Some(200));
        job.set_pos(50);
        assert_eq!(job.progress(), Some(0.25));
    }
}
