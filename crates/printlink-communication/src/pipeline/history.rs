//! Line numbering, sent line history and resend bookkeeping.

use std::collections::VecDeque;

/// A sent, checksummed command and the line number it went out with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Command without line number and checksum.
    pub command: String,
    /// Line number it was framed with.
    pub line_number: u64,
}

/// Fixed-capacity ring of the most recently sent lines.
#[derive(Debug, Clone)]
pub struct LineHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl LineHistory {
    /// Create an empty history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&mut self, command: impl Into<String>, line_number: u64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            command: command.into(),
            line_number,
        });
    }

    /// The `n`-th most recent entry, `1` being the last one sent.
    pub fn from_end(&self, n: usize) -> Option<&HistoryEntry> {
        if n == 0 || n > self.entries.len() {
            return None;
        }
        self.entries.get(self.entries.len() - n)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// Outcome of a resend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResendDecision {
    /// The requested line was not sent yet; nothing to do.
    Ignored,
    /// The request still stems from lines sent before the current session.
    Stale,
    /// A resend session started.
    Started {
        /// Lines to replay.
        delta: u64,
    },
    /// The same line was requested too often in a row.
    Loop {
        /// The requested line.
        line: u64,
    },
    /// The history cannot serve the request. Resend bookkeeping was cleared.
    InsufficientHistory {
        /// The requested line.
        line: u64,
        /// Next line number that would have been assigned.
        current: u64,
        /// Entries in the history.
        available: usize,
    },
}

/// A line to put back on the wire during a resend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendLine {
    /// Line number to reuse.
    pub line_number: u64,
    /// Command without line number and checksum.
    pub command: String,
    /// True if this was the last line of the session.
    pub finished: bool,
}

/// Line counter, sent line history and resend session state.
#[derive(Debug, Clone)]
pub struct LineTracker {
    current_line: u64,
    history: LineHistory,
    resend_delta: Option<u64>,
    resend_active: bool,
    last_comm_error: Option<String>,
    last_resend_number: Option<u64>,
    current_resend_count: u64,
    consecutive_resend_number: Option<u64>,
    consecutive_resend_count: u32,
}

impl LineTracker {
    /// Create a tracker with a history of `history_size` lines.
    pub fn new(history_size: usize) -> Self {
        Self {
            current_line: 0,
            history: LineHistory::new(history_size),
            resend_delta: None,
            resend_active: false,
            last_comm_error: None,
            last_resend_number: None,
            current_resend_count: 0,
            consecutive_resend_number: None,
            consecutive_resend_count: 0,
        }
    }

    /// Next line number to assign.
    pub fn current_line(&self) -> u64 {
        self.current_line
    }

    /// Sent line history.
    pub fn history(&self) -> &LineHistory {
        &self.history
    }

    /// Lines still to replay in the active session.
    pub fn resend_delta(&self) -> Option<u64> {
        self.resend_delta
    }

    /// True from a resend request until the next `ok`.
    pub fn resend_active(&self) -> bool {
        self.resend_active
    }

    /// Set or clear the resend flag.
    pub fn set_resend_active(&mut self, active: bool) {
        self.resend_active = active;
    }

    /// Remember the last resend-implying firmware error.
    pub fn set_last_comm_error(&mut self, error: impl Into<String>) {
        self.last_comm_error = Some(error.into());
    }

    /// Assign the next line number to `command` and record it.
    pub fn assign(&mut self, command: &str) -> u64 {
        let line_number = self.current_line;
        self.history.push(command, line_number);
        self.current_line += 1;
        line_number
    }

    /// Restart numbering at `line_number` and forget the history.
    pub fn reset(&mut self, line_number: u64) {
        self.current_line = line_number;
        self.history.clear();
        self.resend_active = false;
        self.consecutive_resend_number = None;
        self.consecutive_resend_count = 0;
        self.finish_resend();
    }

    /// Evaluate a firmware request to resend `line`.
    pub fn handle_resend_request(&mut self, line: u64, max_consecutive: u32) -> ResendDecision {
        // Nothing was sent under the next number yet; an open session has
        // nothing left to replay.
        if line == self.current_line {
            self.finish_resend();
            return ResendDecision::Ignored;
        }

        let last_comm_error = self.last_comm_error.take();
        let delta = self.current_line as i64 - line as i64;

        if let Some(error) = last_comm_error {
            let error = error.to_lowercase();
            if (error.contains("line number") || error.contains("expected line"))
                && self.last_resend_number == Some(line)
                && self.resend_delta.is_some()
                && (self.current_resend_count as i64) < delta
            {
                self.current_resend_count += 1;
                return ResendDecision::Stale;
            }
        }

        let mut looping = false;
        if self.consecutive_resend_number == Some(line) {
            self.consecutive_resend_count += 1;
            looping = self.consecutive_resend_count >= max_consecutive;
        } else {
            self.consecutive_resend_number = Some(line);
            self.consecutive_resend_count = 0;
        }

        self.resend_active = true;
        self.last_resend_number = Some(line);
        self.current_resend_count = 0;

        if delta < 0 || delta as usize > self.history.len() {
            self.resend_delta = None;
            self.resend_active = false;
            self.last_resend_number = None;
            if looping {
                return ResendDecision::Loop { line };
            }
            return ResendDecision::InsufficientHistory {
                line,
                current: self.current_line,
                available: self.history.len(),
            };
        }

        self.resend_delta = Some(delta as u64);
        if looping {
            ResendDecision::Loop { line }
        } else {
            ResendDecision::Started { delta: delta as u64 }
        }
    }

    /// Next line of the active session.
    ///
    /// With `again`, the line sent last is repeated, even if the session
    /// already ended.
    pub fn next_resend(&mut self, again: bool) -> Option<ResendLine> {
        self.last_comm_error = None;

        let delta = if again {
            self.resend_delta.unwrap_or(0) + 1
        } else {
            self.resend_delta?
        };

        let Some(entry) = self.history.from_end(delta as usize).cloned() else {
            self.finish_resend();
            return None;
        };

        let remaining = delta - 1;
        let finished = remaining == 0;
        if finished {
            self.finish_resend();
        } else {
            self.resend_delta = Some(remaining);
        }

        Some(ResendLine {
            line_number: entry.line_number,
            command: entry.command,
            finished,
        })
    }

    fn finish_resend(&mut self) {
        self.resend_delta = None;
        self.last_resend_number = None;
        self.current_resend_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_lines(count: u64) -> LineTracker {
        let mut tracker = LineTracker::new(50);
        for i in 0..count {
            tracker.assign(&format!("G1 X{}", i));
        }
        tracker
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut history = LineHistory::new(3);
        for n in 0..5 {
            history.push(format!("G1 X{}", n), n);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.from_end(1).unwrap().line_number, 4);
        assert_eq!(history.from_end(3).unwrap().line_number, 2);
        assert!(history.from_end(4).is_none());
        assert!(history.from_end(0).is_none());
    }

    #[test]
    fn test_resend_replays_original_numbers() {
        let mut tracker = tracker_with_lines(8);
        assert_eq!(
            tracker.handle_resend_request(5, 10),
            ResendDecision::Started { delta: 3 }
        );
        assert!(tracker.resend_active());

        let first = tracker.next_resend(false).unwrap();
        assert_eq!((first.line_number, first.command.as_str()), (5, "G1 X5"));
        assert!(!first.finished);
        assert_eq!(tracker.next_resend(false).unwrap().line_number, 6);
        let last = tracker.next_resend(false).unwrap();
        assert_eq!(last.line_number, 7);
        assert!(last.finished);
        assert!(tracker.next_resend(false).is_none());

        assert_eq!(tracker.assign("G1 X8"), 8);
    }

    #[test]
    fn test_request_for_unsent_line_is_ignored() {
        let mut tracker = tracker_with_lines(1);
        assert_eq!(tracker.current_line(), 1);
        assert_eq!(tracker.handle_resend_request(1, 10), ResendDecision::Ignored);
        assert!(!tracker.resend_active());
    }

    #[test]
    fn test_out_of_range_requests() {
        let mut tracker = tracker_with_lines(8);
        assert!(matches!(
            tracker.handle_resend_request(12, 10),
            ResendDecision::InsufficientHistory { line: 12, current: 8, .. }
        ));
        assert!(tracker.resend_delta().is_none());

        let mut tracker = LineTracker::new(2);
        for i in 0..8 {
            tracker.assign(&format!("G1 X{}", i));
        }
        assert!(matches!(
            tracker.handle_resend_request(3, 10),
            ResendDecision::InsufficientHistory { available: 2, .. }
        ));
    }

    #[test]
    fn test_resend_loop_detection() {
        let mut tracker = tracker_with_lines(8);
        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(tracker.handle_resend_request(6, 3));
            while tracker.next_resend(false).is_some() {}
        }
        assert!(matches!(decisions[0], ResendDecision::Started { .. }));
        assert!(matches!(decisions[2], ResendDecision::Started { .. }));
        assert_eq!(decisions[3], ResendDecision::Loop { line: 6 });
    }

    #[test]
    fn test_stale_request_after_line_number_error() {
        let mut tracker = tracker_with_lines(8);
        tracker.handle_resend_request(5, 10);
        tracker.set_last_comm_error("Line Number is not Last Line Number+1, Last Line: 4");
        assert_eq!(tracker.handle_resend_request(5, 10), ResendDecision::Stale);
        assert_eq!(tracker.resend_delta(), Some(3));
    }

    #[test]
    fn test_again_repeats_last_line() {
        let mut tracker = tracker_with_lines(3);
        let line = tracker.next_resend(true).unwrap();
        assert_eq!(line.line_number, 2);
        assert!(line.finished);
    }

    #[test]
    fn test_request_for_current_line_ends_open_session() {
        let mut tracker = tracker_with_lines(8);
        tracker.handle_resend_request(6, 10);
        assert_eq!(tracker.resend_delta(), Some(2));

        assert_eq!(tracker.handle_resend_request(8, 10), ResendDecision::Ignored);
        assert!(tracker.resend_delta().is_none());
        assert!(tracker.next_resend(false).is_none());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut tracker = tracker_with_lines(4);
        tracker.reset(0);
        assert_eq!(tracker.current_line(), 0);
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn test_reset_ends_resend_session() {
        let mut tracker = tracker_with_lines(8);
        tracker.handle_resend_request(5, 10);
        tracker.reset(0);
        assert!(!tracker.resend_active());
        assert!(tracker.resend_delta().is_none());
        assert!(tracker.next_resend(false).is_none());
    }
}
