//! Checksum framing of outgoing lines
//!
//! A framed line is `N<line> <command>*<checksum>` where the checksum is the
//! XOR of every byte before the `*`, written in decimal.

use regex::Regex;
use std::sync::OnceLock;

/// XOR of all bytes in `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc ^ byte)
}

/// Frame `command` with `line_number` and its checksum, without line terminator.
pub fn frame_line(line_number: u64, command: &str) -> String {
    let body = format!("N{} {}", line_number, command);
    let sum = checksum(body.as_bytes());
    format!("{}*{}", body, sum)
}

/// Append the line terminator to an outgoing line.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// A framed line split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Line number.
    pub line_number: u64,
    /// Command text.
    pub command: String,
    /// Transmitted checksum.
    pub checksum: u8,
}

impl Frame {
    /// True if the transmitted checksum matches the content.
    pub fn is_valid(&self) -> bool {
        checksum(format!("N{} {}", self.line_number, self.command).as_bytes()) == self.checksum
    }
}

fn frame_regex() -> &'static Regex {
    static FRAME_REGEX: OnceLock<Regex> = OnceLock::new();
    FRAME_REGEX.get_or_init(|| {
        Regex::new(r"^N(?P<n>\d+) (?P<command>.*)\*(?P<checksum>\d+)$")
            .expect("invalid regex pattern")
    })
}

/// Parse a framed line, as the firmware would.
///
/// Returns `None` for unframed lines.
pub fn parse_frame(line: &str) -> Option<Frame> {
    let caps = frame_regex().captures(line.trim_end_matches(['\r', '\n']))?;
    Some(Frame {
        line_number: caps["n"].parse().ok()?,
        command: caps["command"].to_string(),
        checksum: caps["checksum"].parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_frames() {
        assert_eq!(frame_line(0, "M110 N0"), "N0 M110 N0*125");
        assert_eq!(frame_line(1, "M105"), "N1 M105*38");
    }

    #[test]
    fn test_parse_frame() {
        let frame = parse_frame("N1 M105*38\n").unwrap();
        assert_eq!(frame.line_number, 1);
        assert_eq!(frame.command, "M105");
        assert!(frame.is_valid());
        assert!(parse_frame("M105").is_none());
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("M105"), b"M105\n".to_vec());
    }
}
