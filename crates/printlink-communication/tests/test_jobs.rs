use printlink_communication::{JobSource, LocalFileJob, StreamingJob, TemperatureOffsets};
use printlink_core::JobOrigin;
use std::io::Write;

fn gcode_file(content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".gcode").tempfile().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
}

fn drain(job: &mut dyn JobSource, offsets: Option<&TemperatureOffsets>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = job.next_line(offsets, Some(0)).unwrap() {
        lines.push(line.line);
    }
    lines
}

#[test]
fn test_local_job_skips_comments_and_blank_lines() {
    let file = gcode_file(b"\xEF\xBB\xBFG28\n; header\n\nG1 X10 Y10 ; move\r\nM104 S200\nG1 X20");
    let mut job = LocalFileJob::new(file.path()).unwrap();
    assert_eq!(job.origin(), JobOrigin::Local);
    assert_eq!(job.progress(), Some(0.0));

    job.start().unwrap();
    let mut offsets = TemperatureOffsets::new();
    offsets.insert("tool0".to_string(), 10.0);
    let lines = drain(&mut job, Some(&offsets));

    assert_eq!(lines, vec!["G28", "G1 X10 Y10", "M104 S210.000000", "G1 X20"]);
    assert!(job.is_done());
    assert_eq!(job.read_lines(), 4);
    assert_eq!(job.pos(), job.size().unwrap());
    assert_eq!(job.progress(), Some(1.0));
}

#[test]
fn test_local_job_line_positions_and_seek() {
    let file = gcode_file(b"G28\nG1 X1\nG1 X2\n");
    let mut job = LocalFileJob::new(file.path()).unwrap();
    job.start().unwrap();

    let first = job.next_line(None, None).unwrap().unwrap();
    assert_eq!(first.line, "G28");
    assert_eq!(first.pos, 4);
    assert_eq!(first.line_number, 1);

    job.seek(first.pos + 6).unwrap();
    let next = job.next_line(None, None).unwrap().unwrap();
    assert_eq!(next.line, "G1 X2");
    assert_eq!(next.line_number, 1);
}

#[test]
fn test_local_job_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(LocalFileJob::new(dir.path().join("missing.gcode")).is_err());
    assert!(LocalFileJob::new(dir.path()).is_err());
}

#[test]
fn test_unstarted_job_hands_out_nothing() {
    let file = gcode_file(b"G28\n");
    let mut job = LocalFileJob::new(file.path()).unwrap();
    assert_eq!(job.next_line(None, None).unwrap(), None);
    assert!(job.start_time().is_none());
}

#[test]
fn test_streaming_job_modes() {
    let file = gcode_file(b"G28 ; home\n\n  M117 Hi  \n");

    let mut regular = StreamingJob::new(file.path(), "local.gcode", "remote.gco").unwrap();
    assert_eq!(regular.origin(), JobOrigin::Streaming);
    assert_eq!(regular.filename(), "local.gcode");
    assert_eq!(regular.remote_name(), "remote.gco");
    assert!(regular.wants_checksum());
    regular.start().unwrap();
    assert_eq!(drain(&mut regular, None), vec!["G28", "M117 Hi"]);

    let mut special = StreamingJob::special(file.path(), "local.txt", "remote.txt").unwrap();
    assert!(special.is_special());
    assert!(!special.wants_checksum());
    special.start().unwrap();
    assert_eq!(drain(&mut special, None), vec!["G28 ; home", "  M117 Hi"]);
}
