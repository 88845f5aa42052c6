//! Parsers for firmware output lines
//!
//! Every parser is pure and never fails loudly: a field that cannot be
//! extracted is skipped and the rest of the line is still used.
//!
//! - Temperature reports (`T:210.0 /210.0 B:60.0 /60.0 T1:...`)
//! - Position reports (`X:0.00 Y:0.00 Z:0.00 E:0.00`)
//! - Firmware info (`NAME:Marlin ...`) and capabilities (`Cap:NAME:1`)
//! - Resend requests (`Resend: N5`, `rs 5`)
//! - SD status, file list entries and file-open reports
//! - Repetier target temperature reports

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const FLOAT: &str = r"[-+]?[0-9]*\.?[0-9]+";

/// Heater a temperature reading belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Heater {
    /// A bare `T:` without tool number.
    CurrentTool,
    /// `T<n>:`.
    Tool(u32),
    /// `B:`.
    Bed,
    /// `C:`.
    Chamber,
    /// Any other probe, only produced by hooks.
    Custom(String),
}

/// Actual and optional target value parsed from a temperature report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedReading {
    /// Measured temperature.
    pub actual: f64,
    /// Target temperature, if reported.
    pub target: Option<f64>,
}

/// Parsed temperature readings by heater.
pub type ParsedTemperatures = BTreeMap<Heater, ParsedReading>;

fn temperature_regex() -> &'static Regex {
    static TEMPERATURE: OnceLock<Regex> = OnceLock::new();
    TEMPERATURE.get_or_init(|| {
        Regex::new(&format!(
            r"(?P<tool>B|C|T(?P<toolnum>\d*)):\s*(?P<actual>{f})(\s*/?\s*(?P<target>{f}))?",
            f = FLOAT
        ))
        .expect("invalid regex pattern")
    })
}

/// Re-key a bare `T` reading so only numbered tools remain.
///
/// - Only `T` reported: it becomes the current tool.
/// - `T` with `T0`: `T` is dropped, after filling in the current tool if that
///   one is missing.
/// - `T` with other numbered tools but no `T0`: `T` becomes `T0`.
pub fn canonicalize_temperatures(parsed: ParsedTemperatures, current_tool: u32) -> ParsedTemperatures {
    let Some(generic) = parsed.get(&Heater::CurrentTool).copied() else {
        return parsed;
    };

    let numbered = parsed.keys().filter(|k| matches!(k, Heater::Tool(_))).count();
    let mut result = parsed;
    result.remove(&Heater::CurrentTool);

    if numbered > 0 {
        if result.contains_key(&Heater::Tool(0)) {
            result.entry(Heater::Tool(current_tool)).or_insert(generic);
        } else {
            result.insert(Heater::Tool(0), generic);
        }
    } else {
        result.insert(Heater::Tool(current_tool), generic);
    }
    result
}

/// Parse a temperature report.
///
/// Returns the highest tool number seen (at least `current_tool`) and the
/// canonicalized readings.
pub fn parse_temperature_line(line: &str, current_tool: u32) -> (u32, ParsedTemperatures) {
    let mut result = ParsedTemperatures::new();
    let mut max_tool = 0;

    for caps in temperature_regex().captures_iter(line) {
        let heater = match &caps["tool"] {
            "B" => Heater::Bed,
            "C" => Heater::Chamber,
            _ => match caps.name("toolnum").map(|m| m.as_str()).filter(|n| !n.is_empty()) {
                Some(number) => match number.parse::<u32>() {
                    Ok(number) => {
                        max_tool = max_tool.max(number);
                        Heater::Tool(number)
                    }
                    Err(_) => continue,
                },
                None => Heater::CurrentTool,
            },
        };

        let Ok(actual) = caps["actual"].parse::<f64>() else {
            continue;
        };
        let target = caps.name("target").and_then(|m| m.as_str().parse().ok());
        result.insert(heater, ParsedReading { actual, target });
    }

    (
        max_tool.max(current_tool),
        canonicalize_temperatures(result, current_tool),
    )
}

/// Parsed `M114` answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
    /// Single `E:` value.
    pub e: Option<f64>,
    /// Per-extruder `E<n>:` values.
    pub extruders: BTreeMap<u32, f64>,
}

fn position_regex() -> &'static Regex {
    static POSITION: OnceLock<Regex> = OnceLock::new();
    POSITION.get_or_init(|| {
        Regex::new(&format!(
            r"X:\s*(?P<x>{f})\s*Y:\s*(?P<y>{f})\s*Z:\s*(?P<z>{f})\s*((E:\s*(?P<e>{f}))|(?P<es>(E\d+:\s*{f}\s*)+))",
            f = FLOAT
        ))
        .expect("invalid regex pattern")
    })
}

fn extruder_position_regex() -> &'static Regex {
    static EXTRUDERS: OnceLock<Regex> = OnceLock::new();
    EXTRUDERS.get_or_init(|| {
        Regex::new(&format!(r"E(?P<id>\d+):\s*(?P<value>{})", FLOAT))
            .expect("invalid regex pattern")
    })
}

/// Parse a position report. Reports without any E value are rejected.
pub fn parse_position_line(line: &str) -> Option<PositionReport> {
    let caps = position_regex().captures(line)?;
    let mut report = PositionReport {
        x: caps["x"].parse().ok()?,
        y: caps["y"].parse().ok()?,
        z: caps["z"].parse().ok()?,
        e: None,
        extruders: BTreeMap::new(),
    };

    if let Some(e) = caps.name("e") {
        report.e = Some(e.as_str().parse().ok()?);
    } else if let Some(es) = caps.name("es") {
        for entry in extruder_position_regex().captures_iter(es.as_str()) {
            if let (Ok(id), Ok(value)) = (entry["id"].parse(), entry["value"].parse()) {
                report.extruders.insert(id, value);
            }
        }
    } else {
        return None;
    }

    Some(report)
}

fn firmware_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"\s*([A-Z0-9_]+):\s*").expect("invalid regex pattern"))
}

/// Parse an `M115` answer into its key/value pairs.
///
/// Malyan's `NAME.` prefix is accepted as `NAME:`.
pub fn parse_firmware_line(line: &str) -> BTreeMap<String, String> {
    let line = match line.strip_prefix("NAME.") {
        Some(rest) => format!("NAME:{}", rest),
        None => line.to_string(),
    };
    let line = line.trim();

    let mut result = BTreeMap::new();
    let keys: Vec<_> = firmware_splitter().captures_iter(line).collect();
    for (index, caps) in keys.iter().enumerate() {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = keys
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map_or(line.len(), |m| m.start());
        result.insert(key.as_str().to_string(), line[whole.end()..end].trim().to_string());
    }
    result
}

/// Parse a `Cap:NAME:0|1` line into the upper-cased name and its flag.
pub fn parse_capability_line(line: &str) -> Option<(String, bool)> {
    let lower = line.to_lowercase();
    let rest = lower.strip_prefix("cap:").unwrap_or(&lower);

    let mut parts = rest.split(':');
    let (Some(name), Some(flag), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    match flag {
        "0" => Some((name.to_uppercase(), false)),
        "1" => Some((name.to_uppercase(), true)),
        _ => None,
    }
}

fn resend_regex() -> &'static Regex {
    static RESEND: OnceLock<Regex> = OnceLock::new();
    RESEND.get_or_init(|| Regex::new(r"(N|N:)?(?P<n>\d+)").expect("invalid regex pattern"))
}

/// True if the line is a resend request (`resend` or `rs` prefix).
pub fn is_resend_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("resend") || lower.starts_with("rs")
}

/// Line number requested by a resend request.
pub fn parse_resend_line(line: &str) -> Option<u64> {
    resend_regex()
        .captures(line)
        .and_then(|caps| caps["n"].parse().ok())
}

fn sd_printing_byte_regex() -> &'static Regex {
    static SD_BYTE: OnceLock<Regex> = OnceLock::new();
    SD_BYTE.get_or_init(|| {
        Regex::new(r"(?P<current>[0-9]+)/(?P<total>[0-9]+)").expect("invalid regex pattern")
    })
}

/// Current and total byte counts of a `SD printing byte a/b` report.
pub fn parse_sd_printing_byte(line: &str) -> Option<(u64, u64)> {
    let caps = sd_printing_byte_regex().captures(line)?;
    Some((caps["current"].parse().ok()?, caps["total"].parse().ok()?))
}

fn sd_file_opened_regex() -> &'static Regex {
    static SD_OPENED: OnceLock<Regex> = OnceLock::new();
    SD_OPENED.get_or_init(|| {
        Regex::new(r"File opened:\s*(?P<name>.*?)\s+Size:\s*(?P<size>\d+)")
            .expect("invalid regex pattern")
    })
}

/// Name and size of a `File opened: <name> Size: <size>` report.
pub fn parse_sd_file_opened(line: &str) -> Option<(String, u64)> {
    let caps = sd_file_opened_regex().captures(line)?;
    Some((caps["name"].to_string(), caps["size"].parse().ok()?))
}

const MACHINE_CODE_EXTENSIONS: [&str; 3] = ["gcode", "gco", "g"];

/// True if `name` has a G-code file extension.
pub fn is_machine_code_file(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| MACHINE_CODE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// A line of an `M20` listing, reduced to an absolute lower-case name and an
/// optional size. Non G-code files yield `None`.
pub fn parse_sd_file_entry(line: &str) -> Option<(String, Option<u64>)> {
    let line = line.trim().to_lowercase();
    let (name, size) = match line.rsplit_once(' ') {
        Some((name, size)) => match size.parse::<u64>() {
            Ok(size) => (name.trim().to_string(), Some(size)),
            Err(_) => (line.clone(), None),
        },
        None => (line.clone(), None),
    };

    if !is_machine_code_file(&name) {
        return None;
    }

    let name = if name.starts_with('/') {
        name
    } else {
        format!("/{}", name)
    };
    Some((name, size))
}

/// Target reported by Repetier firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RepetierTarget {
    /// `TargetExtr<n>:<t>`
    Tool(u32, f64),
    /// `TargetBed:<t>`
    Bed(f64),
}

fn repetier_tool_regex() -> &'static Regex {
    static REPETIER_TOOL: OnceLock<Regex> = OnceLock::new();
    REPETIER_TOOL.get_or_init(|| {
        Regex::new(&format!(r"TargetExtr(?P<toolnum>\d+):(?P<target>{})", FLOAT))
            .expect("invalid regex pattern")
    })
}

fn repetier_bed_regex() -> &'static Regex {
    static REPETIER_BED: OnceLock<Regex> = OnceLock::new();
    REPETIER_BED.get_or_init(|| {
        Regex::new(&format!(r"TargetBed:(?P<target>{})", FLOAT)).expect("invalid regex pattern")
    })
}

/// Parse a Repetier target temperature report.
pub fn parse_repetier_target(line: &str) -> Option<RepetierTarget> {
    if let Some(caps) = repetier_tool_regex().captures(line) {
        return Some(RepetierTarget::Tool(
            caps["toolnum"].parse().ok()?,
            caps["target"].parse().ok()?,
        ));
    }
    let caps = repetier_bed_regex().captures(line)?;
    Some(RepetierTarget::Bed(caps["target"].parse().ok()?))
}

/// Contents of a `//action:<command>` line, if it is one.
pub fn parse_action_command(line: &str) -> Option<&str> {
    line.strip_prefix("//")?
        .trim()
        .strip_prefix("action:")
        .map(str::trim)
}

/// True if a line reports temperatures.
///
/// `B:` only counts when the line carries no `A:` field.
pub fn is_temperature_line(line: &str) -> bool {
    let tool = line.contains(" T:")
        || line.starts_with("T:")
        || line.contains(" T0:")
        || line.starts_with("T0:");
    let bed = (line.contains(" B:") || line.starts_with("B:")) && !line.contains("A:");
    tool || bed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_temperature_line() {
        let (max, parsed) = parse_temperature_line("ok T:200.0 /210.0 B:60.0 /60.0", 0);
        assert_eq!(max, 0);
        assert_eq!(
            parsed[&Heater::Tool(0)],
            ParsedReading {
                actual: 200.0,
                target: Some(210.0)
            }
        );
        assert_eq!(parsed[&Heater::Bed].target, Some(60.0));
        assert!(!parsed.contains_key(&Heater::CurrentTool));
    }

    #[test]
    fn test_bare_tool_rekeyed_to_current() {
        let (max, parsed) = parse_temperature_line("T:185.4 E:1 B:60.2", 1);
        assert_eq!(max, 1);
        assert_eq!(parsed[&Heater::Tool(1)].actual, 185.4);
        assert_eq!(parsed[&Heater::Tool(1)].target, None);
    }

    #[test]
    fn test_bare_tool_dropped_with_indexed() {
        let (max, parsed) =
            parse_temperature_line("T:100.0 /0.0 T0:100.0 /0.0 T1:50.0 /0.0 B:20.0 /0.0", 0);
        assert_eq!(max, 1);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[&Heater::Tool(1)].actual, 50.0);
    }

    #[test]
    fn test_smoothie_style_report() {
        let (_, parsed) = parse_temperature_line("T:210.0 /210.0 T1:180.0 /0.0 B:60.0 /60.0", 1);
        assert_eq!(parsed[&Heater::Tool(0)].actual, 210.0);
        assert_eq!(parsed[&Heater::Tool(1)].actual, 180.0);
    }

    #[test]
    fn test_parse_position_line() {
        let report = parse_position_line("X:10.00 Y:20.00 Z:0.30 E:1.50 Count X: 1 Y:2 Z:3").unwrap();
        assert_eq!((report.x, report.y, report.z), (10.0, 20.0, 0.3));
        assert_eq!(report.e, Some(1.5));

        let report = parse_position_line("X:1 Y:2 Z:3 E0:4 E1:5").unwrap();
        assert_eq!(report.e, None);
        assert_eq!(report.extruders[&1], 5.0);

        assert!(parse_position_line("X:1 Y:2 Z:3").is_none());
    }

    #[test]
    fn test_parse_firmware_line() {
        let data = parse_firmware_line(
            "FIRMWARE_NAME:Marlin 1.1.9 (Github) SOURCE_CODE_URL:https://github.com/MarlinFirmware/Marlin PROTOCOL_VERSION:1.0 MACHINE_TYPE:RepRap EXTRUDER_COUNT:1",
        );
        assert_eq!(data["FIRMWARE_NAME"], "Marlin 1.1.9 (Github)");
        assert_eq!(data["SOURCE_CODE_URL"], "https://github.com/MarlinFirmware/Marlin");
        assert_eq!(data["EXTRUDER_COUNT"], "1");

        let data = parse_firmware_line("NAME. Malyan VER: 3.7 MODEL: M200");
        assert_eq!(data["NAME"], "Malyan");
        assert_eq!(data["VER"], "3.7");
    }

    #[test]
    fn test_parse_capability_line() {
        assert_eq!(
            parse_capability_line("Cap:AUTOREPORT_TEMP:1"),
            Some(("AUTOREPORT_TEMP".to_string(), true))
        );
        assert_eq!(
            parse_capability_line("Cap:EEPROM:0"),
            Some(("EEPROM".to_string(), false))
        );
        assert_eq!(parse_capability_line("Cap:EEPROM:2"), None);
        assert_eq!(parse_capability_line("Cap:EEPROM"), None);
    }

    #[test]
    fn test_parse_resend_line() {
        assert!(is_resend_line("Resend: 5"));
        assert!(is_resend_line("rs N5"));
        assert_eq!(parse_resend_line("Resend: 5"), Some(5));
        assert_eq!(parse_resend_line("resend:N12"), Some(12));
        assert_eq!(parse_resend_line("rs N:7"), Some(7));
        assert_eq!(parse_resend_line("Resend"), None);
    }

    #[test]
    fn test_sd_lines() {
        assert_eq!(parse_sd_printing_byte("SD printing byte 123/4567"), Some((123, 4567)));
        assert_eq!(
            parse_sd_file_opened("File opened: TEST.GCO Size: 1234"),
            Some(("TEST.GCO".to_string(), 1234))
        );
        assert_eq!(
            parse_sd_file_entry("TEST.GCO 1234"),
            Some(("/test.gco".to_string(), Some(1234)))
        );
        assert_eq!(
            parse_sd_file_entry("/folder/part.gcode"),
            Some(("/folder/part.gcode".to_string(), None))
        );
        assert_eq!(parse_sd_file_entry("README.TXT 10"), None);
    }

    #[test]
    fn test_repetier_targets() {
        assert_eq!(
            parse_repetier_target("TargetExtr1:210"),
            Some(RepetierTarget::Tool(1, 210.0))
        );
        assert_eq!(parse_repetier_target("TargetBed:60"), Some(RepetierTarget::Bed(60.0)));
        assert_eq!(parse_repetier_target("ok"), None);
    }

    #[test]
    fn test_is_temperature_line() {
        assert!(is_temperature_line("ok T:20.0 /0.0"));
        assert!(is_temperature_line("B:60.0 /60.0"));
        assert!(!is_temperature_line("X:1 Y:2 B:3 A:4"));
        assert!(!is_temperature_line("ok"));
    }

    #[test]
    fn test_action_command() {
        assert_eq!(parse_action_command("//action:pause"), Some("pause"));
        assert_eq!(parse_action_command("// action:resume "), Some("resume"));
        assert_eq!(parse_action_command("//debug output"), None);
    }
}
