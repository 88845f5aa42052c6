//! G-code line helpers: command extraction, parameter lookup, comment
//! stripping and temperature offsets.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const FLOAT_PATTERN: &str = r"[-+]?[0-9]*\.?[0-9]+";

/// Temperature offsets keyed by `tool<n>` or `bed`.
pub type TemperatureOffsets = HashMap<String, f64>;

/// The G/M/T code of a command, e.g. `G1` for `G1 X10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCode {
    /// Code without parameters (`G28`, `M104`, `T`, `F`).
    pub gcode: String,
    /// Subcode after a dot (`M201.2` has subcode `2`).
    pub subcode: Option<String>,
}

fn command_regex() -> &'static Regex {
    static COMMAND_REGEX: OnceLock<Regex> = OnceLock::new();
    COMMAND_REGEX.get_or_init(|| {
        Regex::new(
            r"^\s*((?P<gm>[GM]\d+)(\.(?P<subcode>\d+))?|(?P<t>T)\d+|(?P<f>F)\d+)",
        )
        .expect("invalid regex pattern")
    })
}

/// Extract the command code of `cmd`.
///
/// Tool changes map to `T`. A bare feedrate maps to `F` only when
/// `support_f_as_command` is set.
pub fn command_code(cmd: &str, support_f_as_command: bool) -> Option<CommandCode> {
    let caps = command_regex().captures(cmd)?;
    if let Some(gm) = caps.name("gm") {
        return Some(CommandCode {
            gcode: gm.as_str().to_string(),
            subcode: caps.name("subcode").map(|m| m.as_str().to_string()),
        });
    }
    if caps.name("t").is_some() {
        return Some(CommandCode {
            gcode: "T".to_string(),
            subcode: None,
        });
    }
    if support_f_as_command && caps.name("f").is_some() {
        return Some(CommandCode {
            gcode: "F".to_string(),
            subcode: None,
        });
    }
    None
}

struct ParameterRegexes {
    floats: HashMap<char, Regex>,
    ints: HashMap<char, Regex>,
}

fn parameter_regexes() -> &'static ParameterRegexes {
    static PARAMETERS: OnceLock<ParameterRegexes> = OnceLock::new();
    PARAMETERS.get_or_init(|| {
        let build = |letter: char, value: &str| {
            Regex::new(&format!(
                r"(^|[^A-Za-z])[{}{}](?P<value>{})",
                letter.to_ascii_uppercase(),
                letter.to_ascii_lowercase(),
                value
            ))
            .expect("invalid regex pattern")
        };
        ParameterRegexes {
            floats: "EFPRSXYZ".chars().map(|c| (c, build(c, FLOAT_PATTERN))).collect(),
            ints: "NST".chars().map(|c| (c, build(c, r"\d+"))).collect(),
        }
    })
}

/// Float value of parameter `letter` (one of `EFPRSXYZ`).
pub fn float_parameter(cmd: &str, letter: char) -> Option<f64> {
    parameter_regexes()
        .floats
        .get(&letter.to_ascii_uppercase())?
        .captures(cmd)?
        .name("value")?
        .as_str()
        .parse()
        .ok()
}

/// Integer value of parameter `letter` (one of `NST`).
pub fn int_parameter(cmd: &str, letter: char) -> Option<u64> {
    parameter_regexes()
        .ints
        .get(&letter.to_ascii_uppercase())?
        .captures(cmd)?
        .name("value")?
        .as_str()
        .parse()
        .ok()
}

/// Cut `line` at the first `;` that is not escaped with a backslash.
pub fn strip_comment(line: &str) -> &str {
    if !line.contains(';') {
        return line;
    }
    let mut escaped = false;
    for (index, c) in line.char_indices() {
        if c == ';' && !escaped {
            return &line[..index];
        }
        escaped = c == '\\' && !escaped;
    }
    line
}

fn temperature_command_regex() -> &'static Regex {
    static TEMPERATURE_COMMAND: OnceLock<Regex> = OnceLock::new();
    TEMPERATURE_COMMAND.get_or_init(|| {
        Regex::new(
            r"^M(?P<command>104|109|140|190)(\s+T(?P<tool>\d+)|\s+S(?P<temperature>[-+]?\d*\.?\d*))+",
        )
        .expect("invalid regex pattern")
    })
}

/// Add the configured offset to the `S` value of `M104`/`M109`/`M140`/`M190`.
///
/// Tool commands use `tool<n>` (the `T` parameter, else `current_tool`), bed
/// commands use `bed`. Zero offsets and zero temperatures leave the line as is.
pub fn apply_temperature_offsets(
    line: &str,
    offsets: &TemperatureOffsets,
    current_tool: Option<u32>,
) -> String {
    let Some(caps) = temperature_command_regex().captures(line) else {
        return line.to_string();
    };
    let Some(temperature) = caps.name("temperature") else {
        return line.to_string();
    };

    let offset = match &caps["command"] {
        "104" | "109" => {
            let matched = caps.get(0).map_or(line, |m| m.as_str());
            let tool = int_parameter(matched, 'T')
                .and_then(|tool| u32::try_from(tool).ok())
                .or(current_tool);
            tool.and_then(|tool| offsets.get(&format!("tool{}", tool)))
                .copied()
                .unwrap_or(0.0)
        }
        _ => offsets.get("bed").copied().unwrap_or(0.0),
    };
    if offset == 0.0 {
        return line.to_string();
    }

    let Ok(value) = temperature.as_str().parse::<f64>() else {
        return line.to_string();
    };
    if value == 0.0 {
        return line.to_string();
    }

    format!(
        "{}{:.6}{}",
        &line[..temperature.start()],
        value + offset,
        &line[temperature.end()..]
    )
}

/// Strip the comment and surrounding whitespace and apply temperature offsets.
///
/// Returns `None` if nothing is left.
pub fn process_gcode_line(
    line: &str,
    offsets: Option<&TemperatureOffsets>,
    current_tool: Option<u32>,
) -> Option<String> {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return None;
    }
    Some(match offsets {
        Some(offsets) => apply_temperature_offsets(line, offsets, current_tool),
        None => line.to_string(),
    })
}
