//! Classification of firmware error lines.

use regex::Regex;
use std::sync::OnceLock;

const RECOVERABLE_WITHOUT_RESEND: [&str; 2] = ["no line number with checksum", "missing linenumber"];
const RESEND_IMPLYING: [&str; 5] = [
    "line number",
    "linenumber",
    "checksum",
    "format error",
    "expected line",
];
const SD_CARD: [&str; 7] = [
    "volume.init",
    "openroot",
    "workdir",
    "error writing to file",
    "cannot open",
    "open failed",
    "cannot enter",
];
const FATAL: [&str; 2] = ["kill() called", "fatal:"];

/// How the engine reacts to a firmware error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No resend will follow, an `ok` has to be synthesized.
    RecoverableWithoutResend,
    /// The firmware will request a resend on its own.
    ResendImplied,
    /// SD card trouble, ignored.
    SdCard,
    /// Unknown command, ignored.
    UnknownCommand,
    /// Anything else.
    Other,
}

/// Classify a lower-cased error line. Earlier classes win.
pub fn classify_error(lower_line: &str) -> ErrorClass {
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower_line.contains(n));
    if contains_any(&RECOVERABLE_WITHOUT_RESEND) {
        ErrorClass::RecoverableWithoutResend
    } else if contains_any(&RESEND_IMPLYING) {
        ErrorClass::ResendImplied
    } else if contains_any(&SD_CARD) {
        ErrorClass::SdCard
    } else if lower_line.contains("unknown command") {
        ErrorClass::UnknownCommand
    } else {
        ErrorClass::Other
    }
}

/// True if the lower-cased error line always ends the connection.
pub fn is_fatal_error(lower_line: &str) -> bool {
    FATAL.iter().any(|n| lower_line.contains(n))
}

/// Rewrite Repetier's `fatal:` lines into regular `Error:` lines.
pub fn normalize_error_line(line: &str) -> String {
    if line.to_lowercase().starts_with("fatal:") {
        format!("Error:{}", line)
    } else {
        line.to_string()
    }
}

/// True for `Error:` and `!!` lines.
pub fn is_error_line(line: &str) -> bool {
    line.to_lowercase().starts_with("error:") || line.starts_with("!!")
}

/// Error text without its `Error:`/`!!` prefix.
pub fn stripped_error(line: &str) -> String {
    let rest = if line.to_lowercase().starts_with("error:") {
        line.get(6..).unwrap_or("")
    } else {
        line.get(2..).unwrap_or("")
    };
    rest.trim().to_string()
}

fn min_max_regex() -> &'static Regex {
    static MIN_MAX: OnceLock<Regex> = OnceLock::new();
    MIN_MAX.get_or_init(|| Regex::new(r"^Error:[0-9]$").expect("invalid regex pattern"))
}

fn marlin_kill_regex() -> &'static Regex {
    static MARLIN_KILL: OnceLock<Regex> = OnceLock::new();
    MARLIN_KILL.get_or_init(|| {
        Regex::new(
            r"Heating failed|Thermal Runaway|MAXTEMP triggered|MINTEMP triggered|Invalid extruder number|Watchdog barked|KILL caused",
        )
        .expect("invalid regex pattern")
    })
}

/// How an error line continues on the next line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// The error is complete.
    None,
    /// `Error:<digit>`: the explanation follows verbatim.
    Append,
    /// Marlin kill error: the cause follows on another `Error:` line.
    JoinWithDash,
}

/// Whether the error line needs the following line to be complete.
pub fn error_continuation(line: &str) -> Continuation {
    if min_max_regex().is_match(line.trim_end()) {
        Continuation::Append
    } else if marlin_kill_regex().is_match(line) {
        Continuation::JoinWithDash
    } else {
        Continuation::None
    }
}

/// Join an error line with its continuation line.
pub fn join_error_lines(line: &str, next: &str, continuation: Continuation) -> String {
    match continuation {
        Continuation::None => line.to_string(),
        Continuation::Append => format!("{}{}", line.trim_end(), next),
        Continuation::JoinWithDash => {
            let next = next.trim();
            let next = if next.to_lowercase().starts_with("error:") {
                next.get(6..).unwrap_or("").trim()
            } else {
                next
            };
            format!("{} - {}", line.trim_end(), next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_order() {
        assert_eq!(
            classify_error("error:no line number with checksum, last line: 4"),
            ErrorClass::RecoverableWithoutResend
        );
        assert_eq!(
            classify_error("error:line number is not last line number+1, last line: 4"),
            ErrorClass::ResendImplied
        );
        assert_eq!(
            classify_error("error:checksum mismatch, last line: 4"),
            ErrorClass::ResendImplied
        );
        assert_eq!(classify_error("error:volume.init failed"), ErrorClass::SdCard);
        assert_eq!(
            classify_error("error:unknown command: \"m999\""),
            ErrorClass::UnknownCommand
        );
        assert_eq!(classify_error("error:printer halted. kill() called!"), ErrorClass::Other);
        assert!(is_fatal_error("error:printer halted. kill() called!"));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_error_line("fatal: heater decoupled"), "Error:fatal: heater decoupled");
        assert!(is_error_line("Error:Something"));
        assert!(is_error_line("!! Halted"));
        assert!(!is_error_line("echo:busy"));
        assert_eq!(stripped_error("Error: Thermal Runaway"), "Thermal Runaway");
        assert_eq!(stripped_error("!! Halted"), "Halted");
    }

    #[test]
    fn test_continuations() {
        let line = "Error:0";
        assert_eq!(error_continuation(line), Continuation::Append);
        assert_eq!(
            join_error_lines(line, ": Extruder switched off. MAXTEMP triggered !", Continuation::Append),
            "Error:0: Extruder switched off. MAXTEMP triggered !"
        );

        let line = "Error:Thermal Runaway, system stopped! Heater_ID: 0";
        assert_eq!(error_continuation(line), Continuation::JoinWithDash);
        assert_eq!(
            join_error_lines(line, "Error:Printer halted. kill() called!", Continuation::JoinWithDash),
            "Error:Thermal Runaway, system stopped! Heater_ID: 0 - Printer halted. kill() called!"
        );
    }
}
