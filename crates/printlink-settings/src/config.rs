//! Communication configuration
//!
//! [`CommConfig`] is built once and handed to a connection, which never
//! mutates it. Values the firmware negotiates at runtime are tracked by the
//! engine separately.
//!
//! Configuration is organized into:
//! - Port selection (fixed or autodetected)
//! - Timeouts and timeout budgets
//! - Checksum policy and command classification lists
//! - Firmware capability support and workarounds
//!
//! Files may be JSON or TOML; every field has a default.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to synthesize the `ok` some firmware omits after a resend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResendOkPolicy {
    /// Synthesize an `ok` right away.
    Always,
    /// Synthesize an `ok` only if nothing else arrives shortly after.
    #[default]
    Detect,
    /// Never synthesize.
    Never,
}

/// Timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// First handshake attempt on a detection candidate.
    pub detection_first: f64,
    /// Further handshake attempts on the same candidate.
    pub detection_consecutive: f64,
    /// Handshake on a fixed port.
    pub connection: f64,
    /// Silence on the line before a communication timeout.
    pub communication: f64,
    /// Communication timeout once the busy protocol is active.
    pub communication_busy: f64,
    /// Temperature poll interval.
    pub temperature: f64,
    /// Temperature poll interval while a target is set.
    pub temperature_target_set: f64,
    /// Autoreport interval requested with `M155`.
    pub temperature_autoreport: f64,
    /// SD status poll interval.
    pub sd_status: f64,
    /// Autoreport interval requested with `M27 S`.
    pub sd_status_autoreport: f64,
    /// Wait for a line after a resend request before synthesizing an `ok`.
    pub resend_ok: f64,
    /// Wait for the position report that completes a pause or cancel.
    pub position_log_wait: f64,
    /// Wait for queues to drain when closing.
    pub close_wait: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            detection_first: 10.0,
            detection_consecutive: 2.0,
            connection: 10.0,
            communication: 30.0,
            communication_busy: 3.0,
            temperature: 4.0,
            temperature_target_set: 2.0,
            temperature_autoreport: 2.0,
            sd_status: 1.0,
            sd_status_autoreport: 1.0,
            resend_ok: 1.0,
            position_log_wait: 10.0,
            close_wait: 10.0,
        }
    }
}

impl Timeouts {
    /// Convert a seconds value into a `Duration`, clamping negatives to zero.
    pub fn duration(seconds: f64) -> Duration {
        Duration::from_secs_f64(seconds.max(0.0))
    }

    fn entries(&self) -> [(&'static str, f64); 13] {
        [
            ("timeouts.detection_first", self.detection_first),
            ("timeouts.detection_consecutive", self.detection_consecutive),
            ("timeouts.connection", self.connection),
            ("timeouts.communication", self.communication),
            ("timeouts.communication_busy", self.communication_busy),
            ("timeouts.temperature", self.temperature),
            ("timeouts.temperature_target_set", self.temperature_target_set),
            ("timeouts.temperature_autoreport", self.temperature_autoreport),
            ("timeouts.sd_status", self.sd_status),
            ("timeouts.sd_status_autoreport", self.sd_status_autoreport),
            ("timeouts.resend_ok", self.resend_ok),
            ("timeouts.position_log_wait", self.position_log_wait),
            ("timeouts.close_wait", self.close_wait),
        ]
    }
}

/// Consecutive communication timeouts tolerated before giving up
///
/// Zero disables the limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsecutiveTimeouts {
    /// While idle.
    pub idle: u32,
    /// While printing.
    pub printing: u32,
    /// While a long running command is executing.
    pub long: u32,
}

impl Default for ConsecutiveTimeouts {
    fn default() -> Self {
        Self {
            idle: 2,
            printing: 5,
            long: 5,
        }
    }
}

/// Which firmware capabilities the host is willing to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySupport {
    /// Use temperature autoreporting.
    pub autoreport_temp: bool,
    /// Use SD status autoreporting.
    pub autoreport_sd_status: bool,
    /// Use the busy protocol.
    pub busy_protocol: bool,
    /// Force-send emergency commands past the queue.
    pub emergency_parser: bool,
    /// Record chamber temperatures.
    pub chamber_temperature: bool,
}

impl Default for CapabilitySupport {
    fn default() -> Self {
        Self {
            autoreport_temp: true,
            autoreport_sd_status: true,
            busy_protocol: true,
            emergency_parser: true,
            chamber_temperature: true,
        }
    }
}

impl CapabilitySupport {
    /// Whether support for the capability called `name` is enabled.
    ///
    /// Unknown capabilities are always supported.
    pub fn supports(&self, name: &str) -> bool {
        match name {
            "AUTOREPORT_TEMP" => self.autoreport_temp,
            "AUTOREPORT_SD_STATUS" => self.autoreport_sd_status,
            "BUSY_PROTOCOL" => self.busy_protocol,
            "EMERGENCY_PARSER" => self.emergency_parser,
            "CHAMBER_TEMPERATURE" => self.chamber_temperature,
            _ => true,
        }
    }
}

/// Complete communication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    /// Fixed port, `None` to autodetect.
    pub port: Option<String>,
    /// Fixed baud rate, `None` to autodetect.
    pub baudrate: Option<u32>,
    /// Extra baud rates to try during autodetection.
    pub baudrate_candidates: Vec<u32>,
    /// Maximum number of unacknowledged commands.
    pub ack_max: usize,
    /// Handshake command.
    pub hello_command: String,
    /// Wait for the firmware's `start` before saying hello.
    pub wait_for_start_on_connect: bool,
    /// Timeouts.
    pub timeouts: Timeouts,
    /// Consecutive timeout budgets.
    pub max_consecutive_timeouts: ConsecutiveTimeouts,
    /// Same-line resend requests tolerated before declaring a resend loop.
    pub max_consecutive_resends: u32,
    /// Depth of the sent line history.
    pub line_history_size: usize,
    /// Checksum every command.
    pub always_send_checksum: bool,
    /// Never checksum, except commands that require it.
    pub never_send_checksum: bool,
    /// Checksum lines without a G/M code too.
    pub send_checksum_with_unknown_commands: bool,
    /// Lines without a G/M code consume flow-control credit.
    pub unknown_commands_need_ack: bool,
    /// Commands always sent with a checksum, even with `never_send_checksum`.
    pub checksum_requiring_commands: Vec<String>,
    /// Commands that may take long to acknowledge.
    pub long_running_commands: Vec<String>,
    /// Commands that are never sent.
    pub blocked_commands: Vec<String>,
    /// Commands that pause an active print.
    pub pausing_commands: Vec<String>,
    /// Commands that bypass queues.
    pub emergency_commands: Vec<String>,
    /// Log firmware errors and carry on.
    pub ignore_errors: bool,
    /// Disconnect on firmware errors instead of cancelling the print.
    pub disconnect_on_errors: bool,
    /// Send an emergency stop before closing on a fatal error.
    pub send_m112_on_error: bool,
    /// Missing-ok workaround after resend requests.
    pub trigger_ok_after_resend: ResendOkPolicy,
    /// Treat `wait` like `ok` while printing.
    pub support_wait: bool,
    /// Adjust runtime flags from the reported firmware name.
    pub firmware_detection: bool,
    /// Treat unsolicited temperature reports as heatup.
    pub external_heatup_detection: bool,
    /// Parse Repetier `TargetExtr`/`TargetBed` lines.
    pub repetier_target_temp: bool,
    /// Hold the sender while a dwell is in progress.
    pub block_while_dwelling: bool,
    /// Use the printer's SD card.
    pub sd_support: bool,
    /// Assume the SD card is always present.
    pub sd_always_available: bool,
    /// Select SD files by relative path.
    pub sd_relative_path: bool,
    /// Synthesize an `ok` after `Done saving file`.
    pub trigger_ok_for_m29: bool,
    /// Record the position when pausing.
    pub log_position_on_pause: bool,
    /// Record the position when cancelling.
    pub log_position_on_cancel: bool,
    /// Force-send `M108` when cancelling during heatup.
    pub abort_heatup_on_cancel: bool,
    /// Reject tool changes to tools that do not exist.
    pub sanity_check_tools: bool,
    /// Number of extruders.
    pub extruder_count: u32,
    /// All extruders share a single nozzle.
    pub shared_nozzle: bool,
    /// The printer has a heated bed.
    pub heated_bed: bool,
    /// The printer has a heated chamber.
    pub heated_chamber: bool,
    /// Firmware capabilities the host will use.
    pub capabilities: CapabilitySupport,
    /// `Not SD printing` reports tolerated before an SD print is considered done.
    pub max_not_sd_printing: u32,
    /// Write passes without progress before the transport is considered stuck.
    pub max_write_passes: u32,
    /// Treat a bare `F` parameter as a command.
    pub support_f_as_command: bool,
    /// Targets above this count as "heating" for the poll interval.
    pub temperature_target_threshold: f64,
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|code| code.to_string()).collect()
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            port: None,
            baudrate: None,
            baudrate_candidates: Vec::new(),
            ack_max: 1,
            hello_command: "M110 N0".to_string(),
            wait_for_start_on_connect: false,
            timeouts: Timeouts::default(),
            max_consecutive_timeouts: ConsecutiveTimeouts::default(),
            max_consecutive_resends: 10,
            line_history_size: 50,
            always_send_checksum: false,
            never_send_checksum: false,
            send_checksum_with_unknown_commands: false,
            unknown_commands_need_ack: false,
            checksum_requiring_commands: codes(&["M110"]),
            long_running_commands: codes(&[
                "G4", "G28", "G29", "G30", "G32", "M400", "M226", "M600",
            ]),
            blocked_commands: codes(&["M0", "M1"]),
            pausing_commands: codes(&["M0", "M1", "M25"]),
            emergency_commands: codes(&["M112", "M108", "M410"]),
            ignore_errors: false,
            disconnect_on_errors: true,
            send_m112_on_error: true,
            trigger_ok_after_resend: ResendOkPolicy::Detect,
            support_wait: true,
            firmware_detection: true,
            external_heatup_detection: true,
            repetier_target_temp: false,
            block_while_dwelling: false,
            sd_support: true,
            sd_always_available: false,
            sd_relative_path: false,
            trigger_ok_for_m29: true,
            log_position_on_pause: true,
            log_position_on_cancel: true,
            abort_heatup_on_cancel: true,
            sanity_check_tools: true,
            extruder_count: 1,
            shared_nozzle: false,
            heated_bed: true,
            heated_chamber: false,
            capabilities: CapabilitySupport::default(),
            max_not_sd_printing: 2,
            max_write_passes: 5,
            support_f_as_command: false,
            temperature_target_threshold: 25.0,
        }
    }
}

impl CommConfig {
    /// Configuration pinned to a port and baud rate.
    pub fn for_port(port: impl Into<String>, baudrate: u32) -> Self {
        Self {
            port: Some(port.into()),
            baudrate: Some(baudrate),
            ..Self::default()
        }
    }

    /// Load configuration from a `.json` or `.toml` file and validate it.
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            other => {
                return Err(SettingsError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        config.validate()?;
        tracing::debug!("Loaded communication settings from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> SettingsResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file location, `<config dir>/printlink/comm.toml`.
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("printlink").join("comm.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".into())
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.ack_max == 0 {
            return Err(SettingsError::invalid("ack_max", "must be at least 1"));
        }

        if self.line_history_size == 0 {
            return Err(SettingsError::invalid(
                "line_history_size",
                "must be at least 1",
            ));
        }

        if self.baudrate == Some(0) {
            return Err(SettingsError::invalid("baudrate", "must be > 0"));
        }

        for (key, value) in self.timeouts.entries() {
            if !(value > 0.0) {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }

        if self.hello_command.trim().is_empty() {
            return Err(SettingsError::invalid("hello_command", "must not be empty"));
        }

        Ok(())
    }

    /// True if `gcode` is in the long running command list.
    pub fn is_long_running(&self, gcode: &str) -> bool {
        self.long_running_commands.iter().any(|c| c == gcode)
    }

    /// True if `gcode` is in the emergency command list.
    pub fn is_emergency(&self, gcode: &str) -> bool {
        self.emergency_commands.iter().any(|c| c == gcode)
    }

    /// True if `gcode` is in the blocked command list.
    pub fn is_blocked(&self, gcode: &str) -> bool {
        self.blocked_commands.iter().any(|c| c == gcode)
    }

    /// True if `gcode` is in the pausing command list.
    pub fn is_pausing(&self, gcode: &str) -> bool {
        self.pausing_commands.iter().any(|c| c == gcode)
    }

    /// True if `gcode` is in the checksum requiring command list.
    pub fn requires_checksum(&self, gcode: &str) -> bool {
        self.checksum_requiring_commands.iter().any(|c| c == gcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CommConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ack_max, 1);
        assert_eq!(config.line_history_size, 50);
        assert!(config.is_long_running("M400"));
        assert!(config.is_emergency("M112"));
        assert!(config.requires_checksum("M110"));
        assert!(!config.is_blocked("G1"));
    }

    #[test]
    fn test_validation_failures() {
        let config = CommConfig {
            ack_max: 0,
            ..CommConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CommConfig {
            line_history_size: 0,
            ..CommConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = CommConfig::default();
        config.timeouts.communication = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeouts.communication"));
    }

    #[test]
    fn test_capability_support() {
        let support = CapabilitySupport {
            busy_protocol: false,
            ..CapabilitySupport::default()
        };
        assert!(!support.supports("BUSY_PROTOCOL"));
        assert!(support.supports("AUTOREPORT_TEMP"));
        assert!(support.supports("SOMETHING_NEW"));
    }
}
