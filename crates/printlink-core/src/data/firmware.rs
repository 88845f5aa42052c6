//! Firmware identification, capabilities and SD card listings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Firmware pushes temperature reports on its own (`M155`).
pub const CAPABILITY_AUTOREPORT_TEMP: &str = "AUTOREPORT_TEMP";
/// Firmware pushes SD progress reports on its own (`M27 S`).
pub const CAPABILITY_AUTOREPORT_SD_STATUS: &str = "AUTOREPORT_SD_STATUS";
/// Firmware sends `busy:` heartbeats (`M113`).
pub const CAPABILITY_BUSY_PROTOCOL: &str = "BUSY_PROTOCOL";
/// Firmware parses emergency commands before its command queue.
pub const CAPABILITY_EMERGENCY_PARSER: &str = "EMERGENCY_PARSER";
/// Firmware reports a chamber temperature.
pub const CAPABILITY_CHAMBER_TEMP: &str = "CHAMBER_TEMPERATURE";

/// Capabilities announced by `Cap:NAME:0|1` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareCapabilities {
    entries: BTreeMap<String, bool>,
}

impl FirmwareCapabilities {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reported capability.
    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.entries.insert(name.into(), enabled);
    }

    /// True if the firmware reported `name` as enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries.get(name).copied().unwrap_or(false)
    }

    /// Reported value of `name`, if it was reported at all.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries.get(name).copied()
    }

    /// Forget everything, used after an external firmware reset.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over all reported capabilities.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, enabled)| (name.as_str(), *enabled))
    }

    /// Number of reported capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was reported yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A file reported by the firmware's SD card listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdFileEntry {
    /// Absolute name on the card, always starting with `/`.
    pub name: String,
    /// Size in bytes, if the firmware reported it.
    pub size: Option<u64>,
}
