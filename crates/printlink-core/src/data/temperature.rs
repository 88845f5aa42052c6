//! Last reported heater temperatures.
//!
//! Every setter merges with the previous reading: a `None` actual or target
//! keeps whatever was recorded before instead of erasing it.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Actual and target temperature of a single heater.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    /// Measured temperature.
    pub actual: Option<f64>,
    /// Target temperature.
    pub target: Option<f64>,
}

impl TemperatureReading {
    /// Create a reading with both values set.
    pub fn new(actual: f64, target: Option<f64>) -> Self {
        Self {
            actual: Some(actual),
            target,
        }
    }

    fn merged(self, actual: Option<f64>, target: Option<f64>) -> Self {
        Self {
            actual: actual.or(self.actual),
            target: target.or(self.target),
        }
    }
}

/// Temperatures of all tools, the bed, the chamber and custom probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRecord {
    tools: BTreeMap<u32, TemperatureReading>,
    bed: TemperatureReading,
    chamber: TemperatureReading,
    custom: BTreeMap<String, TemperatureReading>,
}

impl TemperatureRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a tool reading.
    pub fn set_tool(&mut self, tool: u32, actual: Option<f64>, target: Option<f64>) {
        let current = self.tools.get(&tool).copied().unwrap_or_default();
        self.tools.insert(tool, current.merged(actual, target));
    }

    /// Merge the bed reading.
    pub fn set_bed(&mut self, actual: Option<f64>, target: Option<f64>) {
        self.bed = self.bed.merged(actual, target);
    }

    /// Merge the chamber reading.
    pub fn set_chamber(&mut self, actual: Option<f64>, target: Option<f64>) {
        self.chamber = self.chamber.merged(actual, target);
    }

    /// Merge a custom probe reading.
    ///
    /// Identifiers starting with a digit, `b` or `c` are reserved for tools,
    /// the bed and the chamber and are rejected.
    pub fn set_custom(
        &mut self,
        identifier: &str,
        actual: Option<f64>,
        target: Option<f64>,
    ) -> Result<()> {
        if is_reserved_identifier(identifier) {
            return Err(ProtocolError::ReservedIdentifier {
                identifier: identifier.to_string(),
            }
            .into());
        }
        let current = self.custom.get(identifier).copied().unwrap_or_default();
        self.custom
            .insert(identifier.to_string(), current.merged(actual, target));
        Ok(())
    }

    /// Reading of `tool`, if any was recorded.
    pub fn tool(&self, tool: u32) -> Option<TemperatureReading> {
        self.tools.get(&tool).copied()
    }

    /// All tool readings by index.
    pub fn tools(&self) -> &BTreeMap<u32, TemperatureReading> {
        &self.tools
    }

    /// Bed reading.
    pub fn bed(&self) -> TemperatureReading {
        self.bed
    }

    /// Chamber reading.
    pub fn chamber(&self) -> TemperatureReading {
        self.chamber
    }

    /// Custom probe readings by identifier.
    pub fn custom(&self) -> &BTreeMap<String, TemperatureReading> {
        &self.custom
    }

    /// Overwrite this record with the values of `other`.
    pub fn copy_from(&mut self, other: &TemperatureRecord) {
        self.clone_from(other);
    }

    /// True if any tool or bed target is above `threshold`.
    pub fn any_target_above(&self, threshold: f64) -> bool {
        self.tools
            .values()
            .chain(std::iter::once(&self.bed))
            .any(|reading| reading.target.is_some_and(|target| target > threshold))
    }
}

fn is_reserved_identifier(identifier: &str) -> bool {
    identifier
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == 'b' || c == 'c')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_previous_values() {
        let mut record = TemperatureRecord::new();
        record.set_tool(0, Some(200.0), Some(210.0));
        record.set_tool(0, Some(205.0), None);
        assert_eq!(record.tool(0), Some(TemperatureReading::new(205.0, Some(210.0))));

        record.set_tool(0, None, None);
        assert_eq!(record.tool(0), Some(TemperatureReading::new(205.0, Some(210.0))));

        record.set_bed(None, Some(60.0));
        record.set_bed(Some(58.0), None);
        assert_eq!(record.bed(), TemperatureReading::new(58.0, Some(60.0)));
    }

    #[test]
    fn test_reserved_custom_identifiers() {
        let mut record = TemperatureRecord::new();
        assert!(record.set_custom("0", Some(1.0), None).is_err());
        assert!(record.set_custom("bed", Some(1.0), None).is_err());
        assert!(record.set_custom("c", Some(1.0), None).is_err());
        assert!(record.set_custom("probe", Some(35.0), None).is_ok());
        assert_eq!(record.custom()["probe"].actual, Some(35.0));
    }

    #[test]
    fn test_any_target_above() {
        let mut record = TemperatureRecord::new();
        record.set_tool(0, Some(20.0), Some(0.0));
        assert!(!record.any_target_above(25.0));
        record.set_bed(Some(20.0), Some(60.0));
        assert!(record.any_target_above(25.0));
    }
}
