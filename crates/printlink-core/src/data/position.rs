//! Last reported printer position.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last known position as reported by an `M114` answer.
///
/// Pause and cancel snapshots are taken with [`PositionRecord::copy_from`] so
/// they never alias the live record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// X axis.
    pub x: Option<f64>,
    /// Y axis.
    pub y: Option<f64>,
    /// Z axis.
    pub z: Option<f64>,
    /// Extruder axis of the active tool.
    pub e: Option<f64>,
    /// Last commanded feedrate.
    pub f: Option<f64>,
    /// Active tool.
    pub t: Option<u32>,
    /// Per-extruder axis values (`E0:`, `E1:`, ...).
    pub extruders: BTreeMap<u32, f64>,
}

impl PositionRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once at least one axis has been reported.
    pub fn is_valid(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }

    /// Forget every value.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Overwrite this record with the values of `other`.
    pub fn copy_from(&mut self, other: &PositionRecord) {
        self.clone_from(other);
    }

    /// Value of extruder `index`, if reported.
    pub fn extruder(&self, index: u32) -> Option<f64> {
        self.extruders.get(&index).copied()
    }

    /// Record the value of extruder `index`.
    pub fn set_extruder(&mut self, index: u32, value: f64) {
        self.extruders.insert(index, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_is_detached() {
        let mut live = PositionRecord::new();
        live.x = Some(10.0);
        live.set_extruder(1, 3.5);

        let mut snapshot = PositionRecord::new();
        snapshot.copy_from(&live);
        live.x = Some(20.0);
        live.set_extruder(1, 4.0);

        assert_eq!(snapshot.x, Some(10.0));
        assert_eq!(snapshot.extruder(1), Some(3.5));
        assert!(snapshot.is_valid());
    }
}
