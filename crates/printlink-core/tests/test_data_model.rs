use printlink_core::{
    ConnectionState, FirmwareCapabilities, JobOrigin, PositionRecord, TemperatureReading,
    TemperatureRecord,
};
use proptest::prelude::*;

#[test]
fn test_printing_family() {
    let printing: Vec<_> = ConnectionState::ALL
        .iter()
        .filter(|s| s.is_printing())
        .copied()
        .collect();
    assert_eq!(
        printing,
        vec![
            ConnectionState::Starting,
            ConnectionState::Printing,
            ConnectionState::Pausing,
            ConnectionState::Resuming,
            ConnectionState::Finishing,
            ConnectionState::Cancelling,
        ]
    );
    assert_eq!(printing.len(), 6);
    assert!(!ConnectionState::Operational.is_printing());
    assert!(!ConnectionState::Paused.is_printing());
}

#[test]
fn test_operational_family() {
    let operational: Vec<_> = ConnectionState::ALL
        .iter()
        .filter(|s| s.is_operational())
        .collect();
    assert_eq!(operational.len(), 9);
    for state in [
        ConnectionState::None,
        ConnectionState::OpeningTransport,
        ConnectionState::DetectingTransport,
        ConnectionState::Connecting,
        ConnectionState::Closed,
        ConnectionState::ClosedWithError,
        ConnectionState::Error,
    ] {
        assert!(!state.is_operational(), "{state} is not operational");
    }
}

#[test]
fn test_state_labels_by_origin() {
    let state = ConnectionState::Printing;
    assert_eq!(state.label(None, None), "Printing");
    assert_eq!(state.label(Some(JobOrigin::Local), None), "Printing");
    assert_eq!(state.label(Some(JobOrigin::Streaming), None), "Sending file to SD");
    assert_eq!(
        ConnectionState::TransferringFile.label(None, None),
        "Transferring file to SD"
    );
}

#[test]
fn test_capabilities() {
    let mut caps = FirmwareCapabilities::new();
    assert!(caps.is_empty());
    caps.set("AUTOREPORT_TEMP", true);
    caps.set("EMERGENCY_PARSER", false);
    assert!(caps.is_enabled("AUTOREPORT_TEMP"));
    assert!(!caps.is_enabled("EMERGENCY_PARSER"));
    assert_eq!(caps.get("EMERGENCY_PARSER"), Some(false));
    assert_eq!(caps.get("BUSY_PROTOCOL"), None);
    caps.clear();
    assert_eq!(caps.len(), 0);
}

#[test]
fn test_position_reset() {
    let mut position = PositionRecord::new();
    position.z = Some(0.2);
    position.t = Some(1);
    position.reset();
    assert_eq!(position, PositionRecord::default());
    assert!(!position.is_valid());
}

proptest! {
    #[test]
    fn prop_none_never_erases(actual in -50.0f64..400.0, target in 0.0f64..300.0) {
        let mut record = TemperatureRecord::new();
        record.set_tool(2, Some(actual), Some(target));
        record.set_tool(2, None, None);
        record.set_tool(2, None, None);
        prop_assert_eq!(record.tool(2), Some(TemperatureReading::new(actual, Some(target))));
    }

    #[test]
    fn prop_partial_updates_merge(first in 0.0f64..300.0, second in 0.0f64..300.0, target in 0.0f64..300.0) {
        let mut record = TemperatureRecord::new();
        record.set_bed(Some(first), Some(target));
        record.set_bed(Some(second), None);
        prop_assert_eq!(record.bed(), TemperatureReading::new(second, Some(target)));
    }
}
