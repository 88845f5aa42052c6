use printlink_core::{
    ConnectionEvent, ConnectionState, ErrorEvent, ErrorReason, EventCategory, JobEvent,
    JobOrigin, PrinterEvent, SdEvent, SdFileEntry,
};

#[test]
fn test_error_event_serializes_reason_tag() {
    let event = PrinterEvent::Error(ErrorEvent::Fatal {
        error: "Too many consecutive timeouts, printer still connected and alive?".to_string(),
        reason: ErrorReason::Timeout,
    });
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["Error"]["Fatal"]["reason"], "timeout");

    let back: PrinterEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back.category(), EventCategory::Error);
    assert!(back.description().contains("Too many consecutive timeouts"));
}

#[test]
fn test_state_change_event_roundtrip_keeps_label() {
    let event = PrinterEvent::Connection(ConnectionEvent::StateChanged {
        from: ConnectionState::Connecting,
        to: ConnectionState::Operational,
        label: "Operational".to_string(),
    });
    let text = serde_json::to_string(&event).unwrap();
    let back: PrinterEvent = serde_json::from_str(&text).unwrap();
    match back {
        PrinterEvent::Connection(ConnectionEvent::StateChanged { from, to, label }) => {
            assert_eq!(from, ConnectionState::Connecting);
            assert_eq!(to, ConnectionState::Operational);
            assert_eq!(label, "Operational");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_sd_listing_event() {
    let files = vec![
        SdFileEntry {
            name: "/cube.gco".to_string(),
            size: Some(1234),
        },
        SdFileEntry {
            name: "/benchy.gcode".to_string(),
            size: None,
        },
    ];
    let event = PrinterEvent::Sd(SdEvent::FilesListed {
        files: files.clone(),
    });
    assert_eq!(event.category(), EventCategory::Sd);

    let back: PrinterEvent = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
    match back {
        PrinterEvent::Sd(SdEvent::FilesListed { files: listed }) => assert_eq!(listed, files),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_job_event_category() {
    let event = PrinterEvent::Job(JobEvent::FileSelected {
        name: Some("cube.gco".to_string()),
        size: Some(10),
        origin: Some(JobOrigin::SdCard),
    });
    assert_eq!(event.category(), EventCategory::Job);
}
