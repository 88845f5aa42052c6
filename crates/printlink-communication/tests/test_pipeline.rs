use printlink_communication::pipeline::{
    ClearToSend, LineTracker, QueueItem, ResendDecision, SendQueue,
};
use proptest::prelude::*;

fn tracker_with_lines(count: u64) -> LineTracker {
    let mut tracker = LineTracker::new(50);
    for i in 0..count {
        tracker.assign(&format!("G1 X{}", i));
    }
    tracker
}

/// Drives tracker, send queue and gate the way the engine does for
/// `Resend: 5` followed by `ok`s.
#[test]
fn test_resend_session_through_send_queue() {
    let mut tracker = tracker_with_lines(8);
    let queue = SendQueue::new();
    let gate = ClearToSend::new(1);

    queue.put(QueueItem::command("G1 X100"), false).unwrap();

    assert_eq!(
        tracker.handle_resend_request(5, 10),
        ResendDecision::Started { delta: 3 }
    );
    queue.set_resend_active(true);

    let mut written = Vec::new();
    loop {
        gate.release();
        let Some(line) = tracker.next_resend(false) else {
            break;
        };
        let mut item = QueueItem::command(line.command.clone());
        item.line_number = Some(line.line_number);
        queue.put(item, true).unwrap();

        let served = queue.try_get().unwrap();
        gate.consume();
        written.push((served.line_number, served.text().map(str::to_string)));

        if line.finished {
            queue.set_resend_active(false);
        }
    }

    assert_eq!(
        written,
        vec![
            (Some(5), Some("G1 X5".to_string())),
            (Some(6), Some("G1 X6".to_string())),
            (Some(7), Some("G1 X7".to_string())),
        ]
    );
    assert!(!queue.resend_active());
    assert_eq!(queue.try_get().unwrap().text(), Some("G1 X100"));
    assert_eq!(tracker.assign("G1 X100"), 8);
}

#[test]
fn test_regular_items_held_back_during_resend() {
    let queue = SendQueue::new();
    queue.put(QueueItem::command("M105"), false).unwrap();
    queue.set_resend_active(true);

    assert!(queue.is_empty());
    assert!(queue.try_get().is_none());

    queue.set_resend_active(false);
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_resend_request_after_reset_is_out_of_range() {
    let mut tracker = tracker_with_lines(5);
    tracker.reset(0);
    tracker.assign("M110 N0");

    assert!(matches!(
        tracker.handle_resend_request(3, 10),
        ResendDecision::InsufficientHistory { line: 3, current: 1, .. }
    ));
    assert!(!tracker.resend_active());
}

#[test]
fn test_history_keeps_only_capacity() {
    let mut tracker = LineTracker::new(4);
    for i in 0..10 {
        tracker.assign(&format!("G1 X{}", i));
    }
    let numbers: Vec<u64> = tracker
        .history()
        .iter()
        .map(|entry| entry.line_number)
        .collect();
    assert_eq!(numbers, vec![6, 7, 8, 9]);
}

proptest! {
    #[test]
    fn prop_line_numbers_continue_after_resend(
        before in 1u64..40,
        back in 1u64..40,
        after in 1u64..20,
    ) {
        let back = back.min(before);
        let mut tracker = LineTracker::new(50);
        let mut assigned = Vec::new();
        for i in 0..before {
            assigned.push(tracker.assign(&format!("G1 X{}", i)));
        }

        let requested = before - back;
        prop_assert_eq!(
            tracker.handle_resend_request(requested, 10),
            ResendDecision::Started { delta: back }
        );
        let mut resent = Vec::new();
        while let Some(line) = tracker.next_resend(false) {
            resent.push(line.line_number);
        }
        prop_assert_eq!(resent, (requested..before).collect::<Vec<_>>());

        for i in 0..after {
            assigned.push(tracker.assign(&format!("G1 Y{}", i)));
        }
        prop_assert_eq!(assigned[0], 0);
        prop_assert!(assigned.windows(2).all(|pair| pair[1] == pair[0] + 1));
    }
}
