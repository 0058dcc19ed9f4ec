// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription fan-out and ring-wrap behavior.

use super::support::rig;
use press_core::{Clock, EventKind, EventMask, SubscriptionBuilder};

#[test]
fn fanout_and_ring_wrap() {
    let mut rig = rig();
    rig.add_text_printer("p1", "p1.out");

    let caps = rig.spooler.fabric.caps();
    let narrow = SubscriptionBuilder::default()
        .mask(EventMask::of(&[EventKind::JobStateChanged]))
        .build();
    let narrow_id = rig.spooler.fabric.table.add(narrow, caps).expect("subscribe");

    let broad = SubscriptionBuilder::default()
        .mask(EventMask::all())
        .max_events(2usize)
        .build();
    let broad_id = rig.spooler.fabric.table.add(broad, caps).expect("subscribe");

    // Five state changes on one job
    let id = rig.submit("p1", "alice", b"x\n").expect("submit");
    for state_text in ["one", "two", "three"] {
        rig.spooler.emit(
            EventKind::JobStateChanged,
            Some("p1"),
            Some(id),
            format!("synthetic change {state_text}"),
        );
    }
    rig.spooler.emit(EventKind::JobProgress, Some("p1"), Some(id), "page".to_string());
    rig.spooler.emit(
        EventKind::JobStateChanged,
        Some("p1"),
        Some(id),
        "synthetic change four".to_string(),
    );
    rig.spooler.emit(
        EventKind::JobStateChanged,
        Some("p1"),
        Some(id),
        "synthetic change five".to_string(),
    );

    // The narrow subscription saw every state change, sequences strictly
    // increasing with no gaps.
    let narrow = rig.spooler.fabric.table.get(narrow_id).expect("subscription");
    assert_eq!(narrow.events.len(), 5);
    assert!(narrow.events.iter().all(|e| e.kind == EventKind::JobStateChanged));
    let seqs: Vec<u64> = narrow.events.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);

    // The broad ring (cap 2) kept only the last two, and its first cached
    // sequence advanced past the dropped entries.
    let broad = rig.spooler.fabric.table.get(broad_id).expect("subscription");
    assert_eq!(broad.events.len(), 2);
    // job-created + 5 state changes + 1 progress = 7 events total
    assert_eq!(broad.next_sequence, 8);
    assert_eq!(broad.first_sequence(), Some(6));
    assert_eq!(broad.overflowed, 5);
}

#[test]
fn lease_expiry_sweeps_subscription() {
    let mut rig = rig();
    rig.add_text_printer("p1", "p1.out");

    let caps = rig.spooler.fabric.caps();
    let now = rig.spooler.clock.epoch_secs();
    let leased = SubscriptionBuilder::default().build().with_lease(60, now);
    let id = rig.spooler.fabric.table.add(leased, caps).expect("subscribe");

    rig.spooler.clock.advance(std::time::Duration::from_secs(61));
    rig.spooler.handle_timer(
        press_daemon::TimerTag::SubscriptionExpiry,
        &mut rig.reactor,
    );
    assert!(rig.spooler.fabric.table.get(id).is_none());
}
