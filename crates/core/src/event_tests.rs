// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn every_kind_has_a_unique_bit() {
    let mut seen = std::collections::HashSet::new();
    for kind in EventKind::ALL {
        assert!(seen.insert(kind.bit()), "duplicate bit for {kind}");
    }
}

#[test]
fn names_round_trip() {
    for kind in EventKind::ALL {
        assert_eq!(EventKind::parse(&kind.to_string()), Some(kind));
    }
    assert_eq!(EventKind::parse("not-an-event"), None);
}

#[test]
fn mask_membership() {
    let mask = EventMask::of(&[EventKind::JobStateChanged, EventKind::JobCompleted]);
    assert!(mask.contains(EventKind::JobStateChanged));
    assert!(mask.contains(EventKind::JobCompleted));
    assert!(!mask.contains(EventKind::PrinterAdded));
}

#[test]
fn parse_list_handles_all_and_unknown() {
    assert_eq!(EventMask::parse_list("all"), EventMask::all());
    assert_eq!(EventMask::parse_list("printer-added all job-created"), EventMask::all());

    let mask = EventMask::parse_list("job-created bogus-event printer-deleted");
    assert!(mask.contains(EventKind::JobCreated));
    assert!(mask.contains(EventKind::PrinterDeleted));
    assert!(!mask.contains(EventKind::JobCompleted));
}

#[test]
fn mask_names_round_trip() {
    assert_eq!(EventMask::all().names(), "all");

    let mask = EventMask::of(&[EventKind::JobCreated, EventKind::PrinterStateChanged]);
    assert_eq!(mask.names(), "printer-state-changed job-created");
    assert_eq!(EventMask::parse_list(&mask.names()), mask);
}

#[test]
fn kind_classification() {
    assert!(EventKind::PrinterStateChanged.is_printer_event());
    assert!(!EventKind::PrinterStateChanged.is_job_event());
    assert!(EventKind::JobProgress.is_job_event());
    assert!(!EventKind::ServerAudit.is_printer_event());
    assert!(!EventKind::ServerAudit.is_job_event());
}

#[parameterized(
    pending_on_stopped_printer = { JobState::Pending, true, false, "printer-stopped" },
    pending_normal = { JobState::Pending, false, false, "none" },
    held_with_deadline = { JobState::Held, false, true, "job-hold-until-specified" },
    held_plain = { JobState::Held, false, false, "job-incoming" },
    processing = { JobState::Processing, false, false, "job-printing" },
    stopped = { JobState::Stopped, false, false, "job-stopped" },
    canceled = { JobState::Canceled, false, false, "job-canceled-by-user" },
    aborted = { JobState::Aborted, false, false, "aborted-by-system" },
    completed = { JobState::Completed, false, false, "job-completed-successfully" },
)]
fn derived_job_reasons(state: JobState, stopped: bool, hold: bool, expected: &str) {
    assert_eq!(job_state_reason(state, stopped, hold), expected);
}

#[test]
fn record_serde_round_trip() {
    let record = EventRecord {
        sequence: 7,
        time: 1_000,
        kind: EventKind::JobStateChanged,
        text: "job 3 now printing".to_string(),
        printer: Some(PrinterSnapshot {
            name: "lp1".into(),
            state: PrinterState::Processing,
            accepting: true,
            reasons: vec!["media-low".into()],
        }),
        job: Some(JobSnapshot {
            id: crate::job::JobId(3),
            state: JobState::Processing,
            state_reason: "job-printing".into(),
        }),
        user_data: vec![1, 2, 3],
    };
    let json = serde_json::to_string(&record).unwrap();
    let back: EventRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}
