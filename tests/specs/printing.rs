// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end printing scenarios: single job, class spread, back-end retry,
//! quota enforcement.

use super::support::rig;
use press_core::{
    Clock, ErrorPolicy, EventKind, EventMask, Filter, JobId, JobState, PrinterBuilder,
    PrinterState, QuotaLimits, SubscriptionBuilder,
};

#[test]
fn single_text_job_flows_through_filters_and_backend() {
    let mut rig = rig();
    rig.add_text_printer("p1", "p1.out");

    let caps = rig.spooler.fabric.caps();
    let watcher = SubscriptionBuilder::default()
        .mask(EventMask::of(&[EventKind::JobCreated, EventKind::JobStateChanged]))
        .build();
    let sub = rig.spooler.fabric.table.add(watcher, caps).expect("subscribe");

    let id = rig.submit("p1", "alice", b"hello\n").expect("submit");
    assert_eq!(rig.job_state(id), Some(JobState::Pending));

    rig.drive_to_terminal(id);
    assert_eq!(rig.job_state(id), Some(JobState::Completed));

    // Both filters and the back-end ran: the text filter upcased the
    // document and the back-end landed it on the device.
    let body = std::fs::read_to_string(rig.out_path("p1.out")).expect("device output");
    assert_eq!(body, "HELLO\n");

    // Printer returned to idle with no binding
    let printer = rig.spooler.registry.get("p1").expect("printer");
    assert_eq!(printer.state, PrinterState::Idle);
    assert!(printer.job.is_none());

    // job-created, job-state-changed(processing), job-state-changed(completed)
    let watcher = rig.spooler.fabric.table.get(sub).expect("subscription");
    let kinds: Vec<EventKind> = watcher.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::JobCreated, EventKind::JobStateChanged, EventKind::JobStateChanged]
    );
    assert!(watcher.events[1].text.contains("processing"));
    assert!(watcher.events[2].text.contains("completed"));
}

#[test]
fn class_round_robin_covers_all_members() {
    let mut rig = rig();
    for name in ["p1", "p2", "p3"] {
        rig.add_text_printer(name, &format!("{name}.out"));
    }
    let mut class = press_core::Printer::new_class(
        "pool",
        vec!["p1".into(), "p2".into(), "p3".into()],
    );
    class.accepting = true;
    class.state = PrinterState::Idle;
    rig.spooler.add_printer(class, Vec::new()).expect("add class");

    let ids: Vec<JobId> = (0..3)
        .map(|i| rig.submit("pool", "alice", format!("doc{i}\n").as_bytes()).expect("submit"))
        .collect();

    rig.drive(|s| {
        ids.iter().all(|id| s.jobs.get(id).is_some_and(|j| j.is_terminal()))
    });
    for id in &ids {
        assert_eq!(rig.job_state(*id), Some(JobState::Completed));
    }

    // The cursor advanced through every member: one document each
    for (i, name) in ["p1", "p2", "p3"].iter().enumerate() {
        let body =
            std::fs::read_to_string(rig.out_path(&format!("{name}.out"))).expect("output");
        assert_eq!(body, format!("DOC{i}\n"), "member {name}");
    }
}

#[test]
fn backend_retry_policy_requeues_until_success() {
    let mut rig = rig();
    let marker = rig.out_path("first-attempt");
    rig.install("filter/plain", r#"cat "$6""#);
    rig.install(
        "backend/flaky",
        &format!(
            r#"if [ -f {marker} ]; then cat > "${{DEVICE_URI#flaky://}}"; else touch {marker}; cat > /dev/null; exit 1; fi"#,
            marker = marker.display(),
        ),
    );
    let mut printer = PrinterBuilder::default()
        .name("p2")
        .device_uri(format!("flaky://{}", rig.out_path("p2.out").display()))
        .error_policy(ErrorPolicy::RetryJob)
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![Filter::new("text/plain", "", 100, "plain")])
        .expect("add printer");

    let id = rig.submit("p2", "alice", b"try again\n").expect("submit");
    rig.drive_to_terminal(id);

    assert_eq!(rig.job_state(id), Some(JobState::Completed));
    assert!(marker.exists(), "first attempt never failed");
    assert_eq!(
        std::fs::read_to_string(rig.out_path("p2.out")).expect("output"),
        "try again\n"
    );
    assert_eq!(rig.spooler.registry.get("p2").expect("printer").state, PrinterState::Idle);
}

#[test]
fn quota_limits_one_user_without_touching_others() {
    let mut rig = rig();
    rig.add_text_printer("p3", "p3.out");
    rig.spooler.registry.get_mut("p3").expect("printer").quota =
        QuotaLimits { period: 3_600, page_limit: 5, k_limit: 0 };

    // bob's five sheets inside the window
    let now = rig.spooler.clock.epoch_secs();
    let history = press_core::JobBuilder::default()
        .id(JobId(500))
        .user("bob")
        .dest("p3")
        .state(JobState::Completed)
        .sheets(5)
        .k_octets(0)
        .time_at_completion(now)
        .build();
    rig.spooler.jobs.insert(JobId(500), history);

    let err = rig.submit("p3", "bob", b"over quota\n").expect_err("must refuse");
    assert!(matches!(err, press_core::SpoolError::QuotaExceeded { .. }));

    let ok = rig.submit("p3", "alice", b"fine\n").expect("alice unaffected");
    rig.drive_to_terminal(ok);
    assert_eq!(rig.job_state(ok), Some(JobState::Completed));
}
