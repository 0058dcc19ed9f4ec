// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::reactor::Reactor;
use press_core::{
    EventMask, FakeClock, NoGroups, Printer, PrinterBuilder, SubscriptionBuilder,
};
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

type TestSpooler = Spooler<FakeClock, NoGroups>;

struct Rig {
    dir: TempDir,
    spooler: TestSpooler,
    reactor: Reactor,
}

fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.state_dir = dir.path().to_path_buf();
    config.server_root = Some(dir.path().to_path_buf());
    config.server_bin = Some(dir.path().join("bin"));
    config.spool_dir = Some(dir.path().join("spool"));
    config.job_retry_interval = 0;
    config.strict_policy_default = true;

    let spooler = Spooler::new(config, FakeClock::new(), NoGroups);
    spooler.spool.ensure().unwrap();
    let reactor = Reactor::new().unwrap();
    Rig { dir, spooler, reactor }
}

impl Rig {
    fn install(&self, rel: &str, script: &str) {
        let path = self.dir.path().join("bin").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    fn out_path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    /// A printer writing to `file:<dir>/<out>` with a passthrough text filter.
    fn add_file_printer(&mut self, name: &str, out: &str) {
        self.install(&format!("filter/copy-{name}"), r#"cat "$6""#);
        let mut printer = PrinterBuilder::default()
            .name(name)
            .device_uri(format!("file:{}", self.out_path(out).display()))
            .build();
        printer.accepting = true;
        self.spooler
            .add_printer(
                printer,
                vec![press_core::Filter::new(
                    "text/plain",
                    "",
                    100,
                    format!("copy-{name}"),
                )],
            )
            .unwrap();
    }

    fn submit(&mut self, dest: &str, user: &str, data: &[u8]) -> Result<JobId, SpoolError> {
        let request = SubmitRequest {
            dest: dest.to_string(),
            user: user.to_string(),
            title: String::new(),
            priority: None,
            options: IndexMap::new(),
            files: vec![SubmitFile { mime_type: "text/plain".into(), data: data.to_vec() }],
        };
        self.spooler.submit_job(request, &mut self.reactor)
    }

    /// Pump the reactor until `done` or a wall-clock deadline.
    fn drive(&mut self, done: impl Fn(&TestSpooler) -> bool) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            if done(&self.spooler) {
                return;
            }
            assert!(std::time::Instant::now() < deadline, "scenario did not converge");
            let (wakeups, timers) = self
                .reactor
                .run_once(std::time::Duration::from_millis(20))
                .unwrap();
            for wakeup in wakeups {
                if !self.reactor.is_current(&wakeup) {
                    continue;
                }
                if let IoTag::PipelineStatus(job_id) = wakeup.tag {
                    self.spooler.handle_pipeline_status(job_id, &mut self.reactor);
                }
            }
            for timer in timers {
                self.spooler.handle_timer(timer.tag, &mut self.reactor);
            }
        }
    }

    fn job_state(&self, id: JobId) -> Option<JobState> {
        self.spooler.jobs.get(&id).map(|j| j.state)
    }
}

#[test]
fn single_file_job_runs_to_completion() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    let watcher = SubscriptionBuilder::default()
        .mask(EventMask::of(&[EventKind::JobStateChanged, EventKind::JobCreated]))
        .build();
    let caps = rig.spooler.fabric.caps();
    let sub_id = rig.spooler.fabric.table.add(watcher, caps).unwrap();

    let id = rig.submit("p1", "alice", b"hello\n").unwrap();
    assert_eq!(rig.job_state(id), Some(JobState::Pending));

    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    assert_eq!(rig.job_state(id), Some(JobState::Completed));

    // The document reached the device
    assert_eq!(std::fs::read_to_string(rig.out_path("p1.out")).unwrap(), "hello\n");

    // Printer is idle and unbound again
    let printer = rig.spooler.registry.get("p1").unwrap();
    assert_eq!(printer.state, PrinterState::Idle);
    assert!(printer.job.is_none());

    // Event order: created, processing, completed
    let sub = rig.spooler.fabric.table.get(sub_id).unwrap();
    let kinds: Vec<EventKind> = sub.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::JobCreated, EventKind::JobStateChanged, EventKind::JobStateChanged]
    );
    assert!(sub.events[1].text.contains("processing"));
    assert!(sub.events[2].text.contains("completed"));
    let seqs: Vec<u64> = sub.events.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn submit_to_unknown_destination_fails() {
    let mut rig = rig();
    let err = rig.submit("nowhere", "alice", b"x").unwrap_err();
    assert!(matches!(err, SpoolError::NoSuchDestination(_)));
}

#[test]
fn submit_to_rejecting_printer_fails() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    rig.spooler.set_accepting("p1", false).unwrap();

    let err = rig.submit("p1", "alice", b"x").unwrap_err();
    assert!(matches!(err, SpoolError::NotAccepting(_)));
}

#[test]
fn printer_allow_list_denies_outsiders() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    rig.spooler.registry.get_mut("p1").unwrap().access =
        press_core::UserAccess::Allow(vec!["alice".to_string()]);

    assert!(rig.submit("p1", "alice", b"x").is_ok());
    let err = rig.submit("p1", "mallory", b"x").unwrap_err();
    assert!(matches!(err, SpoolError::PolicyDenied { .. }));
}

#[test]
fn job_ids_are_monotonic() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    let a = rig.submit("p1", "alice", b"1").unwrap();
    let b = rig.submit("p1", "alice", b"2").unwrap();
    let c = rig.submit("p1", "alice", b"3").unwrap();
    assert!(a < b && b < c);
}

#[test]
fn spool_files_written_at_admission() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    let id = rig.submit("p1", "alice", b"payload").unwrap();

    assert!(rig.spooler.spool.control_path(id).exists());
    let data = std::fs::read(rig.spooler.spool.data_path(id, 1)).unwrap();
    assert_eq!(data, b"payload");
}

#[test]
fn bad_filetype_aborts_admitted_job() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");

    let request = SubmitRequest {
        dest: "p1".to_string(),
        user: "alice".to_string(),
        title: String::new(),
        priority: None,
        options: IndexMap::new(),
        files: vec![SubmitFile { mime_type: "image/png".into(), data: vec![1] }],
    };
    let id = rig.spooler.submit_job(request, &mut rig.reactor).unwrap();

    rig.drive(|s| s.jobs.get(&id).is_none_or(|j| j.is_terminal()));
    assert_eq!(rig.job_state(id), Some(JobState::Aborted));
}

#[test]
fn higher_priority_dispatches_first() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");

    let submit_with_priority = |rig: &mut Rig, priority: u8, data: &[u8]| {
        let request = SubmitRequest {
            dest: "p1".to_string(),
            user: "alice".to_string(),
            title: String::new(),
            priority: Some(priority),
            options: IndexMap::new(),
            files: vec![SubmitFile { mime_type: "text/plain".into(), data: data.to_vec() }],
        };
        rig.spooler.submit_job(request, &mut rig.reactor).unwrap()
    };
    let low_id = submit_with_priority(&mut rig, 10, b"low\n");
    let high_id = submit_with_priority(&mut rig, 90, b"high\n");

    // Dispatch one selection pass by hand: the high-priority job wins even
    // though it arrived second.
    rig.spooler.select_next_work(&mut rig.reactor);
    assert_eq!(rig.job_state(high_id), Some(JobState::Processing));
    assert_eq!(rig.job_state(low_id), Some(JobState::Pending));

    rig.drive(|s| {
        [low_id, high_id]
            .iter()
            .all(|id| s.jobs.get(id).is_some_and(|j| j.is_terminal()))
    });
    assert_eq!(rig.job_state(low_id), Some(JobState::Completed));
}

#[test]
fn class_round_robin_spreads_jobs() {
    let mut rig = rig();
    for name in ["m1", "m2", "m3"] {
        rig.add_file_printer(name, &format!("{name}.out"));
    }
    let mut class =
        Printer::new_class("pool", vec!["m1".into(), "m2".into(), "m3".into()]);
    class.accepting = true;
    class.state = PrinterState::Idle;
    rig.spooler.add_printer(class, Vec::new()).unwrap();

    let ids: Vec<JobId> = (0..3)
        .map(|i| rig.submit("pool", "alice", format!("doc{i}\n").as_bytes()).unwrap())
        .collect();

    rig.drive(|s| {
        s.jobs.values().filter(|j| j.state == JobState::Completed).count() == 3
    });
    for id in ids {
        assert_eq!(rig.job_state(id), Some(JobState::Completed));
    }
    // Round-robin put one document on each member
    for name in ["m1", "m2", "m3"] {
        let body = std::fs::read_to_string(rig.out_path(&format!("{name}.out"))).unwrap();
        assert!(!body.is_empty(), "{name} printed nothing");
    }
}

#[test]
fn backend_retry_job_policy_requeues_and_succeeds() {
    let mut rig = rig();
    // Back-end fails on first attempt, succeeds once the marker exists.
    let marker = rig.out_path("tried");
    rig.install(
        "backend/flaky",
        &format!(
            r#"if [ -f {marker} ]; then cat > {out}; else touch {marker}; cat > /dev/null; exit 1; fi"#,
            marker = marker.display(),
            out = rig.out_path("p2.out").display()
        ),
    );
    rig.install("filter/copy2", r#"cat "$6""#);
    let mut printer = PrinterBuilder::default()
        .name("p2")
        .device_uri("flaky://device/9")
        .error_policy(press_core::ErrorPolicy::RetryJob)
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "copy2")])
        .unwrap();

    let id = rig.submit("p2", "alice", b"retry me\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    assert_eq!(rig.job_state(id), Some(JobState::Completed));
    assert!(marker.exists());
    assert_eq!(
        std::fs::read_to_string(rig.out_path("p2.out")).unwrap(),
        "retry me\n"
    );
    assert_eq!(
        rig.spooler.registry.get("p2").unwrap().state,
        PrinterState::Idle
    );
}

#[test]
fn backend_stop_printer_policy_parks_job() {
    let mut rig = rig();
    rig.install("backend/dead", "cat > /dev/null; exit 1");
    rig.install("filter/copy3", r#"cat "$6""#);
    let mut printer = PrinterBuilder::default()
        .name("p3")
        .device_uri("dead://device/1")
        .error_policy(press_core::ErrorPolicy::StopPrinter)
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "copy3")])
        .unwrap();

    let id = rig.submit("p3", "alice", b"x\n").unwrap();
    rig.drive(|s| {
        s.registry.get("p3").is_some_and(|p| p.state == PrinterState::Stopped)
    });

    assert_eq!(rig.job_state(id), Some(JobState::Stopped));
    let printer = rig.spooler.registry.get("p3").unwrap();
    assert!(printer.state_message.contains("status 1"));

    // Resuming the printer requeues the stopped job
    rig.spooler.resume_printer("p3", &mut rig.reactor).unwrap();
    assert_eq!(rig.job_state(id), Some(JobState::Pending));
}

#[test]
fn filter_failure_aborts_job() {
    let mut rig = rig();
    rig.install("filter/explode", "exit 9");
    let mut printer = PrinterBuilder::default()
        .name("p4")
        .device_uri(format!("file:{}", rig.out_path("p4.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "explode")])
        .unwrap();

    let id = rig.submit("p4", "alice", b"x\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    assert_eq!(rig.job_state(id), Some(JobState::Aborted));
    assert_eq!(rig.spooler.registry.get("p4").unwrap().state, PrinterState::Idle);
}

#[test]
fn quota_refuses_user_over_page_limit() {
    let mut rig = rig();
    rig.add_file_printer("p5", "p5.out");
    rig.spooler.registry.get_mut("p5").unwrap().quota =
        press_core::QuotaLimits { period: 3_600, page_limit: 5, k_limit: 0 };

    // bob already printed 5 sheets inside the window
    let history = press_core::JobBuilder::default()
        .id(JobId(900))
        .user("bob")
        .dest("p5")
        .state(JobState::Completed)
        .sheets(5)
        .k_octets(0)
        .time_at_completion(rig.spooler.clock.epoch_secs())
        .build();
    rig.spooler.jobs.insert(JobId(900), history);

    let err = rig.submit("p5", "bob", b"one more\n").unwrap_err();
    assert!(matches!(err, SpoolError::QuotaExceeded { .. }));

    // alice is unaffected
    assert!(rig.submit("p5", "alice", b"fine\n").is_ok());
}

#[test]
fn cancel_pending_job_is_immediate() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    // Hold selection off by stopping the printer first
    rig.spooler.pause_printer("p1", "maintenance", &mut rig.reactor).unwrap();
    let id = rig.submit("p1", "alice", b"x\n").unwrap();

    rig.spooler.cancel_job(id, &mut rig.reactor).unwrap();
    assert_eq!(rig.job_state(id), Some(JobState::Canceled));

    let err = rig.spooler.cancel_job(id, &mut rig.reactor).unwrap_err();
    assert!(matches!(err, SpoolError::BadTransition { .. }));
}

#[test]
fn cancel_processing_job_kills_chain() {
    let mut rig = rig();
    rig.install("filter/slowcopy", "sleep 30");
    let mut printer = PrinterBuilder::default()
        .name("p6")
        .device_uri(format!("file:{}", rig.out_path("p6.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "slowcopy")])
        .unwrap();

    let id = rig.submit("p6", "alice", b"x\n").unwrap();
    rig.spooler.select_next_work(&mut rig.reactor);
    assert_eq!(rig.job_state(id), Some(JobState::Processing));

    rig.spooler.cancel_job(id, &mut rig.reactor).unwrap();
    // Canceled immediately, reap happens asynchronously
    assert_eq!(rig.job_state(id), Some(JobState::Canceled));

    rig.drive(|s| s.active_pipelines() == 0);
    let printer = rig.spooler.registry.get("p6").unwrap();
    assert_eq!(printer.state, PrinterState::Idle);
    assert!(printer.job.is_none());
}

#[test]
fn hold_and_release_cycle() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    rig.spooler.pause_printer("p1", "", &mut rig.reactor).unwrap();
    let id = rig.submit("p1", "alice", b"x\n").unwrap();

    rig.spooler.hold_job(id, None).unwrap();
    assert_eq!(rig.job_state(id), Some(JobState::Held));

    // Held jobs are never selected
    rig.spooler.resume_printer("p1", &mut rig.reactor).unwrap();
    rig.spooler.select_next_work(&mut rig.reactor);
    assert_eq!(rig.job_state(id), Some(JobState::Held));

    rig.spooler.release_job(id, &mut rig.reactor).unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    assert_eq!(rig.job_state(id), Some(JobState::Completed));
}

#[test]
fn restart_reprints_a_completed_job() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    let id = rig.submit("p1", "alice", b"again\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    rig.spooler.restart_job(id, &mut rig.reactor).unwrap();
    assert_eq!(rig.job_state(id), Some(JobState::Pending));
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    assert_eq!(rig.job_state(id), Some(JobState::Completed));
}

#[test]
fn restart_requires_terminal_state() {
    let mut rig = rig();
    rig.add_file_printer("p1", "p1.out");
    rig.spooler.pause_printer("p1", "", &mut rig.reactor).unwrap();
    let id = rig.submit("p1", "alice", b"x\n").unwrap();

    assert!(rig.spooler.restart_job(id, &mut rig.reactor).is_err());
}

#[test]
fn move_job_retargets_pending_work() {
    let mut rig = rig();
    rig.add_file_printer("a", "a.out");
    rig.add_file_printer("b", "b.out");
    rig.spooler.pause_printer("a", "", &mut rig.reactor).unwrap();
    let id = rig.submit("a", "alice", b"moved\n").unwrap();

    rig.spooler.move_job(id, "b").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    assert_eq!(std::fs::read_to_string(rig.out_path("b.out")).unwrap(), "moved\n");
}

#[test]
fn delete_printer_with_bound_job_defers() {
    let mut rig = rig();
    rig.install("filter/slow2", "sleep 30");
    let mut printer = PrinterBuilder::default()
        .name("doomed")
        .device_uri(format!("file:{}", rig.out_path("d.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "slow2")])
        .unwrap();

    let id = rig.submit("doomed", "alice", b"x\n").unwrap();
    rig.spooler.select_next_work(&mut rig.reactor);
    assert_eq!(rig.job_state(id), Some(JobState::Processing));

    rig.spooler.delete_printer("doomed", &mut rig.reactor).unwrap();
    // Deletion completes once the chain reaps
    rig.drive(|s| s.registry.get("doomed").is_none());
    assert!(rig.spooler.mime.filters("text/plain", "printer/doomed").is_none());
}

#[test]
fn pipeline_binding_invariant_holds_while_processing() {
    let mut rig = rig();
    rig.install("filter/slow3", "sleep 30");
    let mut printer = PrinterBuilder::default()
        .name("p7")
        .device_uri(format!("file:{}", rig.out_path("p7.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "slow3")])
        .unwrap();

    let id = rig.submit("p7", "alice", b"x\n").unwrap();
    rig.spooler.select_next_work(&mut rig.reactor);

    let printer = rig.spooler.registry.get("p7").unwrap();
    assert_eq!(printer.state, PrinterState::Processing);
    assert_eq!(printer.job, Some(id));
    assert_eq!(rig.job_state(id), Some(JobState::Processing));
    assert_eq!(
        rig.spooler.jobs.get(&id).unwrap().printer.as_deref(),
        Some("p7")
    );

    rig.spooler.cancel_job(id, &mut rig.reactor).unwrap();
    rig.drive(|s| s.active_pipelines() == 0);
}

#[test]
fn add_printer_rejected_while_processing() {
    let mut rig = rig();
    rig.install("filter/slow4", "sleep 30");
    let mut printer = PrinterBuilder::default()
        .name("busy")
        .device_uri(format!("file:{}", rig.out_path("x.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "slow4")])
        .unwrap();
    let id = rig.submit("busy", "alice", b"x\n").unwrap();
    rig.spooler.select_next_work(&mut rig.reactor);

    let other = PrinterBuilder::default().name("later").build();
    assert!(rig.spooler.add_printer(other, Vec::new()).is_err());

    rig.spooler.cancel_job(id, &mut rig.reactor).unwrap();
    rig.drive(|s| s.active_pipelines() == 0);
}

#[test]
fn page_reports_accumulate_and_log() {
    let mut rig = rig();
    rig.install(
        "filter/paged",
        r#"echo "PAGE: 1 2" >&2
echo "PAGE: 2 1" >&2
cat "$6""#,
    );
    let mut printer = PrinterBuilder::default()
        .name("p8")
        .device_uri(format!("file:{}", rig.out_path("p8.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "paged")])
        .unwrap();

    let id = rig.submit("p8", "alice", b"pages\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    assert_eq!(rig.spooler.jobs.get(&id).unwrap().sheets, 3);
    let log = std::fs::read_to_string(rig.dir.path().join("page_log")).unwrap();
    assert!(log.contains(&format!("p8 alice {id}")));
}

#[test]
fn error_status_latches_over_info() {
    let mut rig = rig();
    rig.install(
        "filter/moody",
        r#"echo "ERROR: jam in tray 2" >&2
echo "INFO: trying again" >&2
cat "$6""#,
    );
    let mut printer = PrinterBuilder::default()
        .name("p9")
        .device_uri(format!("file:{}", rig.out_path("p9.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "moody")])
        .unwrap();

    let id = rig.submit("p9", "alice", b"x\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    // INFO did not overwrite the latched error message
    assert_eq!(
        rig.spooler.registry.get("p9").unwrap().state_message,
        "jam in tray 2"
    );
}

#[test]
fn state_reports_edit_reason_set() {
    let mut rig = rig();
    rig.install(
        "filter/reasons",
        r#"echo "STATE: +media-low,cover-open" >&2
echo "STATE: -cover-open" >&2
cat "$6""#,
    );
    let mut printer = PrinterBuilder::default()
        .name("p10")
        .device_uri(format!("file:{}", rig.out_path("p10.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "reasons")])
        .unwrap();

    let id = rig.submit("p10", "alice", b"x\n").unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    assert_eq!(rig.spooler.registry.get("p10").unwrap().reasons, vec!["media-low"]);
}

#[test]
fn multi_file_job_prints_every_document() {
    let mut rig = rig();
    rig.install(
        "filter/multi",
        &format!(r#"cat "$6" >> {}"#, rig.out_path("multi.out").display()),
    );
    let mut printer = PrinterBuilder::default()
        .name("p11")
        .device_uri(format!("file:{}", rig.out_path("sink.out").display()))
        .build();
    printer.accepting = true;
    rig.spooler
        .add_printer(printer, vec![press_core::Filter::new("text/plain", "", 100, "multi")])
        .unwrap();

    let request = SubmitRequest {
        dest: "p11".to_string(),
        user: "alice".to_string(),
        title: String::new(),
        priority: None,
        options: IndexMap::new(),
        files: vec![
            SubmitFile { mime_type: "text/plain".into(), data: b"one\n".to_vec() },
            SubmitFile { mime_type: "text/plain".into(), data: b"two\n".to_vec() },
        ],
    };
    let id = rig.spooler.submit_job(request, &mut rig.reactor).unwrap();
    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));

    assert_eq!(rig.job_state(id), Some(JobState::Completed));
    let body = std::fs::read_to_string(rig.out_path("multi.out")).unwrap();
    assert_eq!(body, "one\ntwo\n");
    let job = rig.spooler.jobs.get(&id).unwrap();
    assert_eq!(job.current_file, job.files.len());
}

#[test]
fn history_retention_keeps_then_prunes() {
    let mut rig = rig();
    rig.spooler.config.max_job_history = 2;
    rig.add_file_printer("p12", "p12.out");

    let mut ids = Vec::new();
    for i in 0..4 {
        let id = rig.submit("p12", "alice", format!("{i}\n").as_bytes()).unwrap();
        rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
        ids.push(id);
    }

    // Only the two newest terminal jobs survive
    let terminal: Vec<JobId> = rig
        .spooler
        .jobs
        .values()
        .filter(|j| j.is_terminal())
        .map(|j| j.id)
        .collect();
    assert_eq!(terminal, vec![ids[2], ids[3]]);
    assert!(!rig.spooler.spool.control_path(ids[0]).exists());
    assert!(rig.spooler.spool.control_path(ids[3]).exists());
}

#[test]
fn job_subscriptions_die_with_the_job() {
    let mut rig = rig();
    rig.add_file_printer("p13", "p13.out");
    let id = rig.submit("p13", "alice", b"x\n").unwrap();

    let caps = rig.spooler.fabric.caps();
    let tied = SubscriptionBuilder::default().job(id).build();
    let sub_id = rig.spooler.fabric.table.add(tied, caps).unwrap();

    rig.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    assert!(rig.spooler.fabric.table.get(sub_id).is_none());
}
