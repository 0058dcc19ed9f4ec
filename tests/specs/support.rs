// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared rig for the scenario specs: a spooler with a real reactor, stub
//! filters, and file-backed devices in a temp directory.

use press_core::{FakeClock, Filter, JobId, JobState, NoGroups, PrinterBuilder};
use press_daemon::reactor::IoTag;
use press_daemon::{Reactor, ServerConfig, Spooler, SubmitFile, SubmitRequest};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

pub type SpecSpooler = Spooler<FakeClock, NoGroups>;

pub struct Rig {
    pub dir: TempDir,
    pub spooler: SpecSpooler,
    pub reactor: Reactor,
}

pub fn rig() -> Rig {
    let dir = TempDir::new().expect("tempdir");
    let mut config = ServerConfig::default();
    config.state_dir = dir.path().to_path_buf();
    config.server_root = Some(dir.path().to_path_buf());
    config.server_bin = Some(dir.path().join("bin"));
    config.spool_dir = Some(dir.path().join("spool"));
    config.job_retry_interval = 0;

    let spooler = Spooler::new(config, FakeClock::new(), NoGroups);
    spooler.spool.ensure().expect("spool dir");
    let reactor = Reactor::new().expect("reactor");
    Rig { dir, spooler, reactor }
}

impl Rig {
    pub fn install(&self, rel: &str, script: &str) {
        let path = self.dir.path().join("bin").join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
    }

    pub fn out_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// An accepting printer with a two-filter text→ps chain and a stub
    /// back-end that copies its stdin to the path inside the device URI.
    pub fn add_text_printer(&mut self, name: &str, out: &str) {
        self.install(&format!("filter/texttops-{name}"), r#"tr a-z A-Z < "$6""#);
        self.install(&format!("filter/pstodev-{name}"), "cat");
        self.install("backend/dev", r#"exec cat > "${DEVICE_URI#dev://}""#);
        let mut printer = PrinterBuilder::default()
            .name(name)
            .device_uri(format!("dev://{}", self.out_path(out).display()))
            .build();
        printer.accepting = true;
        self.spooler
            .add_printer(
                printer,
                vec![
                    Filter::new("application/postscript", "", 100, format!("pstodev-{name}")),
                ],
            )
            .expect("add printer");
        self.spooler.mime.add_filter(Filter::new(
            "text/plain",
            "application/postscript",
            100,
            format!("texttops-{name}"),
        ));
    }

    pub fn submit(&mut self, dest: &str, user: &str, data: &[u8]) -> Result<JobId, press_core::SpoolError> {
        let request = SubmitRequest {
            dest: dest.to_string(),
            user: user.to_string(),
            title: String::new(),
            priority: None,
            options: Default::default(),
            files: vec![SubmitFile { mime_type: "text/plain".into(), data: data.to_vec() }],
        };
        self.spooler.submit_job(request, &mut self.reactor)
    }

    /// Pump the reactor until `done` holds or ten real seconds pass.
    pub fn drive(&mut self, done: impl Fn(&SpecSpooler) -> bool) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            if done(&self.spooler) {
                return;
            }
            assert!(std::time::Instant::now() < deadline, "scenario did not converge");
            let (wakeups, timers) = self
                .reactor
                .run_once(std::time::Duration::from_millis(20))
                .expect("run_once");
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

    pub fn drive_to_terminal(&mut self, id: JobId) {
        self.drive(|s| s.jobs.get(&id).is_some_and(|j| j.is_terminal()));
    }

    pub fn job_state(&self, id: JobId) -> Option<JobState> {
        self.spooler.jobs.get(&id).map(|j| j.state)
    }
}
