// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler core: admission, selection, dispatch, and completion.
//!
//! [`Spooler`] is the owning root for every table the daemon mutates —
//! printers, jobs, subscriptions, quotas, the MIME graph. Reactor dispatch
//! hands it tagged wakeups and timers; nothing else touches the state.

use crate::config::ServerConfig;
use crate::events::{EventFabric, SubscriptionCaps};
use crate::pipeline::{copy_raw, PipelineConfig, PipelineHandle, PipelineOutcome};
use crate::reactor::{IoMode, IoTag, Reactor, TimerTag};
use crate::registry::Registry;
use crate::status::{apply_reasons, StatusLevel, StatusUpdate};
use indexmap::IndexMap;
use press_core::{
    Clock, ErrorPolicy, EventKind, Filter, GroupLookup, Job, JobConfig, JobId, JobState,
    MimeGraph, Operation, Policy, Printer, PrinterState, QuotaLedger, SpoolError, SpoolFile,
};
use press_storage::SpoolDir;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::{Duration, Instant};

/// Grace between SIGTERM and SIGKILL when a chain is canceled.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Reason token parked on a printer whose deletion waits for its job.
const DELETING_REASON: &str = "deleting";

/// One submitted document.
pub struct SubmitFile {
    pub mime_type: SmolStr,
    pub data: Vec<u8>,
}

/// A print request after wire parsing.
pub struct SubmitRequest {
    pub dest: String,
    pub user: String,
    pub title: String,
    pub priority: Option<u8>,
    pub options: IndexMap<SmolStr, String>,
    pub files: Vec<SubmitFile>,
}

/// OS group membership via the system database; honors the numeric
/// primary gid as well as the member list.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsGroups;

impl GroupLookup for OsGroups {
    fn user_in_group(&self, user: &str, group: &str) -> bool {
        let Ok(Some(group)) = nix::unistd::Group::from_name(group) else {
            return false;
        };
        if group.mem.iter().any(|m| m == user) {
            return true;
        }
        matches!(
            nix::unistd::User::from_name(user),
            Ok(Some(u)) if u.gid == group.gid
        )
    }
}

/// The owning root.
pub struct Spooler<C: Clock, G: GroupLookup = OsGroups> {
    pub config: ServerConfig,
    pub clock: C,
    pub registry: Registry,
    pub jobs: BTreeMap<JobId, Job>,
    pub mime: MimeGraph,
    pub policies: HashMap<SmolStr, Policy>,
    pub quotas: QuotaLedger,
    pub fabric: EventFabric,
    pub spool: SpoolDir,
    groups: G,
    pipelines: HashMap<JobId, PipelineHandle>,
    next_job_id: JobId,
    page_log: Option<std::fs::File>,
}

impl<C: Clock, G: GroupLookup> Spooler<C, G> {
    pub fn new(config: ServerConfig, clock: C, groups: G) -> Self {
        let caps = SubscriptionCaps {
            max_total: config.max_subscriptions,
            max_per_dest: config.max_subscriptions_per_dest,
            max_events: config.max_events,
        };
        let fabric = EventFabric::new(config.server_bin(), caps);
        let spool = match config.spool_owner() {
            Some((uid, gid)) => SpoolDir::new(config.spool_dir()).with_owner(uid, gid),
            None => SpoolDir::new(config.spool_dir()),
        };
        let mut policies = HashMap::new();
        let default = Policy::stock_default(!config.strict_policy_default);
        policies.insert(default.name.clone(), default);

        Self {
            clock,
            registry: Registry::default(),
            jobs: BTreeMap::new(),
            mime: MimeGraph::default(),
            policies,
            quotas: QuotaLedger::default(),
            fabric,
            spool,
            groups,
            pipelines: HashMap::new(),
            next_job_id: JobId(1),
            page_log: None,
            config,
        }
    }

    fn now(&self) -> u64 {
        self.clock.epoch_secs()
    }

    // -- events ---------------------------------------------------------

    /// Emit an event with fresh printer/job snapshots.
    pub fn emit(
        &mut self,
        kind: EventKind,
        printer: Option<&str>,
        job: Option<JobId>,
        text: String,
    ) {
        let now = self.clock.epoch_secs();
        self.fabric.emit(
            kind,
            printer.and_then(|name| self.registry.get(name)),
            job.and_then(|id| self.jobs.get(&id)),
            text,
            now,
        );
    }

    // -- policy ---------------------------------------------------------

    /// The server-wide default policy, used for operations with no printer
    /// to hang a per-printer policy on (subscriptions, server admin).
    pub fn default_policy(&self) -> &Policy {
        self.policies.get("default").unwrap_or(&FALLBACK_POLICY)
    }

    fn policy_for(&self, printer: &Printer) -> &Policy {
        self.policies
            .get(&printer.op_policy)
            .unwrap_or_else(|| self.default_policy())
    }

    /// Check an operation against the server default policy.
    pub fn check_server_access(
        &self,
        op: Operation,
        user: &str,
        owner: Option<&str>,
    ) -> Result<(), SpoolError> {
        if self.default_policy().check(op, user, owner, &self.groups) {
            Ok(())
        } else {
            Err(SpoolError::PolicyDenied { user: user.to_string() })
        }
    }

    /// Policy + per-printer allow/deny check for an operation.
    pub fn check_access(
        &self,
        printer_name: &str,
        op: Operation,
        user: &str,
        owner: Option<&str>,
    ) -> Result<(), SpoolError> {
        let printer = self.registry.resolve(printer_name)?;
        if op == Operation::PrintJob && !printer.access.permits(user) {
            return Err(SpoolError::PolicyDenied { user: user.to_string() });
        }
        if self.policy_for(printer).check(op, user, owner, &self.groups) {
            Ok(())
        } else {
            Err(SpoolError::PolicyDenied { user: user.to_string() })
        }
    }

    // -- registry mutations ---------------------------------------------

    /// Register (or replace) a printer along with its conversion edges.
    /// Filter-graph edits are forbidden while any job is processing.
    pub fn add_printer(
        &mut self,
        printer: Printer,
        filters: Vec<Filter>,
    ) -> Result<(), SpoolError> {
        self.ensure_graph_quiescent()?;
        let name = printer.name.clone();
        let existed = self.registry.get(&name).is_some();
        self.mime.remove_printer_filters(&name);
        self.mime.add_printer_filters(&name, filters);
        self.registry.insert(printer);
        self.emit(
            if existed { EventKind::PrinterModified } else { EventKind::PrinterAdded },
            Some(name.as_str()),
            None,
            format!("printer {name} {}", if existed { "modified" } else { "added" }),
        );
        Ok(())
    }

    /// Delete a printer. A bound job is canceled first and the removal
    /// finishes when its chain reaps.
    pub fn delete_printer(
        &mut self,
        name: &str,
        reactor: &mut Reactor,
    ) -> Result<(), SpoolError> {
        let printer = self
            .registry
            .get(name)
            .ok_or_else(|| SpoolError::NoSuchDestination(name.to_string()))?;

        if let Some(bound) = printer.job {
            let now = self.now();
            if let Some(p) = self.registry.get_mut(name) {
                p.accepting = false;
                if !p.reasons.iter().any(|r| r == DELETING_REASON) {
                    p.reasons.push(SmolStr::new(DELETING_REASON));
                }
                p.set_state(PrinterState::Stopped, "deleting", now, 0);
            }
            self.cancel_job(bound, reactor)?;
            return Ok(());
        }

        self.ensure_graph_quiescent()?;
        self.finish_delete_printer(name)
    }

    fn finish_delete_printer(&mut self, name: &str) -> Result<(), SpoolError> {
        self.mime.remove_printer_filters(name);
        self.quotas.remove_printer(name);
        let removed = self.registry.remove(name)?;
        self.emit(
            EventKind::PrinterDeleted,
            None,
            None,
            format!("printer {} deleted", removed.name),
        );
        Ok(())
    }

    fn ensure_graph_quiescent(&self) -> Result<(), SpoolError> {
        if self.jobs.values().any(|j| j.state == JobState::Processing) {
            return Err(SpoolError::BadTransition {
                from: "processing".to_string(),
                to: "filter-graph-update".to_string(),
            });
        }
        Ok(())
    }

    // -- admission ------------------------------------------------------

    /// Admit a new job: destination, policy, quota, then persistence.
    pub fn submit_job(
        &mut self,
        request: SubmitRequest,
        reactor: &mut Reactor,
    ) -> Result<JobId, SpoolError> {
        let dest = {
            let printer = self.registry.resolve(&request.dest)?;
            if !printer.accepting {
                return Err(SpoolError::NotAccepting(printer.name.to_string()));
            }
            printer.name.clone()
        };
        self.check_access(&dest, Operation::PrintJob, &request.user, None)?;

        let quota = self.registry.resolve(&dest)?.quota;
        let new_k: u32 =
            request.files.iter().map(|f| f.data.len().div_ceil(1024) as u32).sum();
        let now = self.now();
        // Every job prints at least one sheet; admission counts it.
        if !self.quotas.admits(&dest, quota, &request.user, 1, new_k, now, self.jobs.values())
        {
            return Err(SpoolError::QuotaExceeded {
                user: request.user.clone(),
                dest: dest.to_string(),
            });
        }

        let id = self.next_job_id;
        self.next_job_id = JobId(id.0 + 1);

        // Spool files hit disk before the job becomes visible.
        let mut files = Vec::new();
        for (index, file) in request.files.iter().enumerate() {
            let filename =
                self.spool.write_data(id, index + 1, &file.data).map_err(spool_io)?;
            files.push(SpoolFile { filename, mime_type: file.mime_type.clone() });
        }

        // Merge printer defaults the request did not override.
        let mut options = request.options;
        if !options.contains_key("job-sheets") {
            if let Some(printer) = self.registry.get(&dest) {
                let (start, end) = &printer.job_sheets;
                options.insert(SmolStr::new("job-sheets"), format!("{start},{end}"));
            }
        }

        let mut config = JobConfig::builder(id, request.user, dest.clone())
            .title(request.title)
            .options(options)
            .build();
        config.files = files;
        if let Some(priority) = request.priority {
            config.priority = priority.min(100);
        }
        let mut job = Job::new(config, now);
        job.k_octets = new_k;
        self.spool.save_job(&job).map_err(spool_io)?;
        self.jobs.insert(id, job);

        self.emit(EventKind::JobCreated, Some(dest.as_str()), Some(id), format!("job {id} created"));
        reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
        Ok(id)
    }

    // -- selection and dispatch -----------------------------------------

    /// One selection pass: dispatch at most one (job, printer) pair, then
    /// tick again if more work may be possible.
    pub fn select_next_work(&mut self, reactor: &mut Reactor) {
        let mut candidates: Vec<(JobId, SmolStr)> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Pending)
            .map(|j| (j.id, j.dest.clone()))
            .collect();
        candidates.sort_by(|a, b| {
            let pa = self.jobs.get(&a.0).map(|j| j.priority).unwrap_or(0);
            let pb = self.jobs.get(&b.0).map(|j| j.priority).unwrap_or(0);
            pb.cmp(&pa).then(a.0.cmp(&b.0))
        });

        for (job_id, dest) in candidates {
            let Some(printer_name) = self.registry.pick_class_member(&dest) else {
                continue;
            };
            if !self.registry.get(&printer_name).is_some_and(Printer::is_available) {
                continue;
            }
            match self.start_job(job_id, &printer_name, reactor) {
                Ok(()) => {
                    // One dispatch per pass; tick again for the rest.
                    reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
                }
                Err(e) => {
                    tracing::warn!(job = %job_id, printer = %printer_name, error = %e, "dispatch failed");
                }
            }
            return;
        }
    }

    /// Bind a job to a printer and launch its chain for the current file.
    fn start_job(
        &mut self,
        job_id: JobId,
        printer_name: &str,
        reactor: &mut Reactor,
    ) -> Result<(), SpoolError> {
        let lookup = {
            let job = self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
            let printer = self.registry.resolve(printer_name)?;
            let file = job.next_file().ok_or(SpoolError::NoSuchJob(job_id.0))?;

            let chain = if printer.is_remote() {
                Some(press_core::FilterChain::default())
            } else {
                self.mime.filters(&file.mime_type, &printer.filetype())
            };
            let path = self.spool.root().join(&file.filename);
            match chain {
                Some(chain) => Ok((chain, path, job.current_file == 0)),
                None => Err(SpoolError::BadFileType {
                    src: file.mime_type.to_string(),
                    dst: printer.filetype().to_string(),
                }),
            }
        };
        let (chain, spool_path, first_file) = match lookup {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_job(job_id, &err.to_string());
                return Err(err);
            }
        };

        let pipeline_cfg = self.pipeline_config();
        let now = self.now();

        let spawned = {
            let job = self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
            let printer = self.registry.resolve(printer_name)?;
            PipelineHandle::spawn(job, printer, &chain, &spool_path, &pipeline_cfg)
        };

        match spawned {
            Err(e) => {
                // Spawn failure stops the printer; no retry this cycle.
                if let Some(printer) = self.registry.get_mut(printer_name) {
                    printer.set_state(
                        PrinterState::Stopped,
                        &e.to_string(),
                        now,
                        self.config.max_job_history,
                    );
                }
                self.emit(
                    EventKind::PrinterStateChanged,
                    Some(printer_name),
                    None,
                    e.to_string(),
                );
                Err(e)
            }
            Ok(None) => {
                // Raw file to a file: device; no children to watch.
                let device = self.registry.resolve(printer_name)?.device_uri.clone();
                copy_raw(&spool_path, &device)?;
                self.bind(job_id, printer_name, first_file, now);
                self.finish_file(job_id, PipelineOutcome::Success, reactor);
                Ok(())
            }
            Ok(Some(handle)) => {
                let fd = handle.status_fd();
                reactor
                    .add(fd, IoMode::Read, IoTag::PipelineStatus(job_id))
                    .map_err(|e| SpoolError::Io(std::io::Error::other(e)))?;
                self.pipelines.insert(job_id, handle);
                self.bind(job_id, printer_name, first_file, now);
                Ok(())
            }
        }
    }

    /// Record the job/printer binding and emit the processing transition.
    fn bind(&mut self, job_id: JobId, printer_name: &str, first_file: bool, now: u64) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            if job.state != JobState::Processing {
                let _ = job.transition(JobState::Processing, now);
            }
            job.printer = Some(SmolStr::new(printer_name));
        }
        let history = self.config.max_job_history;
        if let Some(printer) = self.registry.get_mut(printer_name) {
            printer.job = Some(job_id);
            if printer.state != PrinterState::Processing {
                printer.set_state(PrinterState::Processing, "", now, history);
            }
        }
        debug_assert!(self
            .registry
            .get(printer_name)
            .is_some_and(|p| p.binding_consistent(
                self.jobs.get(&job_id).map(|j| j.state)
            )));
        if first_file {
            self.emit(
                EventKind::JobStateChanged,
                Some(printer_name),
                Some(job_id),
                format!("job {job_id} processing"),
            );
        }
    }

    // -- status pipe ----------------------------------------------------

    /// Reactor wakeup on a pipeline's status pipe.
    pub fn handle_pipeline_status(&mut self, job_id: JobId, reactor: &mut Reactor) {
        let Some(pipeline) = self.pipelines.get_mut(&job_id) else {
            return;
        };
        let (updates, eof) = pipeline.read_status();
        let fd = pipeline.status_fd();

        for update in updates {
            self.apply_status_update(job_id, update);
        }

        if eof {
            let _ = reactor.remove(fd);
            reactor.remove_timer(TimerTag::KillPipeline(job_id));
            if let Some(pipeline) = self.pipelines.remove(&job_id) {
                let canceled = pipeline.canceled;
                let requeue = pipeline.requeue;
                let outcome = pipeline.reap();
                if canceled {
                    self.finish_canceled(job_id, reactor);
                } else if requeue {
                    self.finish_requeued(job_id);
                } else {
                    self.finish_file(job_id, outcome, reactor);
                }
            }
        }
    }

    fn apply_status_update(&mut self, job_id: JobId, update: StatusUpdate) {
        let printer_name = match self.jobs.get(&job_id).and_then(|j| j.printer.clone()) {
            Some(name) => name,
            None => return,
        };
        let now = self.now();
        match update {
            StatusUpdate::Message { level, text } => {
                match level {
                    StatusLevel::Error => tracing::error!(job = %job_id, "{text}"),
                    StatusLevel::Warning => tracing::warn!(job = %job_id, "{text}"),
                    StatusLevel::Info => {}
                    StatusLevel::Debug | StatusLevel::Debug2 => {
                        tracing::debug!(job = %job_id, "{text}")
                    }
                }
                let latched = self
                    .jobs
                    .get(&job_id)
                    .and_then(|j| j.status_line.as_deref())
                    .is_some_and(|s| s.starts_with("ERROR"));
                let update_message = match level {
                    StatusLevel::Error | StatusLevel::Warning => true,
                    StatusLevel::Info => !latched,
                    _ => false,
                };
                if update_message {
                    if let Some(printer) = self.registry.get_mut(&printer_name) {
                        printer.state_message = text.clone();
                    }
                }
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.status_line = Some(format!("{level}: {text}"));
                }
            }
            StatusUpdate::Page { page, copies } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.sheets += copies;
                }
                self.log_page(job_id, &printer_name, page, copies, now);
                self.emit(
                    EventKind::JobProgress,
                    Some(printer_name.as_str()),
                    Some(job_id),
                    format!("job {job_id} printed page {page}"),
                );
            }
            StatusUpdate::State(op) => {
                if let Some(printer) = self.registry.get_mut(&printer_name) {
                    apply_reasons(&mut printer.reasons, &op);
                }
                self.emit(
                    EventKind::PrinterStateChanged,
                    Some(printer_name.as_str()),
                    None,
                    format!("printer {printer_name} reasons changed"),
                );
            }
            StatusUpdate::Attr(pairs) => {
                // Applied atomically: all marks land before anyone observes.
                if let Some(printer) = self.registry.get_mut(&printer_name) {
                    for (option, choice) in &pairs {
                        if let Err(e) = printer.options.mark(option, choice) {
                            tracing::debug!(printer = %printer_name, option = %option, error = %e, "ATTR mark rejected");
                        }
                    }
                }
            }
        }
    }

    /// Append one page-log line: printer user job-id time page copies.
    fn log_page(&mut self, job: JobId, printer: &str, page: u32, copies: u32, now: u64) {
        if self.page_log.is_none() {
            let path = self.config.state_dir.join("page_log");
            self.page_log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "page log unavailable");
                })
                .ok();
        }
        if let Some(log) = self.page_log.as_mut() {
            let user = self.jobs.get(&job).map(|j| j.user.as_str()).unwrap_or("-");
            let _ = writeln!(log, "{printer} {user} {job} {now} {page} {copies}");
        }
    }

    // -- completion -----------------------------------------------------

    /// Advance a job after its chain reaped.
    fn finish_file(&mut self, job_id: JobId, outcome: PipelineOutcome, reactor: &mut Reactor) {
        let now = self.now();
        let printer_name = match self.jobs.get(&job_id).and_then(|j| j.printer.clone()) {
            Some(name) => name,
            None => return,
        };

        match outcome {
            PipelineOutcome::Success => {
                let more = {
                    let Some(job) = self.jobs.get_mut(&job_id) else { return };
                    job.current_file += 1;
                    job.has_more_files()
                };
                if more {
                    // Same printer, same state; next file.
                    if let Err(e) = self.start_job(job_id, &printer_name, reactor) {
                        tracing::warn!(job = %job_id, error = %e, "next-file dispatch failed");
                    }
                    return;
                }
                self.complete_job(job_id, &printer_name, now, reactor);
            }
            PipelineOutcome::FilterFailed { program, status } => {
                tracing::error!(job = %job_id, program = %program, status, "filter failed");
                self.release_printer(&printer_name, now, reactor);
                self.job_to_aborted(job_id, now);
                self.after_terminal(job_id);
            }
            PipelineOutcome::BackendFailed { status } => {
                self.apply_error_policy(job_id, &printer_name, status, now, reactor);
            }
        }
    }

    fn complete_job(&mut self, job_id: JobId, printer_name: &str, now: u64, reactor: &mut Reactor) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            let _ = job.transition(JobState::Completed, now);
        }
        self.release_printer(printer_name, now, reactor);

        // Quota settles on completion with the job's totals.
        let (user, sheets, k) = match self.jobs.get(&job_id) {
            Some(job) => (job.user.clone(), job.sheets, job.k_octets),
            None => return,
        };
        let limits = self.registry.get(printer_name).map(|p| p.quota).unwrap_or_default();
        let auto_purge = self.config.job_auto_purge;
        if let Some(usage) = self.quotas.update(
            printer_name,
            limits,
            &user,
            sheets,
            k,
            now,
            self.jobs.values(),
            auto_purge,
        ) {
            for stale in usage.purge {
                if stale != job_id {
                    let _ = self.cancel_job(stale, reactor);
                }
            }
        }

        self.emit(
            EventKind::JobStateChanged,
            Some(printer_name),
            Some(job_id),
            format!("job {job_id} completed"),
        );
        self.emit(
            EventKind::JobCompleted,
            Some(printer_name),
            Some(job_id),
            format!("job {job_id} completed"),
        );
        self.after_terminal(job_id);
    }

    /// Unbind the printer and return it to idle (or finish a deferred
    /// deletion).
    fn release_printer(&mut self, printer_name: &str, now: u64, reactor: &mut Reactor) {
        let history = self.config.max_job_history;
        let deleting = {
            let Some(printer) = self.registry.get_mut(printer_name) else { return };
            printer.job = None;
            if printer.reasons.iter().any(|r| r == DELETING_REASON) {
                true
            } else {
                if printer.state == PrinterState::Processing {
                    printer.set_state(PrinterState::Idle, "", now, history);
                }
                false
            }
        };
        if deleting {
            if let Err(e) = self.finish_delete_printer(printer_name) {
                tracing::warn!(printer = printer_name, error = %e, "deferred delete failed");
            }
        } else {
            self.emit(
                EventKind::PrinterStateChanged,
                Some(printer_name),
                None,
                format!("printer {printer_name} idle"),
            );
        }
        reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
    }

    fn job_to_aborted(&mut self, job_id: JobId, now: u64) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            let _ = job.transition(JobState::Aborted, now);
        }
        self.emit(EventKind::JobStateChanged, None, Some(job_id), format!("job {job_id} aborted"));
    }

    /// Error-policy handling for a back-end failure.
    fn apply_error_policy(
        &mut self,
        job_id: JobId,
        printer_name: &str,
        status: i32,
        now: u64,
        reactor: &mut Reactor,
    ) {
        let policy = self
            .registry
            .get(printer_name)
            .map(|p| p.error_policy)
            .unwrap_or_default();
        tracing::warn!(job = %job_id, printer = printer_name, status, policy = %policy, "backend failed");

        if let Some(job) = self.jobs.get_mut(&job_id) {
            let _ = job.transition(JobState::Stopped, now);
        }
        self.emit(
            EventKind::JobStopped,
            Some(printer_name),
            Some(job_id),
            format!("job {job_id} stopped by backend status {status}"),
        );

        match policy {
            ErrorPolicy::RetryJob => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    let _ = job.transition(JobState::Pending, now);
                    job.printer = None;
                }
                self.release_printer(printer_name, now, reactor);
                let delay = Duration::from_secs(self.config.job_retry_interval);
                reactor.add_timer(Instant::now() + delay, TimerTag::RetryJob(job_id));
            }
            ErrorPolicy::StopPrinter => {
                let history = self.config.max_job_history;
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.printer = None;
                }
                if let Some(printer) = self.registry.get_mut(printer_name) {
                    printer.job = None;
                    let reason = crate::pipeline::backend_failure_reason(status);
                    if !printer.reasons.iter().any(|r| r.eq_ignore_ascii_case(&reason)) {
                        printer.reasons.push(reason);
                    }
                    printer.set_state(
                        PrinterState::Stopped,
                        &format!("backend exited with status {status}"),
                        now,
                        history,
                    );
                }
                self.emit(
                    EventKind::PrinterStopped,
                    Some(printer_name),
                    Some(job_id),
                    format!("printer {printer_name} stopped"),
                );
                self.emit(
                    EventKind::PrinterStateChanged,
                    Some(printer_name),
                    Some(job_id),
                    format!("printer {printer_name} stopped"),
                );
            }
            ErrorPolicy::AbortJob => {
                self.release_printer(printer_name, now, reactor);
                self.job_to_aborted(job_id, now);
                self.after_terminal(job_id);
            }
        }
        let _ = self.jobs.get_mut(&job_id).map(|j| self.spool.save_job(j));
    }

    /// A canceled chain finished reaping.
    fn finish_canceled(&mut self, job_id: JobId, reactor: &mut Reactor) {
        let now = self.now();
        if let Some(printer_name) = self.registry.printer_for_job(job_id).map(|p| p.name.clone())
        {
            self.release_printer(&printer_name, now, reactor);
            self.after_terminal(job_id);
        } else {
            self.cleanup_terminal(job_id);
        }
    }

    /// A chain torn down to requeue its job (printer pause, shutdown).
    fn finish_requeued(&mut self, job_id: JobId) {
        let now = self.now();
        if let Some(job) = self.jobs.get_mut(&job_id) {
            let _ = job.transition(JobState::Stopped, now);
            let _ = job.transition(JobState::Pending, now);
            job.printer = None;
            let _ = self.spool.save_job(job);
        }
        if let Some(name) = self.registry.printer_for_job(job_id).map(|p| p.name.clone()) {
            if let Some(printer) = self.registry.get_mut(&name) {
                printer.job = None;
            }
        }
    }

    /// History retention and spool cleanup once a job is terminal.
    fn after_terminal(&mut self, job_id: JobId) {
        for id in self.fabric.table.drop_for_job(job_id) {
            self.fabric.reap_notifier(id);
        }
        self.cleanup_terminal(job_id);
    }

    fn cleanup_terminal(&mut self, job_id: JobId) {
        let retain = self.config.job_history;
        if retain {
            if let Some(job) = self.jobs.get(&job_id) {
                let _ = self.spool.save_job(job);
            }
            self.prune_history();
        } else if let Some(job) = self.jobs.remove(&job_id) {
            let _ = self.spool.remove_job(&job);
        }
    }

    /// Keep at most `max_job_history` terminal jobs, oldest out first.
    fn prune_history(&mut self) {
        let limit = self.config.max_job_history;
        let mut terminal: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| j.id)
            .collect();
        if terminal.len() <= limit {
            return;
        }
        terminal.sort();
        let excess = terminal.len() - limit;
        for id in terminal.into_iter().take(excess) {
            if let Some(job) = self.jobs.remove(&id) {
                let _ = self.spool.remove_job(&job);
            }
        }
    }

    // -- job operations -------------------------------------------------

    fn abort_job(&mut self, job_id: JobId, message: &str) {
        let now = self.now();
        tracing::error!(job = %job_id, "{message}");
        if let Some(job) = self.jobs.get_mut(&job_id) {
            // Straight from pending: no printer to release.
            let _ = job.transition(JobState::Aborted, now);
        }
        self.emit(EventKind::JobStateChanged, None, Some(job_id), message.to_string());
        self.after_terminal(job_id);
    }

    /// Cancel from any non-terminal state. A processing job's chain gets
    /// SIGTERM now and SIGKILL after the grace period; the job is canceled
    /// immediately either way.
    pub fn cancel_job(&mut self, job_id: JobId, reactor: &mut Reactor) -> Result<(), SpoolError> {
        let now = self.now();
        let state = self
            .jobs
            .get(&job_id)
            .map(|j| j.state)
            .ok_or(SpoolError::NoSuchJob(job_id.0))?;
        if state.is_terminal() {
            return Err(SpoolError::BadTransition {
                from: state.to_string(),
                to: JobState::Canceled.to_string(),
            });
        }

        if let Some(pipeline) = self.pipelines.get_mut(&job_id) {
            pipeline.canceled = true;
            pipeline.signal(nix::sys::signal::Signal::SIGTERM);
            reactor.add_timer(Instant::now() + KILL_GRACE, TimerTag::KillPipeline(job_id));
        }

        let printer_name = self.jobs.get(&job_id).and_then(|j| j.printer.clone());
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.transition(JobState::Canceled, now)?;
        }
        self.emit(
            EventKind::JobStateChanged,
            printer_name.as_deref(),
            Some(job_id),
            format!("job {job_id} canceled"),
        );

        // Without a live chain the cleanup happens here; otherwise the reap
        // path finishes it.
        if !self.pipelines.contains_key(&job_id) {
            if let Some(name) = printer_name {
                self.release_printer(&name, now, reactor);
            }
            self.after_terminal(job_id);
        }
        Ok(())
    }

    /// SIGKILL escalation after a cancel's grace period.
    pub fn kill_pipeline(&mut self, job_id: JobId) {
        if let Some(pipeline) = self.pipelines.get_mut(&job_id) {
            tracing::warn!(job = %job_id, "chain ignored SIGTERM; killing");
            pipeline.signal(nix::sys::signal::Signal::SIGKILL);
        }
    }

    pub fn hold_job(&mut self, job_id: JobId, until: Option<u64>) -> Result<(), SpoolError> {
        let now = self.now();
        let job = self.jobs.get_mut(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
        job.transition(JobState::Held, now)?;
        job.hold_until = until;
        let _ = self.spool.save_job(self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?);
        self.emit(EventKind::JobStateChanged, None, Some(job_id), format!("job {job_id} held"));
        Ok(())
    }

    pub fn release_job(&mut self, job_id: JobId, reactor: &mut Reactor) -> Result<(), SpoolError> {
        let now = self.now();
        let job = self.jobs.get_mut(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
        job.transition(JobState::Pending, now)?;
        job.hold_until = None;
        let _ = self.spool.save_job(self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?);
        self.emit(EventKind::JobStateChanged, None, Some(job_id), format!("job {job_id} released"));
        reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
        Ok(())
    }

    /// Re-admit a terminal job kept in history.
    pub fn restart_job(&mut self, job_id: JobId, reactor: &mut Reactor) -> Result<(), SpoolError> {
        let job = self.jobs.get_mut(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
        if !job.is_terminal() {
            return Err(SpoolError::BadTransition {
                from: job.state.to_string(),
                to: JobState::Pending.to_string(),
            });
        }
        // Restart is re-admission, not a lifecycle transition.
        job.state = JobState::Pending;
        job.current_file = 0;
        job.sheets = 0;
        job.printer = None;
        job.time_at_processing = None;
        job.time_at_completion = None;
        let _ = self.spool.save_job(self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?);
        self.emit(EventKind::JobStateChanged, None, Some(job_id), format!("job {job_id} restarted"));
        reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
        Ok(())
    }

    /// Re-target a job that is not currently printing.
    pub fn move_job(&mut self, job_id: JobId, dest: &str) -> Result<(), SpoolError> {
        let new_dest = self.registry.resolve(dest)?.name.clone();
        let job = self.jobs.get_mut(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?;
        if job.state == JobState::Processing {
            return Err(SpoolError::BadTransition {
                from: "processing".to_string(),
                to: format!("moved to {new_dest}"),
            });
        }
        job.dest = new_dest;
        let _ = self.spool.save_job(self.jobs.get(&job_id).ok_or(SpoolError::NoSuchJob(job_id.0))?);
        self.emit(
            EventKind::JobConfigChanged,
            Some(dest),
            Some(job_id),
            format!("job {job_id} moved to {dest}"),
        );
        Ok(())
    }

    // -- printer operations ---------------------------------------------

    /// Stop a printer. An active chain is torn down and its job requeued.
    pub fn pause_printer(
        &mut self,
        name: &str,
        message: &str,
        reactor: &mut Reactor,
    ) -> Result<(), SpoolError> {
        let now = self.now();
        let history = self.config.max_job_history;
        let bound = {
            let printer =
                self.registry.get_mut(name).ok_or_else(|| SpoolError::NoSuchDestination(name.to_string()))?;
            if !printer.reasons.iter().any(|r| r.eq_ignore_ascii_case("paused")) {
                printer.reasons.push(SmolStr::new("paused"));
            }
            printer.set_state(PrinterState::Stopped, message, now, history);
            printer.job
        };
        if let Some(job_id) = bound {
            if let Some(pipeline) = self.pipelines.get_mut(&job_id) {
                pipeline.requeue = true;
                pipeline.signal(nix::sys::signal::Signal::SIGTERM);
                reactor.add_timer(Instant::now() + KILL_GRACE, TimerTag::KillPipeline(job_id));
            }
        }
        self.emit(EventKind::PrinterStopped, Some(name), None, format!("printer {name} paused"));
        self.emit(
            EventKind::PrinterStateChanged,
            Some(name),
            None,
            format!("printer {name} paused"),
        );
        Ok(())
    }

    /// Start a stopped printer and requeue its stopped jobs.
    pub fn resume_printer(&mut self, name: &str, reactor: &mut Reactor) -> Result<(), SpoolError> {
        let now = self.now();
        let history = self.config.max_job_history;
        let printer_name = {
            let printer =
                self.registry.get_mut(name).ok_or_else(|| SpoolError::NoSuchDestination(name.to_string()))?;
            printer
                .reasons
                .retain(|r| !r.eq_ignore_ascii_case("paused") && !r.starts_with("backend-exit-"));
            printer.set_state(PrinterState::Idle, "", now, history);
            printer.name.clone()
        };

        for job in self.jobs.values_mut() {
            if job.state == JobState::Stopped && job.dest.eq_ignore_ascii_case(&printer_name) {
                let _ = job.transition(JobState::Pending, now);
            }
        }
        self.emit(
            EventKind::PrinterStateChanged,
            Some(name),
            None,
            format!("printer {name} resumed"),
        );
        reactor.update_timer(Instant::now(), TimerTag::SelectJobs);
        Ok(())
    }

    pub fn set_accepting(&mut self, name: &str, accepting: bool) -> Result<(), SpoolError> {
        let printer =
            self.registry.get_mut(name).ok_or_else(|| SpoolError::NoSuchDestination(name.to_string()))?;
        printer.accepting = accepting;
        self.emit(
            EventKind::PrinterConfigChanged,
            Some(name),
            None,
            format!("printer {name} {}", if accepting { "accepting" } else { "rejecting" }),
        );
        Ok(())
    }

    // -- timers ---------------------------------------------------------

    /// Timer dispatch from the daemon loop.
    pub fn handle_timer(&mut self, tag: TimerTag, reactor: &mut Reactor) {
        match tag {
            TimerTag::SelectJobs | TimerTag::RetryJob(_) => self.select_next_work(reactor),
            TimerTag::KillPipeline(job_id) => self.kill_pipeline(job_id),
            TimerTag::SubscriptionExpiry => {
                let now = self.now();
                for id in self.fabric.table.expire(now) {
                    self.fabric.reap_notifier(id);
                    tracing::debug!(subscription = %id, "lease expired");
                }
            }
            TimerTag::NetifRefresh => {}
        }
    }

    /// Shutdown: tear down chains and requeue their jobs.
    pub fn stop_all_jobs(&mut self) {
        let ids: Vec<JobId> = self.pipelines.keys().copied().collect();
        for job_id in ids {
            if let Some(pipeline) = self.pipelines.get_mut(&job_id) {
                pipeline.requeue = true;
                pipeline.signal(nix::sys::signal::Signal::SIGTERM);
            }
            if let Some(pipeline) = self.pipelines.remove(&job_id) {
                let _ = pipeline.reap();
            }
            self.finish_requeued(job_id);
        }
        self.fabric.stop_all_notifiers();
    }

    // -- helpers --------------------------------------------------------

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            server_bin: self.config.server_bin(),
            server_root: self.config.server_root(),
            temp_dir: self.config.temp_dir(),
            rip_cache: self.config.rip_cache.clone(),
            language: self.config.default_language.clone(),
            charset: self.config.default_charset.clone(),
            run_as: self.config.spool_owner(),
        }
    }

    pub fn active_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Seed the job-id counter from the spool directory.
    pub fn reseed_job_ids(&mut self) -> Result<(), SpoolError> {
        self.next_job_id = self
            .spool
            .next_job_id()
            .map_err(|e| SpoolError::ConfigParse { file: "spool".to_string(), detail: e.to_string() })?;
        Ok(())
    }
}

static FALLBACK_POLICY: std::sync::LazyLock<Policy> =
    std::sync::LazyLock::new(|| Policy::stock_default(false));

fn spool_io(err: press_storage::SpoolDirError) -> SpoolError {
    SpoolError::Io(std::io::Error::other(err))
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
