// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline executor: filter chains and back-ends as child processes.
//!
//! N filters plus an optional back-end are connected stdout→stdin; every
//! child shares one status pipe as stderr, whose read end the reactor
//! watches. EOF on the status pipe means the chain has exited and can be
//! reaped into a single final status.

use crate::status::{parse_status_line, StatusUpdate};
use press_core::{FilterChain, Job, JobId, Printer, SpoolError};
use smol_str::SmolStr;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Build the shared status pipe: a blocking write end for the children, a
/// nonblocking read end for the reactor.
fn status_pipe() -> std::io::Result<(mio::unix::pipe::Sender, mio::unix::pipe::Receiver)> {
    let (sender, receiver) = mio::unix::pipe::new()?;
    sender.set_nonblocking(false)?;
    Ok((sender, receiver))
}

/// Ambient settings every spawned child sees.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub server_bin: PathBuf,
    pub server_root: PathBuf,
    pub temp_dir: PathBuf,
    pub rip_cache: String,
    pub language: String,
    pub charset: String,
    /// Drop privileges to this uid/gid in children when set
    pub run_as: Option<(u32, u32)>,
}

/// One child of the chain.
struct Stage {
    program: String,
    is_backend: bool,
    child: Child,
}

/// Final status of a reaped chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    /// A filter exited non-zero: permanent failure, abort the job
    FilterFailed { program: String, status: i32 },
    /// The back-end exited non-zero: transient, apply the error policy
    BackendFailed { status: i32 },
}

/// A running chain bound to one job.
pub struct PipelineHandle {
    pub job: JobId,
    stages: Vec<Stage>,
    status: mio::unix::pipe::Receiver,
    buffer: Vec<u8>,
    /// Set when a cancel signalled the chain; the reap outcome is moot
    pub canceled: bool,
    /// Set when the chain is torn down to requeue the job (printer pause,
    /// shutdown) rather than fail it
    pub requeue: bool,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle").finish_non_exhaustive()
    }
}

/// How the chain should be built for a given printer.
fn device_path(device_uri: &str) -> Option<&str> {
    device_uri.strip_prefix("file:")
}

fn backend_program(server_bin: &Path, device_uri: &str) -> PathBuf {
    let scheme = device_uri.split(':').next().unwrap_or("file");
    server_bin.join("backend").join(scheme)
}

/// Serialize the job's option dictionary for child argv. Values with
/// whitespace are single-quoted the way System V interfaces expect.
pub fn options_string(job: &Job) -> String {
    let mut out = String::new();
    for (key, value) in &job.options {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(key);
        out.push('=');
        if value.contains(char::is_whitespace) {
            out.push('\'');
            out.push_str(value);
            out.push('\'');
        } else {
            out.push_str(value);
        }
    }
    out
}

/// The System-V style argument vector every filter and back-end receives:
/// printer, job id, user, title, copies, options, and (first stage only)
/// the spool file path.
pub fn build_argv(job: &Job, printer: &Printer, file_path: Option<&Path>) -> Vec<String> {
    let copies = job.options.get("copies").cloned().unwrap_or_else(|| "1".to_string());
    let mut argv = vec![
        printer.name.to_string(),
        job.id.to_string(),
        job.user.clone(),
        job.title.clone(),
        copies,
        options_string(job),
    ];
    if let Some(path) = file_path {
        argv.push(path.display().to_string());
    }
    argv
}

/// Environment for the chain's children.
pub fn build_envp(
    job: &Job,
    printer: &Printer,
    content_type: &str,
    cfg: &PipelineConfig,
) -> Vec<(String, String)> {
    vec![
        ("PATH".to_string(), "/bin:/usr/bin".to_string()),
        ("SOFTWARE".to_string(), "press/0.3".to_string()),
        ("TZ".to_string(), std::env::var("TZ").unwrap_or_else(|_| "GMT".to_string())),
        ("USER".to_string(), job.user.clone()),
        ("CHARSET".to_string(), cfg.charset.clone()),
        ("LANG".to_string(), cfg.language.clone()),
        ("CONTENT_TYPE".to_string(), content_type.to_string()),
        ("DEVICE_URI".to_string(), printer.device_uri.clone()),
        (
            "PPD".to_string(),
            cfg.server_root.join("ppd").join(format!("{}.ppd", printer.name)).display().to_string(),
        ),
        ("PRINTER".to_string(), printer.name.to_string()),
        ("RIP_MAX_CACHE".to_string(), cfg.rip_cache.clone()),
        ("SERVER_ROOT".to_string(), cfg.server_root.display().to_string()),
        ("TMPDIR".to_string(), cfg.temp_dir.display().to_string()),
    ]
}

/// Resolve a filter's program path; bare names live under
/// `server_bin/filter/`.
fn filter_program(server_bin: &Path, program: &str) -> PathBuf {
    if program.starts_with('/') {
        PathBuf::from(program)
    } else {
        server_bin.join("filter").join(program)
    }
}

impl PipelineHandle {
    /// Spawn the chain for the job's current spool file.
    ///
    /// Remote printers stream the file straight to the back-end; `file:`
    /// devices are written by the last filter with no back-end appended.
    /// Returns None when the chain needs no processes at all (raw file to a
    /// `file:` device) — the caller copies the bytes itself.
    pub fn spawn(
        job: &Job,
        printer: &Printer,
        chain: &FilterChain,
        spool_file: &Path,
        cfg: &PipelineConfig,
    ) -> Result<Option<PipelineHandle>, SpoolError> {
        let file_device = device_path(&printer.device_uri);

        // Program list, in pipe order.
        let mut programs: Vec<(PathBuf, String, bool)> = Vec::new();
        if !printer.is_remote() {
            for filter in &chain.filters {
                let path = filter_program(&cfg.server_bin, &filter.program);
                programs.push((path, filter.program.clone(), false));
            }
        }
        if file_device.is_none() {
            let path = backend_program(&cfg.server_bin, &printer.device_uri);
            programs.push((path, printer.device_uri.clone(), true));
        }
        if programs.is_empty() {
            return Ok(None);
        }

        let content_type = job
            .files
            .get(job.current_file)
            .map(|f| f.mime_type.as_str())
            .unwrap_or("application/octet-stream");
        let envp = build_envp(job, printer, content_type, cfg);
        let (status_tx, status_rx) = status_pipe()?;

        let mut stages: Vec<Stage> = Vec::new();
        let mut upstream: Option<std::process::ChildStdout> = None;
        let last = programs.len() - 1;

        for (index, (path, display, is_backend)) in programs.iter().enumerate() {
            let file_arg = if index == 0 { Some(spool_file) } else { None };
            let argv = build_argv(job, printer, file_arg);

            let mut command = Command::new(path);
            command.args(&argv[1..]);
            // argv[0] carries the printer name for filters and the device
            // URI for the back-end, per the legacy driver interface.
            command.arg0(if *is_backend { display.clone() } else { argv[0].clone() });
            command.env_clear();
            command.envs(envp.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            if let Some((uid, gid)) = cfg.run_as {
                command.uid(uid).gid(gid);
            }

            command.stdin(match upstream.take() {
                Some(out) => Stdio::from(out),
                None => Stdio::null(),
            });
            command.stderr(Stdio::from(status_tx.as_fd().try_clone_to_owned()?));
            command.stdout(if index == last {
                match file_device {
                    Some(path) => {
                        let sink = std::fs::OpenOptions::new()
                            .write(true)
                            .create(true)
                            .truncate(true)
                            .open(path)?;
                        Stdio::from(sink)
                    }
                    None => Stdio::null(),
                }
            } else {
                Stdio::piped()
            });

            let mut child = command.spawn().map_err(|e| SpoolError::ChildSpawnFailed {
                program: display.clone(),
                detail: e.to_string(),
            })?;
            upstream = child.stdout.take();
            tracing::debug!(
                job = %job.id,
                program = %path.display(),
                pid = child.id(),
                backend = is_backend,
                "pipeline stage started"
            );
            stages.push(Stage { program: display.clone(), is_backend: *is_backend, child });
        }

        drop(status_tx);
        Ok(Some(PipelineHandle {
            job: job.id,
            stages,
            status: status_rx,
            buffer: Vec::new(),
            canceled: false,
            requeue: false,
        }))
    }

    pub fn status_fd(&self) -> RawFd {
        self.status.as_raw_fd()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.child.id()).collect()
    }

    /// Drain the status pipe, returning parsed records and whether EOF was
    /// reached. Partial lines stay buffered for the next wakeup.
    pub fn read_status(&mut self) -> (Vec<StatusUpdate>, bool) {
        let mut eof = false;
        let mut chunk = [0u8; 4096];
        loop {
            match self.status.read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    eof = true;
                    break;
                }
            }
        }

        let mut updates = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let trimmed = line.trim_end_matches('\r');
            if !trimmed.is_empty() {
                updates.push(parse_status_line(trimmed));
            }
        }
        if eof && !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            updates.push(parse_status_line(rest.trim_end()));
        }
        (updates, eof)
    }

    /// Send a signal to every child still in the chain.
    pub fn signal(&mut self, signal: nix::sys::signal::Signal) {
        for stage in &self.stages {
            let pid = nix::unistd::Pid::from_raw(stage.child.id() as i32);
            if let Err(e) = nix::sys::signal::kill(pid, signal) {
                tracing::debug!(pid = %pid, error = %e, "signal delivery failed");
            }
        }
    }

    /// Wait for every child and collapse their exit codes into the final
    /// status: a non-zero back-end wins (retry), then any non-zero filter
    /// (abort), else success.
    pub fn reap(mut self) -> PipelineOutcome {
        let mut backend_status = 0;
        let mut filter_failure: Option<(String, i32)> = None;

        for stage in &mut self.stages {
            let status = match stage.child.wait() {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!(program = %stage.program, error = %e, "wait failed");
                    1
                }
            };
            tracing::debug!(program = %stage.program, status, "pipeline stage exited");
            if stage.is_backend {
                backend_status = status;
            } else if status != 0 && filter_failure.is_none() {
                filter_failure = Some((stage.program.clone(), status));
            }
        }

        if backend_status != 0 {
            PipelineOutcome::BackendFailed { status: backend_status }
        } else if let Some((program, status)) = filter_failure {
            PipelineOutcome::FilterFailed { program, status }
        } else {
            PipelineOutcome::Success
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(1))
}

/// Raw copy for chains with no processes: the spool file goes straight to
/// the `file:` device.
pub fn copy_raw(spool_file: &Path, device_uri: &str) -> Result<(), SpoolError> {
    let Some(path) = device_path(device_uri) else {
        return Err(SpoolError::ChildSpawnFailed {
            program: device_uri.to_string(),
            detail: "no backend for raw chain".to_string(),
        });
    };
    std::fs::copy(spool_file, path)?;
    Ok(())
}

/// The reason token recorded while a printer waits out a back-end failure.
pub fn backend_failure_reason(status: i32) -> SmolStr {
    SmolStr::new(format!("backend-exit-{status}"))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
