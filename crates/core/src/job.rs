// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and state machine.

use crate::error::SpoolError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique integer id for a job, monotonic for the process lifetime and
/// reseeded to `max(existing) + 1` from the spool directory on restart.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u32);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default priority for submitted jobs.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Waiting for a printer
    Pending,
    /// Held back from scheduling until released
    Held,
    /// Bound to a printer with an active filter chain
    Processing,
    /// Back-end failed; waiting on the printer's error policy
    Stopped,
    /// Canceled by request (terminal)
    Canceled,
    /// Filter failure (terminal)
    Aborted,
    /// Printed successfully (terminal)
    Completed,
}

crate::simple_display! {
    JobState {
        Pending => "pending",
        Held => "held",
        Processing => "processing",
        Stopped => "stopped",
        Canceled => "canceled",
        Aborted => "aborted",
        Completed => "completed",
    }
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Canceled | JobState::Aborted | JobState::Completed)
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    ///
    /// Cancellation is allowed from any non-terminal state; terminal states
    /// admit no exits except restart, which is handled by re-admission and
    /// never by a direct transition.
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        if self == to {
            return false;
        }
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, Canceled) => true,
            (Pending, Held) | (Held, Pending) => true,
            (Pending, Processing) => true,
            (Processing, Completed) | (Processing, Stopped) | (Processing, Aborted) => true,
            (Stopped, Pending) | (Stopped, Aborted) => true,
            _ => false,
        }
    }
}

/// One submitted document: the on-disk spool file plus its source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolFile {
    pub filename: String,
    pub mime_type: SmolStr,
}

/// Configuration for admitting a new job
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub user: String,
    pub dest: SmolStr,
    pub title: String,
    pub priority: u8,
    pub files: Vec<SpoolFile>,
    pub options: IndexMap<SmolStr, String>,
}

impl JobConfig {
    pub fn builder(id: JobId, user: impl Into<String>, dest: impl Into<SmolStr>) -> JobConfigBuilder {
        JobConfigBuilder {
            id,
            user: user.into(),
            dest: dest.into(),
            title: String::new(),
            priority: DEFAULT_PRIORITY,
            files: Vec::new(),
            options: IndexMap::new(),
        }
    }
}

pub struct JobConfigBuilder {
    id: JobId,
    user: String,
    dest: SmolStr,
    title: String,
    priority: u8,
    files: Vec<SpoolFile>,
    options: IndexMap<SmolStr, String>,
}

impl JobConfigBuilder {
    crate::setters! {
        into {
            title: String,
        }
        set {
            priority: u8,
            files: Vec<SpoolFile>,
            options: IndexMap<SmolStr, String>,
        }
    }

    pub fn file(mut self, filename: impl Into<String>, mime_type: impl Into<SmolStr>) -> Self {
        self.files.push(SpoolFile { filename: filename.into(), mime_type: mime_type.into() });
        self
    }

    pub fn build(self) -> JobConfig {
        let title = if self.title.is_empty() {
            format!("{}-{}", self.dest, self.id)
        } else {
            self.title
        };
        JobConfig {
            id: self.id,
            user: self.user,
            dest: self.dest,
            title,
            priority: self.priority.min(100),
            files: self.files,
            options: self.options,
        }
    }
}

/// A print job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user: String,
    /// Destination name as submitted (printer or class)
    pub dest: SmolStr,
    pub title: String,
    /// 0–100, higher prints sooner
    pub priority: u8,
    pub state: JobState,
    pub files: Vec<SpoolFile>,
    /// Index of the file currently (or next) being filtered
    pub current_file: usize,
    /// Printer servicing the job while processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<SmolStr>,
    /// Cumulative sheets reported via PAGE: lines, across all files
    pub sheets: u32,
    /// Job size in kilobytes, for quota accounting
    pub k_octets: u32,
    /// Option dictionary merged from printer defaults and request overrides.
    /// Immutable once the job leaves Pending.
    pub options: IndexMap<SmolStr, String>,
    /// Most recent raw line read from the status pipe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    /// Epoch seconds of the hold-until release, when held with a deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_until: Option<u64>,
    pub time_at_creation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_at_processing: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_at_completion: Option<u64>,
}

impl Job {
    pub fn new(config: JobConfig, now: u64) -> Self {
        Self {
            id: config.id,
            user: config.user,
            dest: config.dest,
            title: config.title,
            priority: config.priority,
            state: JobState::Pending,
            files: config.files,
            current_file: 0,
            printer: None,
            sheets: 0,
            k_octets: 0,
            options: config.options,
            status_line: None,
            hold_until: None,
            time_at_creation: now,
            time_at_processing: None,
            time_at_completion: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a new state, stamping the processing/completion times.
    pub fn transition(&mut self, to: JobState, now: u64) -> Result<(), SpoolError> {
        if !self.state.can_transition_to(to) {
            return Err(SpoolError::BadTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        match to {
            JobState::Processing => {
                if self.time_at_processing.is_none() {
                    self.time_at_processing = Some(now);
                }
            }
            JobState::Completed | JobState::Canceled | JobState::Aborted => {
                self.time_at_completion = Some(now);
                self.printer = None;
            }
            _ => {}
        }
        self.state = to;
        Ok(())
    }

    /// Timestamp used by the quota window: completion, else processing,
    /// else creation.
    pub fn quota_time(&self) -> u64 {
        self.time_at_completion
            .or(self.time_at_processing)
            .unwrap_or(self.time_at_creation)
    }

    /// The spool file the pipeline should run next, if any remain.
    pub fn next_file(&self) -> Option<&SpoolFile> {
        self.files.get(self.current_file)
    }

    pub fn has_more_files(&self) -> bool {
        self.current_file < self.files.len()
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            user: String = "alice",
            dest: SmolStr = "lp1",
            title: String = "lp1-1",
        }
        set {
            id: JobId = JobId(1),
            priority: u8 = DEFAULT_PRIORITY,
            state: JobState = JobState::Pending,
            files: Vec<SpoolFile> = vec![SpoolFile {
                filename: "d00001-001".to_string(),
                mime_type: SmolStr::new("text/plain"),
            }],
            current_file: usize = 0,
            sheets: u32 = 0,
            k_octets: u32 = 1,
            options: IndexMap<SmolStr, String> = IndexMap::new(),
            time_at_creation: u64 = 1_000_000,
        }
        option {
            printer: SmolStr = None,
            status_line: String = None,
            hold_until: u64 = None,
            time_at_processing: u64 = None,
            time_at_completion: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
