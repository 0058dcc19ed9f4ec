// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Printer and class model.
//!
//! A class is a printer whose capability bits include [`CapabilitySet::CLASS`];
//! it owns an ordered member list and a round-robin cursor. Members are held
//! by name and resolved through the registry, never by back-reference.

use crate::constraint::ConstraintSet;
use crate::job::JobId;
use crate::options::OptionTable;
use crate::JobState;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::VecDeque;

/// Printer capability/type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(pub u32);

impl CapabilitySet {
    pub const CLASS: CapabilitySet = CapabilitySet(1 << 0);
    pub const IMPLICIT: CapabilitySet = CapabilitySet(1 << 1);
    pub const REMOTE: CapabilitySet = CapabilitySet(1 << 2);
    pub const COLOR: CapabilitySet = CapabilitySet(1 << 3);
    pub const DUPLEX: CapabilitySet = CapabilitySet(1 << 4);
    pub const STAPLE: CapabilitySet = CapabilitySet(1 << 5);
    pub const COLLATE: CapabilitySet = CapabilitySet(1 << 6);
    pub const PUNCH: CapabilitySet = CapabilitySet(1 << 7);

    pub fn contains(self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CapabilitySet) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CapabilitySet) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for CapabilitySet {
    type Output = CapabilitySet;

    fn bitor(self, rhs: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 | rhs.0)
    }
}

/// Printer scheduling states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

crate::simple_display! {
    PrinterState {
        Idle => "idle",
        Processing => "processing",
        Stopped => "stopped",
    }
}

/// What the scheduler does when a back-end fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Requeue the job and leave the printer idle
    RetryJob,
    /// Stop the printer, keep the job pending
    #[default]
    StopPrinter,
    /// Abort the job, leave the printer idle
    AbortJob,
}

crate::simple_display! {
    ErrorPolicy {
        RetryJob => "retry-job",
        StopPrinter => "stop-printer",
        AbortJob => "abort-job",
    }
}

impl ErrorPolicy {
    pub fn parse(s: &str) -> Option<ErrorPolicy> {
        match s {
            "retry-job" => Some(ErrorPolicy::RetryJob),
            "stop-printer" => Some(ErrorPolicy::StopPrinter),
            "abort-job" => Some(ErrorPolicy::AbortJob),
            _ => None,
        }
    }
}

/// Per-printer user access list. AllowUser and DenyUser are mutually
/// exclusive within one printer block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserAccess {
    #[default]
    Everyone,
    Allow(Vec<String>),
    Deny(Vec<String>),
}

impl UserAccess {
    pub fn permits(&self, user: &str) -> bool {
        match self {
            UserAccess::Everyone => true,
            UserAccess::Allow(list) => list.iter().any(|u| u.eq_ignore_ascii_case(user)),
            UserAccess::Deny(list) => !list.iter().any(|u| u.eq_ignore_ascii_case(user)),
        }
    }
}

/// One entry in the printer's bounded state-history ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: PrinterState,
    pub message: String,
    pub reasons: Vec<SmolStr>,
    pub accepting: bool,
    pub time: u64,
    pub sequence: u64,
}

/// Quota parameters carried by each printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Rolling window in seconds; 0 disables enforcement
    pub period: u64,
    pub page_limit: u32,
    pub k_limit: u32,
}

impl QuotaLimits {
    pub fn enforced(&self) -> bool {
        self.period > 0 && (self.page_limit > 0 || self.k_limit > 0)
    }
}

/// A named output destination (printer or class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub name: SmolStr,
    pub info: String,
    pub location: String,
    pub device_uri: String,
    pub state: PrinterState,
    pub state_message: String,
    /// Reason tokens attached by STATE: updates; case-insensitive, no dupes
    pub reasons: Vec<SmolStr>,
    /// Epoch seconds of the last state change
    pub state_time: u64,
    /// Monotonically growing counter bumped with every state change
    pub state_sequence: u64,
    pub accepting: bool,
    pub capabilities: CapabilitySet,
    /// PPD-style option table with marked choices
    pub options: OptionTable,
    /// Forbidden option combinations and their resolvers
    #[serde(default, skip_serializing_if = "ConstraintSet::is_empty")]
    pub constraints: ConstraintSet,
    pub access: UserAccess,
    pub quota: QuotaLimits,
    /// (start, end) banner pages
    pub job_sheets: (String, String),
    pub op_policy: SmolStr,
    pub error_policy: ErrorPolicy,
    /// Job currently being serviced; None unless state is Processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
    /// Ordered member names (classes only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<SmolStr>,
    /// Round-robin cursor: index of the last member used, or None before
    /// the first selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_member: Option<usize>,
    /// Recent state snapshots, newest last
    #[serde(skip)]
    pub history: VecDeque<StateSnapshot>,
}

impl Printer {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        let name = name.into();
        Self {
            info: name.to_string(),
            location: String::new(),
            device_uri: "file:/dev/null".to_string(),
            state: PrinterState::Stopped,
            state_message: String::new(),
            reasons: Vec::new(),
            state_time: 0,
            state_sequence: 0,
            accepting: false,
            capabilities: CapabilitySet::default(),
            options: OptionTable::default(),
            constraints: ConstraintSet::default(),
            access: UserAccess::Everyone,
            quota: QuotaLimits::default(),
            job_sheets: ("none".to_string(), "none".to_string()),
            op_policy: SmolStr::new("default"),
            error_policy: ErrorPolicy::default(),
            job: None,
            members: Vec::new(),
            last_member: None,
            history: VecDeque::new(),
            name,
        }
    }

    /// Create a class shell over the given members.
    pub fn new_class(name: impl Into<SmolStr>, members: Vec<SmolStr>) -> Self {
        let mut class = Printer::new(name);
        class.capabilities.insert(CapabilitySet::CLASS);
        class.members = members;
        class
    }

    /// Stub for a remote printer referenced but not locally configured.
    pub fn new_remote_stub(name: impl Into<SmolStr>) -> Self {
        let mut p = Printer::new(name);
        p.capabilities.insert(CapabilitySet::REMOTE);
        p
    }

    pub fn is_class(&self) -> bool {
        self.capabilities.contains(CapabilitySet::CLASS)
    }

    pub fn is_implicit(&self) -> bool {
        self.capabilities.contains(CapabilitySet::IMPLICIT)
    }

    pub fn is_remote(&self) -> bool {
        self.capabilities.contains(CapabilitySet::REMOTE)
    }

    /// The MIME vertex all of this printer's filter edges sink into.
    pub fn filetype(&self) -> SmolStr {
        SmolStr::new(format!("printer/{}", self.name))
    }

    /// Record a state change atomically with the sequence counter and
    /// push a snapshot onto the bounded history ring.
    pub fn set_state(&mut self, state: PrinterState, message: &str, now: u64, max_history: usize) {
        self.state = state;
        if !message.is_empty() {
            self.state_message = message.to_string();
        }
        self.state_time = now;
        self.state_sequence += 1;

        if max_history > 0 {
            if self.history.len() == max_history {
                self.history.pop_front();
            }
            self.history.push_back(StateSnapshot {
                state: self.state,
                message: self.state_message.clone(),
                reasons: self.reasons.clone(),
                accepting: self.accepting,
                time: now,
                sequence: self.state_sequence,
            });
        }
    }

    /// Whether this printer can take a job right now. Remote printers queue
    /// upstream, so they count as available whenever not already printing.
    pub fn is_available(&self) -> bool {
        if self.job.is_some() {
            return false;
        }
        match self.state {
            PrinterState::Idle => true,
            PrinterState::Processing | PrinterState::Stopped => self.is_remote(),
        }
    }

    /// Pairing invariant: a processing printer is bound to a processing job
    /// and vice versa (spec'd as a runtime assertion, checked in tests and
    /// by the scheduler after every transition).
    pub fn binding_consistent(&self, job_state: Option<JobState>) -> bool {
        match (self.state, self.job) {
            (PrinterState::Processing, Some(_)) => job_state == Some(JobState::Processing),
            (PrinterState::Processing, None) => false,
            (_, Some(_)) => job_state.is_some(),
            (_, None) => true,
        }
    }
}

crate::builder! {
    pub struct PrinterBuilder => Printer {
        into {
            name: SmolStr = "lp1",
            info: String = "Test Printer",
            location: String = "",
            device_uri: String = "file:/dev/null",
            state_message: String = "",
            op_policy: SmolStr = "default",
        }
        set {
            state: PrinterState = PrinterState::Idle,
            reasons: Vec<SmolStr> = Vec::new(),
            state_time: u64 = 0,
            state_sequence: u64 = 0,
            accepting: bool = true,
            capabilities: CapabilitySet = CapabilitySet::default(),
            options: OptionTable = OptionTable::default(),
            constraints: ConstraintSet = ConstraintSet::default(),
            access: UserAccess = UserAccess::Everyone,
            quota: QuotaLimits = QuotaLimits::default(),
            job_sheets: (String, String) = ("none".to_string(), "none".to_string()),
            error_policy: ErrorPolicy = ErrorPolicy::default(),
            members: Vec<SmolStr> = Vec::new(),
        }
        option {
            job: JobId = None,
            last_member: usize = None,
        }
        computed {
            history: VecDeque<StateSnapshot> = VecDeque::new(),
        }
    }
}

#[cfg(test)]
#[path = "printer_tests.rs"]
mod tests;
