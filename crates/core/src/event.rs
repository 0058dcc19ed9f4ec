// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event kinds, masks, and records for the notification fabric.

use crate::job::JobState;
use crate::printer::PrinterState;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Lifecycle events exposed over the wire and in subscriptions.conf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    PrinterRestarted,
    PrinterShutdown,
    PrinterStopped,
    PrinterFinishingsChanged,
    PrinterMediaChanged,
    PrinterAdded,
    PrinterDeleted,
    PrinterModified,
    PrinterQueueOrderChanged,
    PrinterStateChanged,
    PrinterConfigChanged,
    PrinterChanged,
    JobCreated,
    JobCompleted,
    JobStopped,
    JobConfigChanged,
    JobProgress,
    JobStateChanged,
    ServerRestarted,
    ServerStarted,
    ServerStopped,
    ServerAudit,
}

crate::simple_display! {
    EventKind {
        PrinterRestarted => "printer-restarted",
        PrinterShutdown => "printer-shutdown",
        PrinterStopped => "printer-stopped",
        PrinterFinishingsChanged => "printer-finishings-changed",
        PrinterMediaChanged => "printer-media-changed",
        PrinterAdded => "printer-added",
        PrinterDeleted => "printer-deleted",
        PrinterModified => "printer-modified",
        PrinterQueueOrderChanged => "printer-queue-order-changed",
        PrinterStateChanged => "printer-state-changed",
        PrinterConfigChanged => "printer-config-changed",
        PrinterChanged => "printer-changed",
        JobCreated => "job-created",
        JobCompleted => "job-completed",
        JobStopped => "job-stopped",
        JobConfigChanged => "job-config-changed",
        JobProgress => "job-progress",
        JobStateChanged => "job-state-changed",
        ServerRestarted => "server-restarted",
        ServerStarted => "server-started",
        ServerStopped => "server-stopped",
        ServerAudit => "server-audit",
    }
}

impl EventKind {
    pub const ALL: [EventKind; 22] = [
        EventKind::PrinterRestarted,
        EventKind::PrinterShutdown,
        EventKind::PrinterStopped,
        EventKind::PrinterFinishingsChanged,
        EventKind::PrinterMediaChanged,
        EventKind::PrinterAdded,
        EventKind::PrinterDeleted,
        EventKind::PrinterModified,
        EventKind::PrinterQueueOrderChanged,
        EventKind::PrinterStateChanged,
        EventKind::PrinterConfigChanged,
        EventKind::PrinterChanged,
        EventKind::JobCreated,
        EventKind::JobCompleted,
        EventKind::JobStopped,
        EventKind::JobConfigChanged,
        EventKind::JobProgress,
        EventKind::JobStateChanged,
        EventKind::ServerRestarted,
        EventKind::ServerStarted,
        EventKind::ServerStopped,
        EventKind::ServerAudit,
    ];

    fn bit(self) -> u32 {
        1 << (Self::ALL.iter().position(|k| *k == self).unwrap_or(31))
    }

    pub fn parse(name: &str) -> Option<EventKind> {
        Self::ALL.iter().copied().find(|k| k.to_string() == name)
    }

    pub fn is_printer_event(self) -> bool {
        self.to_string().starts_with("printer-")
    }

    pub fn is_job_event(self) -> bool {
        self.to_string().starts_with("job-")
    }
}

/// A set of event kinds; the wire name `all` selects every bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);

    pub fn all() -> EventMask {
        EventKind::ALL.iter().fold(EventMask::NONE, |m, k| m.with(*k))
    }

    pub fn of(kinds: &[EventKind]) -> EventMask {
        kinds.iter().fold(EventMask::NONE, |m, k| m.with(*k))
    }

    pub fn with(self, kind: EventKind) -> EventMask {
        EventMask(self.0 | kind.bit())
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a space-separated event-name list (`all` wins outright).
    pub fn parse_list(names: &str) -> EventMask {
        let mut mask = EventMask::NONE;
        for name in names.split_whitespace() {
            if name == "all" {
                return EventMask::all();
            }
            if let Some(kind) = EventKind::parse(name) {
                mask = mask.with(kind);
            }
        }
        mask
    }

    /// The wire spelling: `all`, or the selected names in declaration order.
    pub fn names(self) -> String {
        if self == EventMask::all() {
            return "all".to_string();
        }
        EventKind::ALL
            .iter()
            .filter(|k| self.contains(**k))
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Printer attributes captured at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterSnapshot {
    pub name: SmolStr,
    pub state: PrinterState,
    pub accepting: bool,
    pub reasons: Vec<SmolStr>,
}

/// Job attributes captured at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: crate::job::JobId,
    pub state: JobState,
    pub state_reason: SmolStr,
}

/// The reason token derived from a job state and its surroundings.
pub fn job_state_reason(
    state: JobState,
    printer_stopped: bool,
    hold_until_specified: bool,
) -> &'static str {
    match state {
        JobState::Pending if printer_stopped => "printer-stopped",
        JobState::Pending => "none",
        JobState::Held if hold_until_specified => "job-hold-until-specified",
        JobState::Held => "job-incoming",
        JobState::Processing => "job-printing",
        JobState::Stopped => "job-stopped",
        JobState::Canceled => "job-canceled-by-user",
        JobState::Aborted => "aborted-by-system",
        JobState::Completed => "job-completed-successfully",
    }
}

/// One delivered event, scoped to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Sequence id within the owning subscription, strictly consecutive
    pub sequence: u64,
    pub time: u64,
    pub kind: EventKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<PrinterSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSnapshot>,
    /// Opaque blob copied from the subscription
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_data: Vec<u8>,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
