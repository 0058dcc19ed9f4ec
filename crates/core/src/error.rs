// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the spooler.
//!
//! Every recoverable failure in the daemon maps to one of these kinds; the
//! reactor dispatch layer is the outermost propagation boundary and never
//! unwinds past it.

use thiserror::Error;

/// Spooler-wide error kinds.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A persisted config block could not be parsed; the block is skipped.
    #[error("config parse error in {file}: {detail}")]
    ConfigParse { file: String, detail: String },

    /// A global resource cap was hit; the creating operation fails.
    #[error("resource limit reached: {0}")]
    ResourceExhausted(String),

    /// The operation policy denied the request.
    #[error("operation not permitted for user {user}")]
    PolicyDenied { user: String },

    /// Admitting the job would cross the destination's quota.
    #[error("quota exceeded for user {user} on {dest}")]
    QuotaExceeded { user: String, dest: String },

    /// No filter chain exists from the document type to the printer type.
    #[error("no filter chain from {src} to {dst}")]
    BadFileType { src: String, dst: String },

    /// A spool path failed the symlink/hardlink/permission checks.
    #[error("unsafe file access: {0}")]
    FsUnsafe(String),

    /// fork/exec of a filter or back-end failed; the printer is stopped.
    #[error("unable to start {program}: {detail}")]
    ChildSpawnFailed { program: String, detail: String },

    /// A filter exited non-zero; the job is aborted.
    #[error("filter {program} exited with status {status}")]
    ChildFilterFailed { program: String, status: i32 },

    /// The back-end exited non-zero; the printer's error policy applies.
    #[error("backend {program} exited with status {status}")]
    ChildBackendFailed { program: String, status: i32 },

    /// Constraint resolution recursed through the same resolver twice.
    #[error("constraint resolver loop at {resolver}")]
    ResolverLoop { resolver: String },

    /// A subscription's event ring overflowed; the oldest entry was dropped.
    #[error("event cache overflow on subscription {0}")]
    CacheOverflow(u32),

    /// A client or notifier closed its pipe; clean up without escalation.
    #[error("peer closed connection")]
    PeerClosed,

    #[error("destination {0} not found")]
    NoSuchDestination(String),

    #[error("destination {0} is not accepting jobs")]
    NotAccepting(String),

    #[error("job {0} not found")]
    NoSuchJob(u32),

    /// A job-state transition the lifecycle forbids (e.g. completed → processing).
    #[error("invalid job state transition: {from} -> {to}")]
    BadTransition { from: String, to: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpoolError {
    /// True when the failure should be reported to clients as transient,
    /// i.e. retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SpoolError::ResourceExhausted(_)
                | SpoolError::NotAccepting(_)
                | SpoolError::ChildBackendFailed { .. }
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
