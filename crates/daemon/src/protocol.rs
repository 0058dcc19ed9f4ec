// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response DTOs spoken over client connections.
//!
//! The wire framing is one JSON object per line; a print-job header is
//! followed by exactly `data_length` raw document bytes. Parsing the outer
//! transport is the session state machine's job (`client.rs`).

use press_core::{EventRecord, JobState, PrinterState, SpoolError};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// One client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    PrintJob {
        dest: String,
        user: String,
        #[serde(default)]
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<u8>,
        #[serde(default = "default_mime")]
        mime_type: SmolStr,
        #[serde(default)]
        options: BTreeMap<String, String>,
        /// Raw document bytes that follow this header line
        data_length: usize,
    },
    CancelJob { id: u32, user: String },
    HoldJob { id: u32, user: String },
    ReleaseJob { id: u32, user: String },
    RestartJob { id: u32, user: String },
    MoveJob { id: u32, dest: String, user: String },
    PausePrinter {
        printer: String,
        user: String,
        #[serde(default)]
        message: String,
    },
    ResumePrinter { printer: String, user: String },
    AcceptJobs { printer: String, user: String },
    RejectJobs { printer: String, user: String },
    DeletePrinter { printer: String, user: String },
    GetPrinters,
    GetJobs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dest: Option<String>,
    },
    CreateSubscription {
        user: String,
        /// Space-separated event names, `all` for everything
        events: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        printer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job: Option<u32>,
        #[serde(default)]
        recipient: String,
        #[serde(default)]
        lease: u64,
        #[serde(default)]
        interval: u64,
        #[serde(default)]
        user_data: Vec<u8>,
    },
    CancelSubscription { id: u32, user: String },
    GetEvents { subscription: u32, since: u64 },
}

fn default_mime() -> SmolStr {
    SmolStr::new("application/octet-stream")
}

impl Request {
    /// Document bytes expected after the header line.
    pub fn body_length(&self) -> usize {
        match self {
            Request::PrintJob { data_length, .. } => *data_length,
            _ => 0,
        }
    }
}

/// Printer attributes exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterInfo {
    pub name: SmolStr,
    pub state: PrinterState,
    pub accepting: bool,
    pub info: String,
    pub location: String,
    pub reasons: Vec<SmolStr>,
    pub is_class: bool,
}

/// Job attributes exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: u32,
    pub dest: SmolStr,
    pub user: String,
    pub title: String,
    pub state: JobState,
    pub priority: u8,
    pub sheets: u32,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription: Option<u32>,
    },
    Error { kind: String, message: String },
    Printers { printers: Vec<PrinterInfo> },
    Jobs { jobs: Vec<JobInfo> },
    Events { events: Vec<EventRecord> },
}

impl Response {
    pub fn ok() -> Response {
        Response::Ok { job: None, subscription: None }
    }

    pub fn job(id: press_core::JobId) -> Response {
        Response::Ok { job: Some(id.0), subscription: None }
    }

    pub fn subscription(id: press_core::SubscriptionId) -> Response {
        Response::Ok { job: None, subscription: Some(id.0) }
    }

    pub fn error(err: &SpoolError) -> Response {
        Response::Error { kind: error_kind(err).to_string(), message: err.to_string() }
    }
}

/// Wire name for each error kind.
pub fn error_kind(err: &SpoolError) -> &'static str {
    match err {
        SpoolError::ConfigParse { .. } => "config-parse",
        SpoolError::ResourceExhausted(_) => "resource-exhausted",
        SpoolError::PolicyDenied { .. } => "policy-denied",
        SpoolError::QuotaExceeded { .. } => "quota-exceeded",
        SpoolError::BadFileType { .. } => "bad-filetype",
        SpoolError::FsUnsafe(_) => "fs-unsafe",
        SpoolError::ChildSpawnFailed { .. } => "child-spawn-failed",
        SpoolError::ChildFilterFailed { .. } => "child-filter-failed",
        SpoolError::ChildBackendFailed { .. } => "child-backend-failed",
        SpoolError::ResolverLoop { .. } => "resolver-loop",
        SpoolError::CacheOverflow(_) => "cache-overflow",
        SpoolError::PeerClosed => "peer-closed",
        SpoolError::NoSuchDestination(_) => "no-such-destination",
        SpoolError::NotAccepting(_) => "not-accepting",
        SpoolError::NoSuchJob(_) => "no-such-job",
        SpoolError::BadTransition { .. } => "bad-state",
        SpoolError::Io(_) => "io-error",
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
