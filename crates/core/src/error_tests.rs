// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn display_messages() {
    let err = SpoolError::QuotaExceeded { user: "bob".into(), dest: "lp1".into() };
    assert_eq!(err.to_string(), "quota exceeded for user bob on lp1");

    let err = SpoolError::BadFileType {
        src: "text/plain".into(),
        dst: "printer/lp1".into(),
    };
    assert_eq!(err.to_string(), "no filter chain from text/plain to printer/lp1");
}

#[test]
fn transient_classification() {
    assert!(SpoolError::ResourceExhausted("MaxClients".into()).is_transient());
    assert!(SpoolError::NotAccepting("lp1".into()).is_transient());
    assert!(SpoolError::ChildBackendFailed { program: "socket".into(), status: 1 }.is_transient());

    assert!(!SpoolError::PolicyDenied { user: "eve".into() }.is_transient());
    assert!(!SpoolError::ChildFilterFailed { program: "pstops".into(), status: 2 }.is_transient());
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: SpoolError = io.into();
    assert!(matches!(err, SpoolError::Io(_)));
}
