// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn print_job_round_trips() {
    let json = r#"{"op":"print-job","dest":"lp1","user":"alice","mime_type":"text/plain","data_length":6}"#;
    let request: Request = serde_json::from_str(json).unwrap();
    match &request {
        Request::PrintJob { dest, user, mime_type, data_length, title, priority, .. } => {
            assert_eq!(dest, "lp1");
            assert_eq!(user, "alice");
            assert_eq!(mime_type, "text/plain");
            assert_eq!(*data_length, 6);
            assert!(title.is_empty());
            assert!(priority.is_none());
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(request.body_length(), 6);

    let back: Request = serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
    assert_eq!(back, request);
}

#[test]
fn mime_type_defaults_to_octet_stream() {
    let json = r#"{"op":"print-job","dest":"lp1","user":"alice","data_length":0}"#;
    let request: Request = serde_json::from_str(json).unwrap();
    match request {
        Request::PrintJob { mime_type, .. } => {
            assert_eq!(mime_type, "application/octet-stream")
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn control_requests_have_no_body() {
    let json = r#"{"op":"cancel-job","id":3,"user":"alice"}"#;
    let request: Request = serde_json::from_str(json).unwrap();
    assert_eq!(request, Request::CancelJob { id: 3, user: "alice".to_string() });
    assert_eq!(request.body_length(), 0);
}

#[test]
fn responses_serialize_compactly() {
    let ok = serde_json::to_string(&Response::job(press_core::JobId(5))).unwrap();
    assert_eq!(ok, r#"{"status":"ok","job":5}"#);

    let err = Response::error(&SpoolError::QuotaExceeded {
        user: "bob".to_string(),
        dest: "lp1".to_string(),
    });
    let json = serde_json::to_string(&err).unwrap();
    assert!(json.contains(r#""kind":"quota-exceeded""#));
}

#[test]
fn error_kinds_cover_taxonomy() {
    let cases: Vec<(SpoolError, &str)> = vec![
        (SpoolError::PolicyDenied { user: "x".into() }, "policy-denied"),
        (SpoolError::ResourceExhausted("MaxClients".into()), "resource-exhausted"),
        (SpoolError::PeerClosed, "peer-closed"),
        (
            SpoolError::BadFileType { src: "a/b".into(), dst: "c/d".into() },
            "bad-filetype",
        ),
        (SpoolError::CacheOverflow(1), "cache-overflow"),
    ];
    for (err, kind) in cases {
        assert_eq!(error_kind(&err), kind);
    }
}

#[test]
fn subscription_request_defaults() {
    let json = r#"{"op":"create-subscription","user":"alice","events":"job-state-changed"}"#;
    let request: Request = serde_json::from_str(json).unwrap();
    match request {
        Request::CreateSubscription { lease, interval, recipient, printer, job, .. } => {
            assert_eq!(lease, 0);
            assert_eq!(interval, 0);
            assert!(recipient.is_empty());
            assert!(printer.is_none());
            assert!(job.is_none());
        }
        other => panic!("unexpected: {other:?}"),
    }
}
