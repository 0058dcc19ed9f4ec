// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status-pipe line grammar.
//!
//! Filters and back-ends report over a shared pipe, one record per line:
//! `LEVEL: payload`. Level tokens are case-sensitive; anything else is
//! treated as debug chatter.

use smol_str::SmolStr;

/// Log levels a child may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Error,
    Warning,
    Info,
    Debug,
    Debug2,
}

press_core::simple_display! {
    StatusLevel {
        Error => "ERROR",
        Warning => "WARNING",
        Info => "INFO",
        Debug => "DEBUG",
        Debug2 => "DEBUG2",
    }
}

/// Printer state-reason edit carried by a `STATE:` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonOp {
    Add(Vec<SmolStr>),
    Remove(Vec<SmolStr>),
    Replace(Vec<SmolStr>),
}

/// One parsed status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Message { level: StatusLevel, text: String },
    Page { page: u32, copies: u32 },
    State(ReasonOp),
    Attr(Vec<(SmolStr, String)>),
}

/// Parse one status line. Unknown prefixes fall back to a DEBUG message of
/// the whole line, matching what drivers have always leaned on.
pub fn parse_status_line(line: &str) -> StatusUpdate {
    let (keyword, payload) = match line.split_once(':') {
        Some((k, p)) => (k, p.trim_start()),
        None => return debug_fallback(line),
    };

    match keyword {
        "ERROR" => StatusUpdate::Message { level: StatusLevel::Error, text: payload.to_string() },
        "WARNING" => {
            StatusUpdate::Message { level: StatusLevel::Warning, text: payload.to_string() }
        }
        "INFO" => StatusUpdate::Message { level: StatusLevel::Info, text: payload.to_string() },
        "DEBUG" => StatusUpdate::Message { level: StatusLevel::Debug, text: payload.to_string() },
        "DEBUG2" => {
            StatusUpdate::Message { level: StatusLevel::Debug2, text: payload.to_string() }
        }
        "PAGE" => parse_page(payload),
        "STATE" => StatusUpdate::State(parse_state(payload)),
        "ATTR" => StatusUpdate::Attr(parse_attrs(payload)),
        _ => debug_fallback(line),
    }
}

fn debug_fallback(line: &str) -> StatusUpdate {
    StatusUpdate::Message { level: StatusLevel::Debug, text: line.to_string() }
}

/// `PAGE: <n> <copies>`; a missing copy count means one.
fn parse_page(payload: &str) -> StatusUpdate {
    let mut tokens = payload.split_whitespace();
    let page = tokens.next().and_then(|t| t.parse().ok());
    let copies = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(1);
    match page {
        Some(page) => StatusUpdate::Page { page, copies },
        None => debug_fallback(payload),
    }
}

/// `STATE: {+|-|}<reason>[,<reason>…]`
fn parse_state(payload: &str) -> ReasonOp {
    let tokens = |s: &str| -> Vec<SmolStr> {
        s.split([',', ' '])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(SmolStr::new)
            .collect()
    };
    if let Some(rest) = payload.strip_prefix('+') {
        ReasonOp::Add(tokens(rest))
    } else if let Some(rest) = payload.strip_prefix('-') {
        ReasonOp::Remove(tokens(rest))
    } else {
        ReasonOp::Replace(tokens(payload))
    }
}

/// `ATTR: name=value name2=value2`
fn parse_attrs(payload: &str) -> Vec<(SmolStr, String)> {
    payload
        .split_whitespace()
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((SmolStr::new(name), value.to_string()))
        })
        .collect()
}

/// Apply a reason edit to a printer's reason set. Comparison is
/// case-insensitive and duplicates collapse.
pub fn apply_reasons(reasons: &mut Vec<SmolStr>, op: &ReasonOp) {
    let contains = |set: &[SmolStr], token: &SmolStr| {
        set.iter().any(|r| r.eq_ignore_ascii_case(token))
    };
    match op {
        ReasonOp::Add(tokens) => {
            for token in tokens {
                if !contains(reasons, token) {
                    reasons.push(token.clone());
                }
            }
        }
        ReasonOp::Remove(tokens) => {
            reasons.retain(|r| !tokens.iter().any(|t| t.eq_ignore_ascii_case(r)));
        }
        ReasonOp::Replace(tokens) => {
            reasons.clear();
            for token in tokens {
                if !contains(reasons, token) {
                    reasons.push(token.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
