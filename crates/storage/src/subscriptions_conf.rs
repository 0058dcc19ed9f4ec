// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! subscriptions.conf serialization.
//!
//! `NextSubscriptionId NNN` followed by `<Subscription id>` blocks. The
//! opaque user-data blob is written with `<HH>` hex escapes for
//! non-printable bytes and the literal `<`.

use press_core::{EventMask, JobId, Subscription, SubscriptionId};
use smol_str::SmolStr;
use std::io::{BufRead, BufReader, Read, Write};

/// Parsed contents of subscriptions.conf.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFile {
    pub next_id: u32,
    pub subscriptions: Vec<Subscription>,
}

/// Encode a user-data blob for the config file.
fn encode_user_data(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        if (0x20..0x7f).contains(&byte) && byte != b'<' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("<{byte:02X}>"));
        }
    }
    out
}

/// Decode `<HH>` escapes; malformed escapes fail the block.
fn decode_user_data(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '<' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let hi = chars.next()?;
        let lo = chars.next()?;
        if chars.next()? != '>' {
            return None;
        }
        let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
        out.push(byte);
    }
    Some(out)
}

/// Write the full subscription table.
pub fn save_subscriptions<'a, W: Write>(
    w: &mut W,
    next_id: u32,
    subs: impl IntoIterator<Item = &'a Subscription>,
    now: chrono::DateTime<chrono::Utc>,
) -> std::io::Result<()> {
    writeln!(w, "# Subscription configuration file for pressd")?;
    writeln!(w, "# Written by pressd on {}", now.to_rfc2822())?;
    writeln!(w, "NextSubscriptionId {next_id}")?;

    for sub in subs {
        writeln!(w, "<Subscription {}>", sub.id)?;
        writeln!(w, "Events {}", sub.mask.names())?;
        if !sub.owner.is_empty() {
            writeln!(w, "Owner {}", sub.owner)?;
        }
        if !sub.recipient.is_empty() {
            writeln!(w, "Recipient {}", sub.recipient)?;
        }
        if let Some(job) = sub.job {
            writeln!(w, "JobId {job}")?;
        }
        if let Some(printer) = &sub.printer {
            writeln!(w, "PrinterName {printer}")?;
        }
        if !sub.user_data.is_empty() {
            writeln!(w, "UserData {}", encode_user_data(&sub.user_data))?;
        }
        if let Some(max_events) = sub.max_events {
            writeln!(w, "MaxEvents {max_events}")?;
        }
        writeln!(w, "LeaseDuration {}", sub.lease)?;
        writeln!(w, "Interval {}", sub.interval)?;
        if sub.expiration != 0 {
            writeln!(w, "ExpirationTime {}", sub.expiration)?;
        }
        writeln!(w, "NextEventId {}", sub.next_sequence)?;
        writeln!(w, "</Subscription>")?;
    }
    Ok(())
}

/// Parse subscriptions.conf, skipping malformed blocks.
pub fn load_subscriptions<R: Read>(reader: R, file: &str) -> SubscriptionFile {
    let mut out = SubscriptionFile::default();
    let mut current: Option<Subscription> = None;
    let mut bad_block = false;

    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(file, error = %e, "read error; stopping config load");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("<Subscription ") {
            let Some(id) = rest.strip_suffix('>').and_then(|s| s.trim().parse::<u32>().ok())
            else {
                tracing::warn!(file, line, "bad subscription open tag");
                bad_block = true;
                continue;
            };
            current = Some(Subscription::new(
                SubscriptionId(id),
                EventMask::NONE,
                String::new(),
            ));
            bad_block = false;
            continue;
        }

        if line == "</Subscription>" {
            match current.take() {
                Some(sub) if !bad_block => out.subscriptions.push(sub),
                Some(sub) => {
                    tracing::warn!(file, id = %sub.id, "skipping malformed subscription")
                }
                None => {}
            }
            bad_block = false;
            continue;
        }

        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((k, v)) => (k, v.trim()),
            None => (line, ""),
        };

        if key == "NextSubscriptionId" {
            out.next_id = value.parse().unwrap_or(out.next_id);
            continue;
        }

        let Some(sub) = current.as_mut() else {
            tracing::warn!(file, line, "directive outside block; ignored");
            continue;
        };
        if !apply_key(sub, key, value) {
            tracing::warn!(file, line, "bad directive; skipping subscription");
            bad_block = true;
        }
    }

    // Never hand out an id at or below an existing subscription's.
    let max_seen = out.subscriptions.iter().map(|s| s.id.0).max().unwrap_or(0);
    out.next_id = out.next_id.max(max_seen + 1).max(1);
    out
}

fn apply_key(sub: &mut Subscription, key: &str, value: &str) -> bool {
    match key {
        "Events" => sub.mask = EventMask::parse_list(value),
        "Owner" => sub.owner = value.to_string(),
        "Recipient" => sub.recipient = value.to_string(),
        "JobId" => match value.parse() {
            Ok(id) => sub.job = Some(JobId(id)),
            Err(_) => return false,
        },
        "PrinterName" => sub.printer = Some(SmolStr::new(value)),
        "UserData" => match decode_user_data(value) {
            Some(data) => sub.user_data = data,
            None => return false,
        },
        "LeaseDuration" => match value.parse() {
            Ok(v) => sub.lease = v,
            Err(_) => return false,
        },
        "Interval" => match value.parse() {
            Ok(v) => sub.interval = v,
            Err(_) => return false,
        },
        "MaxEvents" => match value.parse() {
            Ok(v) => sub.max_events = Some(v),
            Err(_) => return false,
        },
        "ExpirationTime" => match value.parse() {
            Ok(v) => sub.expiration = v,
            Err(_) => return false,
        },
        "NextEventId" => match value.parse() {
            Ok(v) => sub.next_sequence = v,
            Err(_) => return false,
        },
        _ => return false,
    }
    true
}

#[cfg(test)]
#[path = "subscriptions_conf_tests.rs"]
mod tests;
