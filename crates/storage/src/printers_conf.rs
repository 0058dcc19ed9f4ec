// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! printers.conf / classes.conf serialization.
//!
//! Both files share the same block grammar: `<Printer name>` …
//! `</Printer>` (or the `Default`-tagged variant), one `Key value` line per
//! attribute. Class blocks additionally carry repeatable `Printer name`
//! member lines. Malformed blocks are logged and skipped; the rest of the
//! file still loads.

use press_core::{ErrorPolicy, Printer, PrinterState, UserAccess};
use smol_str::SmolStr;
use std::io::{BufRead, BufReader, Read, Write};

/// One parsed destination block.
#[derive(Debug, Clone)]
pub struct DestBlock {
    pub printer: Printer,
    pub is_default: bool,
}

/// Write destinations in the §6 block format. Remote and implicit
/// destinations are volatile and never persisted.
pub fn save_destinations<'a, W: Write>(
    w: &mut W,
    dests: impl IntoIterator<Item = &'a Printer>,
    default: Option<&str>,
    classes: bool,
    now: chrono::DateTime<chrono::Utc>,
) -> std::io::Result<()> {
    let what = if classes { "Class" } else { "Printer" };
    writeln!(w, "# {what} configuration file for pressd")?;
    writeln!(w, "# Written by pressd on {}", now.to_rfc2822())?;

    for p in dests {
        if p.is_remote() || p.is_implicit() || p.is_class() != classes {
            continue;
        }
        let is_default = default.is_some_and(|d| d.eq_ignore_ascii_case(&p.name));
        let tag = if is_default { format!("Default{what}") } else { what.to_string() };
        writeln!(w, "<{tag} {}>", p.name)?;
        if !p.info.is_empty() {
            writeln!(w, "Info {}", p.info)?;
        }
        if !p.location.is_empty() {
            writeln!(w, "Location {}", p.location)?;
        }
        if !classes {
            writeln!(w, "DeviceURI {}", p.device_uri)?;
        }
        match p.state {
            PrinterState::Stopped => {
                writeln!(w, "State Stopped")?;
                if !p.state_message.is_empty() {
                    writeln!(w, "StateMessage {}", p.state_message)?;
                }
            }
            _ => writeln!(w, "State Idle")?,
        }
        writeln!(w, "Accepting {}", if p.accepting { "Yes" } else { "No" })?;
        writeln!(w, "JobSheets {} {}", p.job_sheets.0, p.job_sheets.1)?;
        writeln!(w, "QuotaPeriod {}", p.quota.period)?;
        writeln!(w, "PageLimit {}", p.quota.page_limit)?;
        writeln!(w, "KLimit {}", p.quota.k_limit)?;
        match &p.access {
            UserAccess::Everyone => {}
            UserAccess::Allow(users) => {
                for user in users {
                    writeln!(w, "AllowUser {user}")?;
                }
            }
            UserAccess::Deny(users) => {
                for user in users {
                    writeln!(w, "DenyUser {user}")?;
                }
            }
        }
        writeln!(w, "OpPolicy {}", p.op_policy)?;
        writeln!(w, "ErrorPolicy {}", p.error_policy)?;
        for member in &p.members {
            writeln!(w, "Printer {member}")?;
        }
        writeln!(w, "</{what}>")?;
    }
    Ok(())
}

/// Parse a printers.conf or classes.conf stream.
pub fn load_destinations<R: Read>(reader: R, file: &str) -> Vec<DestBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(DestBlock, bool)> = None; // (block, is_class)
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

        if let Some(open) = parse_open_tag(line) {
            if current.is_some() {
                tracing::warn!(file, line, "unterminated block; skipping");
                bad_block = false;
            }
            let (name, is_default, is_class) = open;
            let printer = if is_class {
                Printer::new_class(name, Vec::new())
            } else {
                Printer::new(name)
            };
            current = Some((DestBlock { printer, is_default }, is_class));
            continue;
        }

        if line == "</Printer>" || line == "</Class>" {
            match current.take() {
                Some((block, _)) if !bad_block => blocks.push(block),
                Some(_) => tracing::warn!(file, "skipping malformed block"),
                None => tracing::warn!(file, line, "close tag without open"),
            }
            bad_block = false;
            continue;
        }

        let Some((block, is_class)) = current.as_mut() else {
            tracing::warn!(file, line, "directive outside block; ignored");
            continue;
        };
        if let Err(detail) = apply_key(&mut block.printer, *is_class, line) {
            tracing::warn!(file, line, detail, "bad directive; skipping block");
            bad_block = true;
        }
    }

    if current.is_some() {
        tracing::warn!(file, "unterminated final block; skipped");
    }
    blocks
}

fn parse_open_tag(line: &str) -> Option<(SmolStr, bool, bool)> {
    let inner = line.strip_prefix('<')?.strip_suffix('>')?;
    let (tag, name) = inner.split_once(' ')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    match tag {
        "Printer" => Some((SmolStr::new(name), false, false)),
        "DefaultPrinter" => Some((SmolStr::new(name), true, false)),
        "Class" => Some((SmolStr::new(name), false, true)),
        "DefaultClass" => Some((SmolStr::new(name), true, true)),
        _ => None,
    }
}

fn apply_key(printer: &mut Printer, is_class: bool, line: &str) -> Result<(), &'static str> {
    let (key, value) = match line.split_once(char::is_whitespace) {
        Some((k, v)) => (k, v.trim()),
        None => (line, ""),
    };

    match key {
        "Info" => printer.info = value.to_string(),
        "Location" => printer.location = value.to_string(),
        "DeviceURI" => printer.device_uri = value.to_string(),
        "State" => {
            printer.state = match value {
                "Idle" => PrinterState::Idle,
                "Stopped" => PrinterState::Stopped,
                _ => return Err("unknown State"),
            };
        }
        "StateMessage" => printer.state_message = value.to_string(),
        "Accepting" => {
            printer.accepting = match value.to_ascii_lowercase().as_str() {
                "yes" | "on" | "true" => true,
                "no" | "off" | "false" => false,
                _ => return Err("unknown Accepting"),
            };
        }
        "JobSheets" => {
            let mut tokens = value.split_whitespace();
            let start = tokens.next().ok_or("JobSheets needs two tokens")?;
            let end = tokens.next().unwrap_or(start);
            printer.job_sheets = (start.to_string(), end.to_string());
        }
        "QuotaPeriod" => printer.quota.period = value.parse().map_err(|_| "bad QuotaPeriod")?,
        "PageLimit" => printer.quota.page_limit = value.parse().map_err(|_| "bad PageLimit")?,
        "KLimit" => printer.quota.k_limit = value.parse().map_err(|_| "bad KLimit")?,
        "AllowUser" => match &mut printer.access {
            UserAccess::Everyone => {
                printer.access = UserAccess::Allow(vec![value.to_string()]);
            }
            UserAccess::Allow(users) => users.push(value.to_string()),
            UserAccess::Deny(_) => return Err("AllowUser conflicts with DenyUser"),
        },
        "DenyUser" => match &mut printer.access {
            UserAccess::Everyone => {
                printer.access = UserAccess::Deny(vec![value.to_string()]);
            }
            UserAccess::Deny(users) => users.push(value.to_string()),
            UserAccess::Allow(_) => return Err("DenyUser conflicts with AllowUser"),
        },
        "OpPolicy" => printer.op_policy = SmolStr::new(value),
        "ErrorPolicy" => {
            printer.error_policy = ErrorPolicy::parse(value).ok_or("unknown ErrorPolicy")?;
        }
        "Printer" if is_class => printer.members.push(SmolStr::new(value)),
        _ => return Err("unknown directive"),
    }
    Ok(())
}

#[cfg(test)]
#[path = "printers_conf_tests.rs"]
mod tests;
