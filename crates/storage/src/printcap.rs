// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The printcap shadow file, rewritten on every printer-set change for
//! legacy applications that still read one.

use press_core::Printer;
use std::io::Write;

/// Output flavor for the shadow file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintcapFormat {
    /// Classical one-line colon-delimited entries
    #[default]
    Bsd,
    /// Tabular multiline form
    Solaris,
}

impl PrintcapFormat {
    pub fn parse(s: &str) -> Option<PrintcapFormat> {
        match s.to_ascii_lowercase().as_str() {
            "bsd" => Some(PrintcapFormat::Bsd),
            "solaris" => Some(PrintcapFormat::Solaris),
            _ => None,
        }
    }
}

/// Write the shadow file. The default printer leads in BSD form and names
/// the `_default` entry in the tabular form.
pub fn write_printcap<'a, W: Write>(
    w: &mut W,
    format: PrintcapFormat,
    server_name: &str,
    printers: impl IntoIterator<Item = &'a Printer> + Clone,
    default: Option<&str>,
) -> std::io::Result<()> {
    writeln!(w, "# This file was automatically generated by pressd from the")?;
    writeln!(w, "# printers.conf file.  All changes to this file will be lost.")?;

    let is_default =
        |p: &Printer| default.is_some_and(|d| d.eq_ignore_ascii_case(&p.name));

    match format {
        PrintcapFormat::Bsd => {
            for p in printers.clone().into_iter().filter(|p| is_default(p)) {
                writeln!(w, "{}|{}:rm={}:rp={}:", p.name, p.info, server_name, p.name)?;
            }
            for p in printers.into_iter().filter(|p| !is_default(p)) {
                writeln!(w, "{}|{}:rm={}:rp={}:", p.name, p.info, server_name, p.name)?;
            }
        }
        PrintcapFormat::Solaris => {
            let names: Vec<&str> =
                printers.clone().into_iter().map(|p| p.name.as_str()).collect();
            writeln!(w, "_all:all={}", names.join(","))?;
            if let Some(default) = default {
                writeln!(w, "_default:use={default}")?;
            }
            for p in printers {
                writeln!(
                    w,
                    "{}:\\\n\t:bsdaddr={},{}:\\\n\t:description={}:",
                    p.name, server_name, p.name, p.info
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "printcap_tests.rs"]
mod tests;
