// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination registry: printers and classes keyed by name.
//!
//! Names compare case-insensitively; listings come back in case-insensitive
//! lexicographic order. Classes reference members by name and resolve them
//! through the registry, never by pointer.

use press_core::{CapabilitySet, JobId, Printer, SpoolError};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// The printer/class tables plus the default destination.
#[derive(Debug, Default)]
pub struct Registry {
    /// Keyed by case-folded name; BTreeMap gives the listing order for free
    dests: BTreeMap<SmolStr, Printer>,
    default: Option<SmolStr>,
    /// Set whenever the printer set changes; the lifecycle layer rewrites
    /// the printcap shadow file and clears it
    dirty: bool,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Printer> {
        self.dests.get(&fold(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Printer> {
        self.dests.get_mut(&fold(name))
    }

    /// All destinations in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &Printer> {
        self.dests.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Printer> {
        self.dests.values_mut()
    }

    pub fn printers(&self) -> impl Iterator<Item = &Printer> {
        self.dests.values().filter(|p| !p.is_class())
    }

    pub fn classes(&self) -> impl Iterator<Item = &Printer> {
        self.dests.values().filter(|p| p.is_class())
    }

    pub fn len(&self) -> usize {
        self.dests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.is_empty()
    }

    /// The configured default destination, if it still exists.
    pub fn default_dest(&self) -> Option<&Printer> {
        self.default.as_ref().and_then(|name| self.dests.get(name))
    }

    pub fn default_name(&self) -> Option<&SmolStr> {
        self.default.as_ref()
    }

    pub fn set_default(&mut self, name: Option<&str>) {
        self.default = name.map(fold);
        self.dirty = true;
    }

    /// Resolve a submitted destination name; empty picks the default.
    pub fn resolve(&self, name: &str) -> Result<&Printer, SpoolError> {
        if name.is_empty() {
            return self
                .default_dest()
                .ok_or_else(|| SpoolError::NoSuchDestination("(default)".to_string()));
        }
        self.get(name)
            .ok_or_else(|| SpoolError::NoSuchDestination(name.to_string()))
    }

    /// Insert or replace a destination.
    pub fn insert(&mut self, printer: Printer) {
        self.dests.insert(fold(&printer.name), printer);
        self.dirty = true;
    }

    /// Remove a destination. The caller must have stopped any bound job
    /// first; a still-bound printer is refused.
    pub fn remove(&mut self, name: &str) -> Result<Printer, SpoolError> {
        let key = fold(name);
        match self.dests.get(&key) {
            None => Err(SpoolError::NoSuchDestination(name.to_string())),
            Some(p) if p.job.is_some() => Err(SpoolError::BadTransition {
                from: "processing".to_string(),
                to: "deleted".to_string(),
            }),
            Some(_) => {
                let printer = self.dests.remove(&key).ok_or_else(|| {
                    SpoolError::NoSuchDestination(name.to_string())
                })?;
                if self.default.as_ref() == Some(&key) {
                    self.default = None;
                }
                // Drop the printer from any class member lists
                for dest in self.dests.values_mut() {
                    dest.members.retain(|m| !m.eq_ignore_ascii_case(name));
                }
                self.dirty = true;
                Ok(printer)
            }
        }
    }

    /// Ensure every class member exists, synthesizing stub remote stopped
    /// printers for unknown names (classes.conf may reference printers that
    /// vanished).
    pub fn materialize_members(&mut self) {
        let missing: Vec<SmolStr> = self
            .dests
            .values()
            .flat_map(|d| d.members.iter())
            .filter(|m| !self.dests.contains_key(&fold(m)))
            .cloned()
            .collect();
        for name in missing {
            tracing::warn!(printer = %name, "class member unknown; creating remote stub");
            self.dests.insert(fold(&name), Printer::new_remote_stub(name));
        }
    }

    /// Rebuild implicit classes: identically-named remote printers on
    /// different hosts collapse into one read-only class per name.
    pub fn rebuild_implicit_classes(&mut self) {
        // Drop the previous generation
        let stale: Vec<SmolStr> = self
            .dests
            .values()
            .filter(|d| d.is_implicit())
            .map(|d| fold(&d.name))
            .collect();
        for key in stale {
            self.dests.remove(&key);
        }

        let mut groups: BTreeMap<SmolStr, Vec<SmolStr>> = BTreeMap::new();
        for p in self.dests.values().filter(|p| p.is_remote() && !p.is_class()) {
            if let Some((base, _host)) = p.name.split_once('@') {
                groups.entry(fold(base)).or_default().push(p.name.clone());
            }
        }

        for (base, members) in groups {
            if members.len() < 2 || self.dests.contains_key(&base) {
                continue;
            }
            let mut class = Printer::new_class(base.clone(), members);
            class.capabilities.insert(CapabilitySet::IMPLICIT | CapabilitySet::REMOTE);
            class.accepting = true;
            class.state = press_core::PrinterState::Idle;
            self.dests.insert(base, class);
        }
        self.dirty = true;
    }

    /// Pick the next available member of a class, advancing its cursor.
    pub fn pick_class_member(&mut self, class_name: &str) -> Option<SmolStr> {
        // The cursor mutation needs &mut on the class while members are read;
        // take the member list out, scan, and write the cursor back.
        let class = self.get(class_name)?;
        if !class.is_class() {
            return Some(class.name.clone());
        }
        let members = class.members.clone();
        let last = class.last_member;

        let start = match last {
            Some(i) => (i + 1) % members.len().max(1),
            None => 0,
        };
        let mut picked = None;
        for offset in 0..members.len() {
            let idx = (start + offset) % members.len();
            if self.get(&members[idx]).is_some_and(Printer::is_available) {
                picked = Some((idx, members[idx].clone()));
                break;
            }
        }

        let class = self.get_mut(class_name)?;
        match picked {
            Some((idx, name)) => {
                class.last_member = Some(idx);
                Some(name)
            }
            None => None,
        }
    }

    /// The printer currently bound to `job`, if any.
    pub fn printer_for_job(&self, job: JobId) -> Option<&Printer> {
        self.dests.values().find(|p| p.job == Some(job))
    }

    /// Take and clear the pending-printcap flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

fn fold(name: &str) -> SmolStr {
    SmolStr::new(name.to_ascii_lowercase())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
