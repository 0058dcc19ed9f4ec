// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fabric: subscription bookkeeping, fan-out, and notifier children.
//!
//! `emit` snapshots the printer/job involved, appends the record to every
//! matching subscription's ring, and pushes it to the subscription's
//! notifier process when one is configured. Notifiers are long-running
//! children fed serialized events on stdin; a broken pipe reaps the child
//! and the next event respawns it.

use press_core::{
    job_state_reason, EventKind, EventRecord, Job, JobId, JobSnapshot, Printer, PrinterSnapshot,
    PrinterState, SpoolError, Subscription, SubscriptionId,
};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Caps applied when creating subscriptions.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionCaps {
    pub max_total: usize,
    pub max_per_dest: usize,
    pub max_events: usize,
}

/// The subscription table, keyed by id.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subs: BTreeMap<SubscriptionId, Subscription>,
    next_id: u32,
}

impl SubscriptionTable {
    pub fn restore(subs: Vec<Subscription>, next_id: u32) -> Self {
        let map = subs.into_iter().map(|s| (s.id, s)).collect();
        Self { subs: map, next_id: next_id.max(1) }
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subs.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subs.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subs.values()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Admit a new subscription under the caps, assigning its id.
    pub fn add(
        &mut self,
        mut sub: Subscription,
        caps: SubscriptionCaps,
    ) -> Result<SubscriptionId, SpoolError> {
        if self.subs.len() >= caps.max_total {
            return Err(SpoolError::ResourceExhausted("MaxSubscriptions".to_string()));
        }
        if let Some(printer) = &sub.printer {
            let count =
                self.subs.values().filter(|s| s.printer.as_ref() == Some(printer)).count();
            if count >= caps.max_per_dest {
                return Err(SpoolError::ResourceExhausted(
                    "MaxSubscriptionsPerPrinter".to_string(),
                ));
            }
        }
        if let Some(job) = sub.job {
            let count = self.subs.values().filter(|s| s.job == Some(job)).count();
            if count >= caps.max_per_dest {
                return Err(SpoolError::ResourceExhausted(
                    "MaxSubscriptionsPerJob".to_string(),
                ));
            }
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        sub.id = id;
        self.subs.insert(id, sub);
        Ok(id)
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.subs.remove(&id)
    }

    /// Remove expired subscriptions, returning their ids.
    pub fn expire(&mut self, now: u64) -> Vec<SubscriptionId> {
        let expired: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();
        for id in &expired {
            self.subs.remove(id);
        }
        expired
    }

    /// Remove subscriptions tied to a job that reached a terminal state.
    pub fn drop_for_job(&mut self, job: JobId) -> Vec<SubscriptionId> {
        let doomed: Vec<SubscriptionId> = self
            .subs
            .values()
            .filter(|s| s.job == Some(job))
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            self.subs.remove(id);
        }
        doomed
    }
}

struct Notifier {
    child: Child,
    last_delivery: u64,
}

/// Fan-out engine owning the table and the notifier children.
pub struct EventFabric {
    pub table: SubscriptionTable,
    notifiers: HashMap<SubscriptionId, Notifier>,
    server_bin: PathBuf,
    caps: SubscriptionCaps,
}

impl EventFabric {
    pub fn new(server_bin: PathBuf, caps: SubscriptionCaps) -> Self {
        Self { table: SubscriptionTable::default(), notifiers: HashMap::new(), server_bin, caps }
    }

    pub fn caps(&self) -> SubscriptionCaps {
        self.caps
    }

    /// Build snapshots and deliver an event to every matching subscription.
    pub fn emit(
        &mut self,
        kind: EventKind,
        printer: Option<&Printer>,
        job: Option<&Job>,
        text: String,
        now: u64,
    ) {
        let printer_snapshot = printer.map(|p| PrinterSnapshot {
            name: p.name.clone(),
            state: p.state,
            accepting: p.accepting,
            reasons: p.reasons.clone(),
        });
        let job_snapshot = job.map(|j| JobSnapshot {
            id: j.id,
            state: j.state,
            state_reason: job_state_reason(
                j.state,
                printer.is_some_and(|p| p.state == PrinterState::Stopped),
                j.hold_until.is_some(),
            )
            .into(),
        });

        tracing::debug!(kind = %kind, text = %text, "event");

        let printer_name = printer.map(|p| p.name.as_str());
        let job_id = job.map(|j| j.id);
        let matching: Vec<SubscriptionId> = self
            .table
            .iter()
            .filter(|s| s.matches(kind, printer_name, job_id))
            .map(|s| s.id)
            .collect();

        for id in matching {
            let record = EventRecord {
                sequence: 0,
                time: now,
                kind,
                text: text.clone(),
                printer: printer_snapshot.clone(),
                job: job_snapshot.clone(),
                user_data: Vec::new(),
            };
            let default_cap = self.caps.max_events;
            let Some(sub) = self.table.get_mut(id) else { continue };
            let cap = sub.max_events.unwrap_or(default_cap);
            sub.push_event(record.clone(), cap);
            let stored = sub.events.back().cloned();
            let recipient = sub.recipient.clone();
            let interval = sub.interval;
            if let (Some(record), false) = (stored, recipient.is_empty()) {
                self.deliver(id, &recipient, interval, &record, now);
            }
        }
    }

    /// Push one record into the subscription's notifier, spawning or
    /// respawning the child as needed.
    fn deliver(
        &mut self,
        id: SubscriptionId,
        recipient: &str,
        interval: u64,
        record: &EventRecord,
        now: u64,
    ) {
        let Some(program) = self.notifier_program(recipient) else {
            return;
        };

        if let Some(notifier) = self.notifiers.get(&id) {
            if interval > 0 && now < notifier.last_delivery + interval {
                return;
            }
        }

        for attempt in 0..2 {
            if !self.notifiers.contains_key(&id) {
                match self.spawn_notifier(&program, recipient) {
                    Some(child) => {
                        self.notifiers.insert(id, Notifier { child, last_delivery: 0 });
                    }
                    None => return,
                }
            }
            let Some(notifier) = self.notifiers.get_mut(&id) else { return };
            match write_event(&mut notifier.child, record) {
                Ok(()) => {
                    notifier.last_delivery = now;
                    return;
                }
                Err(e) => {
                    tracing::debug!(
                        subscription = %id,
                        error = %e,
                        attempt,
                        "notifier pipe broken; reaping"
                    );
                    if let Some(mut dead) = self.notifiers.remove(&id) {
                        let _ = dead.child.kill();
                        let _ = dead.child.wait();
                    }
                    // One respawn per delivery; a second failure waits for
                    // the next event.
                }
            }
        }
    }

    fn notifier_program(&self, recipient: &str) -> Option<PathBuf> {
        let scheme = recipient.split(':').next().filter(|s| !s.is_empty())?;
        let program = self.server_bin.join("notifier").join(scheme);
        program.is_file().then_some(program)
    }

    fn spawn_notifier(&self, program: &PathBuf, recipient: &str) -> Option<Child> {
        match Command::new(program)
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                tracing::debug!(program = %program.display(), pid = child.id(), "notifier started");
                Some(child)
            }
            Err(e) => {
                tracing::warn!(program = %program.display(), error = %e, "notifier spawn failed");
                None
            }
        }
    }

    /// SIGCHLD sweep: forget notifier children that exited on their own.
    /// The next matching event respawns them.
    pub fn reap_exited_notifiers(&mut self) {
        self.notifiers.retain(|id, notifier| match notifier.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(subscription = %id, %status, "notifier exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(subscription = %id, error = %e, "notifier wait failed");
                false
            }
        });
    }

    /// Drop a subscription's notifier child, if any.
    pub fn reap_notifier(&mut self, id: SubscriptionId) {
        if let Some(mut notifier) = self.notifiers.remove(&id) {
            let _ = notifier.child.kill();
            let _ = notifier.child.wait();
        }
    }

    /// Shutdown path: stop every notifier.
    pub fn stop_all_notifiers(&mut self) {
        let ids: Vec<SubscriptionId> = self.notifiers.keys().copied().collect();
        for id in ids {
            self.reap_notifier(id);
        }
    }
}

fn write_event(child: &mut Child, record: &EventRecord) -> std::io::Result<()> {
    let stdin = child
        .stdin
        .as_mut()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "no stdin"))?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    stdin.write_all(&line)?;
    stdin.flush()
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
