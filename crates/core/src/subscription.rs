// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriptions: long-lived requests for event delivery.

use crate::event::{EventKind, EventMask, EventRecord};
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::VecDeque;

/// Unique integer id for a subscription, persisted in subscriptions.conf.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubscriptionId(pub u32);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered event listener with its bounded event cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub mask: EventMask,
    pub owner: String,
    /// Only events for this printer match; None matches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<SmolStr>,
    /// Only events for this job match; None matches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobId>,
    /// Recipient URI; its scheme selects a notifier program
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_data: Vec<u8>,
    /// Minimum seconds between notifier deliveries; 0 delivers immediately
    #[serde(default)]
    pub interval: u64,
    /// Per-subscription event-cache bound overriding the server default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,
    /// Lease duration in seconds; 0 never expires
    #[serde(default)]
    pub lease: u64,
    /// Epoch seconds when the lease runs out; 0 never expires
    #[serde(default)]
    pub expiration: u64,
    /// Sequence id the next event will take (strictly increasing)
    pub next_sequence: u64,
    /// Cached events, oldest first
    #[serde(skip)]
    pub events: VecDeque<EventRecord>,
    /// Events dropped because the ring was full
    #[serde(skip)]
    pub overflowed: u64,
}

impl Subscription {
    pub fn new(id: SubscriptionId, mask: EventMask, owner: impl Into<String>) -> Self {
        Self {
            id,
            mask,
            owner: owner.into(),
            printer: None,
            job: None,
            recipient: String::new(),
            user_data: Vec::new(),
            interval: 0,
            max_events: None,
            lease: 0,
            expiration: 0,
            next_sequence: 1,
            events: VecDeque::new(),
            overflowed: 0,
        }
    }

    crate::setters! {
        into {
            recipient: String,
        }
        set {
            user_data: Vec<u8>,
            interval: u64,
        }
        option {
            printer: SmolStr,
            job: JobId,
        }
    }

    /// Install a lease, computing the wall-clock expiration.
    pub fn with_lease(mut self, lease: u64, now: u64) -> Self {
        self.lease = lease;
        self.expiration = if lease == 0 { 0 } else { now + lease };
        self
    }

    /// Whether an event of `kind` for the given printer/job concerns this
    /// subscription. Absent filters match everything.
    pub fn matches(&self, kind: EventKind, printer: Option<&str>, job: Option<JobId>) -> bool {
        if !self.mask.contains(kind) {
            return false;
        }
        if let Some(want) = &self.printer {
            if !printer.is_some_and(|p| want.eq_ignore_ascii_case(p)) {
                return false;
            }
        }
        if let Some(want) = self.job {
            if job != Some(want) {
                return false;
            }
        }
        true
    }

    /// Append an event, assigning its sequence id. When the ring is at
    /// `max_events` the oldest entry is dropped and the overflow counter
    /// bumped.
    pub fn push_event(&mut self, mut record: EventRecord, max_events: usize) {
        record.sequence = self.next_sequence;
        record.user_data = self.user_data.clone();
        self.next_sequence += 1;

        if max_events > 0 && self.events.len() == max_events {
            self.events.pop_front();
            self.overflowed += 1;
        }
        self.events.push_back(record);
    }

    /// Sequence id of the oldest cached event, if any.
    pub fn first_sequence(&self) -> Option<u64> {
        self.events.front().map(|e| e.sequence)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && now >= self.expiration
    }
}

crate::builder! {
    pub struct SubscriptionBuilder => Subscription {
        into {
            owner: String = "alice",
            recipient: String = "",
        }
        set {
            id: SubscriptionId = SubscriptionId(1),
            mask: EventMask = EventMask::all(),
            user_data: Vec<u8> = Vec::new(),
            interval: u64 = 0,
            lease: u64 = 0,
            expiration: u64 = 0,
            next_sequence: u64 = 1,
        }
        option {
            printer: SmolStr = None,
            job: JobId = None,
            max_events: usize = None,
        }
        computed {
            events: VecDeque<EventRecord> = VecDeque::new(),
            overflowed: u64 = 0,
        }
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
