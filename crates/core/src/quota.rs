// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling per-(printer, user) usage accounting.
//!
//! Rows are allocated on first use. Inside the current period the counts
//! just accumulate; once `next_update` passes, the row is recomputed from
//! the job table so history that slid out of the window stops counting.

use crate::job::{Job, JobId};
use crate::printer::QuotaLimits;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashMap;

/// Usage counters for one user on one printer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRow {
    pub next_update: u64,
    pub page_count: u32,
    pub k_count: u32,
}

/// Result of a quota update, including jobs that slid out of the window and
/// should be purged when auto-purge is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub page_count: u32,
    pub k_count: u32,
    pub purge: Vec<JobId>,
}

/// All quota rows, keyed by (printer, user), both case-folded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaLedger {
    rows: HashMap<(SmolStr, SmolStr), QuotaRow>,
}

impl QuotaLedger {
    pub fn row(&self, printer: &str, user: &str) -> Option<&QuotaRow> {
        self.rows.get(&key(printer, user))
    }

    /// Drop every row belonging to a deleted printer.
    pub fn remove_printer(&mut self, printer: &str) {
        let printer = fold(printer);
        self.rows.retain(|(p, _), _| *p != printer);
    }

    /// Record `pages`/`k` of completed work, recomputing the window when the
    /// period rolled over. Returns None when the printer enforces no limits.
    pub fn update<'a>(
        &mut self,
        printer: &str,
        limits: QuotaLimits,
        user: &str,
        pages: u32,
        k: u32,
        now: u64,
        jobs: impl IntoIterator<Item = &'a Job>,
        auto_purge: bool,
    ) -> Option<QuotaUsage> {
        if limits.page_limit == 0 && limits.k_limit == 0 {
            return None;
        }

        let row = self.rows.entry(key(printer, user)).or_default();

        if now < row.next_update {
            row.page_count += pages;
            row.k_count += k;
            return Some(QuotaUsage {
                page_count: row.page_count,
                k_count: row.k_count,
                purge: Vec::new(),
            });
        }

        // Period rolled over: rebuild the counts from jobs still inside the
        // window. The triggering job is in the table, so `pages`/`k` are not
        // added again here.
        let window_start = now.saturating_sub(limits.period);
        row.next_update = 0;
        row.page_count = 0;
        row.k_count = 0;

        let mut purge = Vec::new();
        let mut oldest: Option<u64> = None;

        for job in jobs {
            if !job.dest.eq_ignore_ascii_case(printer)
                || !job.user.eq_ignore_ascii_case(user)
            {
                continue;
            }
            let stamp = job.quota_time();
            if limits.period > 0 && stamp < window_start {
                if auto_purge {
                    purge.push(job.id);
                }
                continue;
            }
            row.page_count += job.sheets;
            row.k_count += job.k_octets;
            oldest = Some(oldest.map_or(stamp, |o| o.min(stamp)));
        }

        if let (Some(oldest), true) = (oldest, limits.period > 0) {
            row.next_update = oldest + limits.period;
        }

        Some(QuotaUsage {
            page_count: row.page_count,
            k_count: row.k_count,
            purge,
        })
    }

    /// Admission test: would `new_pages`/`new_k` cross a limit? Only
    /// enforced when the printer has a non-zero period.
    pub fn admits<'a>(
        &mut self,
        printer: &str,
        limits: QuotaLimits,
        user: &str,
        new_pages: u32,
        new_k: u32,
        now: u64,
        jobs: impl IntoIterator<Item = &'a Job>,
    ) -> bool {
        if !limits.enforced() {
            return true;
        }
        let Some(usage) = self.update(printer, limits, user, 0, 0, now, jobs, false) else {
            return true;
        };
        if limits.page_limit > 0 && usage.page_count + new_pages > limits.page_limit {
            return false;
        }
        if limits.k_limit > 0 && usage.k_count + new_k > limits.k_limit {
            return false;
        }
        true
    }
}

fn key(printer: &str, user: &str) -> (SmolStr, SmolStr) {
    (fold(printer), fold(user))
}

fn fold(s: &str) -> SmolStr {
    SmolStr::new(s.to_ascii_lowercase())
}

#[cfg(test)]
#[path = "quota_tests.rs"]
mod tests;
