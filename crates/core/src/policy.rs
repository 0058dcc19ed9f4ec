// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation policies: who may do what to whose jobs and printers.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Operations subject to policy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    PrintJob,
    CancelJob,
    HoldJob,
    ReleaseJob,
    RestartJob,
    MoveJob,
    PausePrinter,
    ResumePrinter,
    AcceptJobs,
    RejectJobs,
    ModifyPrinter,
    DeletePrinter,
    CreateSubscription,
    CancelSubscription,
}

crate::simple_display! {
    Operation {
        PrintJob => "print-job",
        CancelJob => "cancel-job",
        HoldJob => "hold-job",
        ReleaseJob => "release-job",
        RestartJob => "restart-job",
        MoveJob => "move-job",
        PausePrinter => "pause-printer",
        ResumePrinter => "resume-printer",
        AcceptJobs => "accept-jobs",
        RejectJobs => "reject-jobs",
        ModifyPrinter => "modify-printer",
        DeletePrinter => "delete-printer",
        CreateSubscription => "create-subscription",
        CancelSubscription => "cancel-subscription",
    }
}

/// Authorization level of one policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleLevel {
    /// Anyone, authenticated or not
    Anonymous,
    /// Nobody
    DenyAll,
    /// Authenticated user, optionally restricted to a list
    User(Vec<String>),
    /// Authenticated member of one of the named groups
    Group(Vec<String>),
}

/// One rule: the operations it covers and the level required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub ops: Vec<Operation>,
    pub level: RuleLevel,
}

/// Resolves group membership against the OS database (or a fake in tests).
pub trait GroupLookup {
    fn user_in_group(&self, user: &str, group: &str) -> bool;
}

/// A lookup that knows no groups; membership checks always fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGroups;

impl GroupLookup for NoGroups {
    fn user_in_group(&self, _user: &str, _group: &str) -> bool {
        false
    }
}

/// An ordered rule table referenced by printers via name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: SmolStr,
    pub rules: Vec<PolicyRule>,
    /// Applied when no rule covers the operation
    pub default_allow: bool,
}

impl Policy {
    pub fn new(name: impl Into<SmolStr>, default_allow: bool) -> Self {
        Self { name: name.into(), rules: Vec::new(), default_allow }
    }

    /// The stock policy: job operations open to the owner, printer
    /// administration denied.
    pub fn stock_default(default_allow: bool) -> Self {
        let mut policy = Policy::new("default", default_allow);
        policy.rules.push(PolicyRule {
            ops: vec![Operation::PrintJob, Operation::CreateSubscription],
            level: RuleLevel::Anonymous,
        });
        policy.rules.push(PolicyRule {
            ops: vec![
                Operation::CancelJob,
                Operation::HoldJob,
                Operation::ReleaseJob,
                Operation::RestartJob,
                Operation::MoveJob,
                Operation::CancelSubscription,
            ],
            level: RuleLevel::User(Vec::new()),
        });
        policy.rules.push(PolicyRule {
            ops: vec![
                Operation::PausePrinter,
                Operation::ResumePrinter,
                Operation::AcceptJobs,
                Operation::RejectJobs,
                Operation::ModifyPrinter,
                Operation::DeletePrinter,
            ],
            level: RuleLevel::Group(vec!["lpadmin".to_string()]),
        });
        policy
    }

    pub fn rule(mut self, ops: Vec<Operation>, level: RuleLevel) -> Self {
        self.rules.push(PolicyRule { ops, level });
        self
    }

    /// Check `op` for `user` against the first matching rule.
    ///
    /// User rules: an empty user is denied; an empty list admits any
    /// authenticated user; owning the object admits; otherwise the list
    /// decides. Group rules behave the same with membership in place of the
    /// list test.
    pub fn check(
        &self,
        op: Operation,
        user: &str,
        owner: Option<&str>,
        groups: &impl GroupLookup,
    ) -> bool {
        for rule in &self.rules {
            if !rule.ops.contains(&op) {
                continue;
            }
            return match &rule.level {
                RuleLevel::Anonymous => true,
                RuleLevel::DenyAll => false,
                RuleLevel::User(names) => {
                    if user.is_empty() {
                        false
                    } else if names.is_empty()
                        || owner.is_some_and(|o| o.eq_ignore_ascii_case(user))
                    {
                        true
                    } else {
                        names.iter().any(|n| n.eq_ignore_ascii_case(user))
                    }
                }
                RuleLevel::Group(names) => {
                    if user.is_empty() {
                        false
                    } else if names.is_empty()
                        || owner.is_some_and(|o| o.eq_ignore_ascii_case(user))
                    {
                        true
                    } else {
                        names.iter().any(|g| groups.user_in_group(user, g))
                    }
                }
            };
        }
        self.default_allow
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
