// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

struct FakeGroups(Vec<(&'static str, &'static str)>);

impl GroupLookup for FakeGroups {
    fn user_in_group(&self, user: &str, group: &str) -> bool {
        self.0.iter().any(|(u, g)| *u == user && *g == group)
    }
}

#[test]
fn anonymous_allows_anyone() {
    let policy = Policy::new("open", false)
        .rule(vec![Operation::PrintJob], RuleLevel::Anonymous);
    assert!(policy.check(Operation::PrintJob, "", None, &NoGroups));
    assert!(policy.check(Operation::PrintJob, "alice", None, &NoGroups));
}

#[test]
fn deny_all_refuses_everyone() {
    let policy =
        Policy::new("closed", true).rule(vec![Operation::DeletePrinter], RuleLevel::DenyAll);
    assert!(!policy.check(Operation::DeletePrinter, "root", None, &NoGroups));
}

#[parameterized(
    empty_user_denied = { "", None, false },
    empty_list_allows_any_user = { "carol", None, true },
    owner_allowed = { "alice", Some("alice"), true },
)]
fn user_rule_with_empty_list(user: &str, owner: Option<&str>, allowed: bool) {
    let policy =
        Policy::new("p", false).rule(vec![Operation::CancelJob], RuleLevel::User(Vec::new()));
    assert_eq!(policy.check(Operation::CancelJob, user, owner, &NoGroups), allowed);
}

#[parameterized(
    listed_user = { "bob", None, true },
    unlisted_user = { "carol", None, false },
    owner_beats_list = { "alice", Some("alice"), true },
    case_insensitive = { "BOB", None, true },
)]
fn user_rule_with_list(user: &str, owner: Option<&str>, allowed: bool) {
    let policy = Policy::new("p", false)
        .rule(vec![Operation::CancelJob], RuleLevel::User(vec!["bob".to_string()]));
    assert_eq!(policy.check(Operation::CancelJob, user, owner, &NoGroups), allowed);
}

#[test]
fn group_rule_uses_membership() {
    let groups = FakeGroups(vec![("alice", "lpadmin")]);
    let policy = Policy::new("p", false)
        .rule(vec![Operation::PausePrinter], RuleLevel::Group(vec!["lpadmin".to_string()]));

    assert!(policy.check(Operation::PausePrinter, "alice", None, &groups));
    assert!(!policy.check(Operation::PausePrinter, "bob", None, &groups));
    assert!(!policy.check(Operation::PausePrinter, "", None, &groups));
}

#[test]
fn first_matching_rule_wins() {
    let policy = Policy::new("p", false)
        .rule(vec![Operation::CancelJob], RuleLevel::DenyAll)
        .rule(vec![Operation::CancelJob], RuleLevel::Anonymous);
    assert!(!policy.check(Operation::CancelJob, "alice", None, &NoGroups));
}

#[test]
fn unmatched_operation_falls_back_to_default() {
    let strict = Policy::new("strict", false);
    assert!(!strict.check(Operation::PrintJob, "alice", None, &NoGroups));

    let lenient = Policy::new("lenient", true);
    assert!(lenient.check(Operation::PrintJob, "alice", None, &NoGroups));
}

#[test]
fn stock_default_shape() {
    let policy = Policy::stock_default(false);
    let groups = FakeGroups(vec![("admin", "lpadmin")]);

    assert!(policy.check(Operation::PrintJob, "", None, &groups));
    assert!(policy.check(Operation::CancelJob, "alice", Some("alice"), &groups));
    assert!(!policy.check(Operation::CancelJob, "", Some("alice"), &groups));
    assert!(policy.check(Operation::PausePrinter, "admin", None, &groups));
    assert!(!policy.check(Operation::PausePrinter, "alice", None, &groups));
}
