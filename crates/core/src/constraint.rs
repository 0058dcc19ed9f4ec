// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Option constraints and conflict resolution.
//!
//! A constraint forbids a combination of marked choices. Resolution takes a
//! set of pending changes plus the newly-selected option and augments the set
//! until no constraint is active, preferring a constraint's named resolver,
//! then option defaults, then the remaining choices.

use crate::options::{is_custom_choice, OptionTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Default bound on resolution passes. Tunable via [`ResolveOptions`].
pub const DEFAULT_MAX_PASSES: usize = 100;

/// One term of a constraint: an option and an optional choice.
///
/// A term without a choice is satisfied by any marked choice other than
/// `None`, `Off`, or `False`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintTerm {
    pub option: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<SmolStr>,
}

impl ConstraintTerm {
    pub fn new(option: impl Into<SmolStr>, choice: impl Into<SmolStr>) -> Self {
        Self { option: option.into(), choice: Some(choice.into()) }
    }

    pub fn any(option: impl Into<SmolStr>) -> Self {
        Self { option: option.into(), choice: None }
    }
}

/// A forbidden combination of option choices, active when every term matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub terms: Vec<ConstraintTerm>,
    /// Remediation hint looked up in the printer's resolver table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<SmolStr>,
}

/// A named remediation: option/choice assignments that un-stick a marking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolver {
    pub name: SmolStr,
    pub actions: Vec<(SmolStr, SmolStr)>,
}

/// Constraint table attached to a printer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub resolvers: IndexMap<SmolStr, Resolver>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty() && self.resolvers.is_empty()
    }

    pub fn add(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn add_resolver(&mut self, resolver: Resolver) {
        self.resolvers.insert(lower(&resolver.name), resolver);
    }

    pub fn resolver(&self, name: &str) -> Option<&Resolver> {
        self.resolvers.get(&lower(name))
    }

    /// Constraints whose every term matches the current marking plus the
    /// overlay of proposed changes.
    pub fn active<'a>(
        &'a self,
        table: &OptionTable,
        overlay: &IndexMap<SmolStr, SmolStr>,
    ) -> Vec<&'a Constraint> {
        self.constraints
            .iter()
            .filter(|c| constraint_active(c, table, overlay))
            .collect()
    }
}

fn constraint_active(
    constraint: &Constraint,
    table: &OptionTable,
    overlay: &IndexMap<SmolStr, SmolStr>,
) -> bool {
    !constraint.terms.is_empty()
        && constraint.terms.iter().all(|t| term_matches(t, table, overlay))
}

/// Effective choice of an option under the overlay, honoring the
/// PageSize/PageRegion logical-size rule.
fn effective_choice(
    option: &str,
    table: &OptionTable,
    overlay: &IndexMap<SmolStr, SmolStr>,
) -> Option<SmolStr> {
    if option.eq_ignore_ascii_case("PageSize") || option.eq_ignore_ascii_case("PageRegion") {
        for key in ["PageSize", "PageRegion"] {
            if let Some(v) = overlay_get(overlay, key) {
                return Some(v.clone());
            }
        }
        return table.logical_page_size().cloned();
    }
    if let Some(v) = overlay_get(overlay, option) {
        return Some(v.clone());
    }
    table.marked_choice(option).cloned()
}

fn overlay_get<'a>(
    overlay: &'a IndexMap<SmolStr, SmolStr>,
    option: &str,
) -> Option<&'a SmolStr> {
    overlay
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(option))
        .map(|(_, v)| v)
}

fn term_matches(
    term: &ConstraintTerm,
    table: &OptionTable,
    overlay: &IndexMap<SmolStr, SmolStr>,
) -> bool {
    // AP_FIRSTPAGE_X is satisfied by either the first-page option or the
    // plain option carrying the named choice.
    if let Some(base) = term.option.strip_prefix("AP_FIRSTPAGE_") {
        let plain = ConstraintTerm { option: SmolStr::new(base), choice: term.choice.clone() };
        let direct = ConstraintTerm {
            option: term.option.clone(),
            choice: term.choice.clone(),
        };
        return choice_matches(&direct, table, overlay) || choice_matches(&plain, table, overlay);
    }
    choice_matches(term, table, overlay)
}

fn choice_matches(
    term: &ConstraintTerm,
    table: &OptionTable,
    overlay: &IndexMap<SmolStr, SmolStr>,
) -> bool {
    let Some(marked) = effective_choice(&term.option, table, overlay) else {
        return false;
    };
    match &term.choice {
        None => {
            !marked.eq_ignore_ascii_case("None")
                && !marked.eq_ignore_ascii_case("Off")
                && !marked.eq_ignore_ascii_case("False")
        }
        Some(want) => {
            if is_custom_choice(&marked) {
                want.eq_ignore_ascii_case("Custom")
            } else {
                marked.eq_ignore_ascii_case(want)
            }
        }
    }
}

/// Tunables for [`resolve_conflicts`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Upper bound on resolution passes before giving up
    pub max_passes: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { max_passes: DEFAULT_MAX_PASSES }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The same resolver was consulted twice in one resolution.
    #[error("constraint resolver loop at {0}")]
    Loop(SmolStr),
    /// No conflict-free augmentation found within the pass bound.
    #[error("constraints could not be resolved")]
    Unresolved,
}

/// Attempt to augment `changes` + the newly selected `(new_option,
/// new_choice)` into a set that activates zero constraints.
///
/// On success the returned set includes the new selection and every addition
/// made; `Collate` is removed unless it was the trigger (the server collates
/// manually). On failure the caller keeps its previous marking.
pub fn resolve_conflicts(
    table: &OptionTable,
    constraints: &ConstraintSet,
    changes: &[(SmolStr, SmolStr)],
    new_option: &str,
    new_choice: &str,
    opts: ResolveOptions,
) -> Result<Vec<(SmolStr, SmolStr)>, ResolveError> {
    let mut overlay: IndexMap<SmolStr, SmolStr> = changes.iter().cloned().collect();
    overlay.insert(SmolStr::new(new_option), SmolStr::new(new_choice));

    // Resolvers applied in any earlier pass; hitting one again is a loop.
    let mut used_resolvers: Vec<SmolStr> = Vec::new();

    for _pass in 0..opts.max_passes {
        let active: Vec<Constraint> =
            constraints.active(table, &overlay).into_iter().cloned().collect();
        if active.is_empty() {
            let mut result: Vec<(SmolStr, SmolStr)> = overlay.into_iter().collect();
            if !new_option.eq_ignore_ascii_case("Collate") {
                result.retain(|(k, _)| !k.eq_ignore_ascii_case("Collate"));
            }
            return Ok(result);
        }

        // Resolvers applied earlier in this pass; a second constraint naming
        // the same one is skipped, not failed.
        let mut pass_resolvers: Vec<SmolStr> = Vec::new();
        let mut progressed = false;
        for constraint in &active {
            if !constraint_active(constraint, table, &overlay) {
                continue; // fixed by an earlier remediation this pass
            }
            match &constraint.resolver {
                Some(name) => {
                    if pass_resolvers.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                        continue;
                    }
                    if used_resolvers.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                        return Err(ResolveError::Loop(name.clone()));
                    }
                    pass_resolvers.push(name.clone());
                    used_resolvers.push(name.clone());
                    let resolver =
                        constraints.resolver(name).ok_or(ResolveError::Unresolved)?;
                    for (opt, choice) in &resolver.actions {
                        if protects(new_option, opt) {
                            continue;
                        }
                        overlay.insert(opt.clone(), choice.clone());
                        progressed = true;
                    }
                }
                None => {
                    if remediate_without_resolver(
                        table,
                        constraint,
                        new_option,
                        &mut overlay,
                    ) {
                        progressed = true;
                    }
                }
            }
        }

        if !progressed {
            return Err(ResolveError::Unresolved);
        }
    }

    Err(ResolveError::Unresolved)
}

/// The newly-selected option must not be re-changed; PageSize and PageRegion
/// shadow each other.
fn protects(new_option: &str, candidate: &str) -> bool {
    if candidate.eq_ignore_ascii_case(new_option) {
        return true;
    }
    let page = |s: &str| {
        s.eq_ignore_ascii_case("PageSize") || s.eq_ignore_ascii_case("PageRegion")
    };
    page(new_option) && page(candidate)
}

/// Try the default choice, then the remaining choices, for each
/// non-installable option of a resolver-less constraint. Returns true when
/// an assignment deactivated the constraint.
fn remediate_without_resolver(
    table: &OptionTable,
    constraint: &Constraint,
    new_option: &str,
    overlay: &mut IndexMap<SmolStr, SmolStr>,
) -> bool {
    for term in &constraint.terms {
        if protects(new_option, &term.option) {
            continue;
        }
        let Some(option) = table.get(&term.option) else {
            continue;
        };
        if option.installable {
            continue;
        }

        let current =
            effective_choice(&term.option, table, overlay).unwrap_or_default();

        let mut candidates: Vec<SmolStr> = vec![option.default_choice.clone()];
        candidates.extend(
            option
                .choices
                .iter()
                .map(|c| c.name.clone())
                .filter(|c| {
                    !c.eq_ignore_ascii_case(&current)
                        && !c.eq_ignore_ascii_case(&option.default_choice)
                        && !c.eq_ignore_ascii_case("Custom")
                }),
        );

        for candidate in candidates {
            if candidate.eq_ignore_ascii_case(&current) {
                continue;
            }
            let mut trial = overlay.clone();
            trial.insert(option.keyword.clone(), candidate.clone());
            if !constraint_active(constraint, table, &trial) {
                overlay.insert(option.keyword.clone(), candidate);
                return true;
            }
        }
    }
    false
}

fn lower(s: &str) -> SmolStr {
    SmolStr::new(s.to_ascii_lowercase())
}

#[cfg(test)]
#[path = "constraint_tests.rs"]
mod tests;
