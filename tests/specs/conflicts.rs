// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Constraint-resolution scenario: marking an envelope feed un-sticks the
//! duplex setting through the option defaults.

use press_core::{
    resolve_conflicts, Constraint, ConstraintSet, ConstraintTerm, OptionTable, PpdOption,
    ResolveOptions,
};

fn envelope_table() -> (OptionTable, ConstraintSet) {
    let mut table = OptionTable::default();
    table.insert(
        PpdOption::new("Duplex", "None")
            .choice("None")
            .choice("DuplexNoTumble")
            .choice("DuplexTumble"),
    );
    table.insert(
        PpdOption::new("InputSlot", "Tray1")
            .choice("Tray1")
            .choice("Tray2")
            .choice("Envelope"),
    );
    table.insert(PpdOption::new("Collate", "False").choice("False").choice("True"));

    let mut constraints = ConstraintSet::default();
    constraints.add(Constraint {
        terms: vec![
            ConstraintTerm::new("Duplex", "DuplexNoTumble"),
            ConstraintTerm::new("InputSlot", "Envelope"),
        ],
        resolver: None,
    });
    (table, constraints)
}

#[test]
fn envelope_selection_resolves_duplex_to_default() {
    let (mut table, constraints) = envelope_table();
    table.mark("Duplex", "DuplexNoTumble").expect("mark duplex");

    let resolved = resolve_conflicts(
        &table,
        &constraints,
        &[],
        "InputSlot",
        "Envelope",
        ResolveOptions::default(),
    )
    .expect("resolvable");

    assert!(resolved.contains(&("InputSlot".into(), "Envelope".into())));
    assert!(resolved.contains(&("Duplex".into(), "None".into())));
    // The server collates manually, so Collate never rides along
    assert!(!resolved.iter().any(|(option, _)| option == "Collate"));

    // Applying the augmented set leaves zero active constraints
    for (option, choice) in &resolved {
        table.mark(option, choice).expect("apply");
    }
    assert!(constraints.active(&table, &Default::default()).is_empty());
}

#[test]
fn resolution_failure_keeps_previous_marking() {
    let (mut table, mut constraints) = envelope_table();
    // A resolver that loops: it re-asserts the conflicting duplex choice
    constraints.constraints[0].resolver = Some("stuck".into());
    constraints.add_resolver(press_core::Resolver {
        name: "stuck".into(),
        actions: vec![("Duplex".into(), "DuplexNoTumble".into())],
    });
    table.mark("Duplex", "DuplexNoTumble").expect("mark duplex");
    let before = table.clone();

    let err = resolve_conflicts(
        &table,
        &constraints,
        &[],
        "InputSlot",
        "Envelope",
        ResolveOptions::default(),
    )
    .expect_err("loop must fail");
    assert!(matches!(err, press_core::ResolveError::Loop(_)));

    // The caller applied nothing: marking is untouched
    assert_eq!(table, before);
}
