// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-trip specs: serialize the destination and subscription tables,
//! reload them, and compare modulo volatile fields.

use press_core::{
    EventKind, EventMask, JobId, PrinterBuilder, QuotaLimits, SubscriptionBuilder, UserAccess,
};
use press_storage::{
    load_destinations, load_subscriptions, save_destinations, save_subscriptions,
};

#[test]
fn printers_reload_equal_modulo_volatile_fields() {
    let printers = vec![
        PrinterBuilder::default()
            .name("front")
            .info("Front Desk")
            .location("lobby")
            .device_uri("socket://10.1.0.4:9100")
            .quota(QuotaLimits { period: 86_400, page_limit: 100, k_limit: 65_536 })
            .access(UserAccess::Deny(vec!["guest".to_string()]))
            .build(),
        PrinterBuilder::default()
            .name("back")
            .info("Back Office")
            .state(press_core::PrinterState::Stopped)
            .state_message("paper out")
            .accepting(false)
            .build(),
    ];

    let mut buf = Vec::new();
    save_destinations(&mut buf, printers.iter(), Some("back"), false, chrono::Utc::now())
        .expect("save");
    let reloaded = load_destinations(&buf[..], "printers.conf");

    assert_eq!(reloaded.len(), 2);
    for (block, original) in reloaded.iter().zip(&printers) {
        let p = &block.printer;
        assert_eq!(p.name, original.name);
        assert_eq!(p.info, original.info);
        assert_eq!(p.location, original.location);
        assert_eq!(p.device_uri, original.device_uri);
        assert_eq!(p.state, original.state);
        assert_eq!(p.state_message, original.state_message);
        assert_eq!(p.accepting, original.accepting);
        assert_eq!(p.quota, original.quota);
        assert_eq!(p.access, original.access);
        assert_eq!(p.op_policy, original.op_policy);
        assert_eq!(p.error_policy, original.error_policy);
        // Volatile: history ring starts empty after reload
        assert!(p.history.is_empty());
    }
    assert!(reloaded[1].is_default);
}

#[test]
fn classes_reload_with_members() {
    let mut class = press_core::Printer::new_class(
        "everyone",
        vec!["front".into(), "back".into()],
    );
    class.accepting = true;
    class.state = press_core::PrinterState::Idle;

    let mut buf = Vec::new();
    save_destinations(
        &mut buf,
        std::iter::once(&class),
        None,
        true,
        chrono::Utc::now(),
    )
    .expect("save");
    let reloaded = load_destinations(&buf[..], "classes.conf");

    assert_eq!(reloaded.len(), 1);
    assert!(reloaded[0].printer.is_class());
    assert_eq!(reloaded[0].printer.members, class.members);
}

#[test]
fn subscriptions_reload_preserving_sequences() {
    let mut sub = SubscriptionBuilder::default()
        .id(press_core::SubscriptionId(3))
        .mask(EventMask::of(&[EventKind::JobCompleted]))
        .owner("alice")
        .recipient("mailto:alice@example.com")
        .job(JobId(12))
        .user_data(vec![0x01, 0x3c, 0xff])
        .interval(15)
        .lease(600)
        .expiration(1_000_600)
        .build();
    sub.next_sequence = 42;

    let mut buf = Vec::new();
    save_subscriptions(&mut buf, 4, std::iter::once(&sub), chrono::Utc::now()).expect("save");
    let reloaded = load_subscriptions(&buf[..], "subscriptions.conf");

    assert_eq!(reloaded.next_id, 4);
    let back = &reloaded.subscriptions[0];
    assert_eq!(back.id, sub.id);
    assert_eq!(back.mask, sub.mask);
    assert_eq!(back.owner, sub.owner);
    assert_eq!(back.recipient, sub.recipient);
    assert_eq!(back.job, sub.job);
    assert_eq!(back.user_data, sub.user_data);
    assert_eq!(back.interval, sub.interval);
    assert_eq!(back.lease, sub.lease);
    assert_eq!(back.expiration, sub.expiration);
    // The persisted next-event id survives so delivered sequences never
    // regress after a restart.
    assert_eq!(back.next_sequence, 42);
    // Volatile: the cached ring is not persisted
    assert!(back.events.is_empty());
}

#[test]
fn spool_ids_reseed_after_restart() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let spool = press_storage::SpoolDir::new(dir.path());
    spool.ensure().expect("ensure");

    for id in [3u32, 9, 5] {
        let job = press_core::JobBuilder::default().id(JobId(id)).build();
        spool.save_job(&job).expect("save");
    }

    // A fresh handle (as after restart) sees max + 1
    let fresh = press_storage::SpoolDir::new(dir.path());
    assert_eq!(fresh.next_job_id().expect("reseed"), JobId(10));
    let jobs = fresh.load_jobs().expect("load");
    let ids: Vec<u32> = jobs.iter().map(|j| j.id.0).collect();
    assert_eq!(ids, vec![3, 5, 9]);
}
