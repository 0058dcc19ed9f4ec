// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use press_core::{EventKind, SubscriptionBuilder};
use proptest::prelude::*;

fn write_to_string(next_id: u32, subs: &[Subscription]) -> String {
    let mut buf = Vec::new();
    save_subscriptions(&mut buf, next_id, subs.iter(), chrono::Utc::now()).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn full_block_round_trips() {
    let sub = SubscriptionBuilder::default()
        .id(SubscriptionId(17))
        .mask(EventMask::of(&[EventKind::JobStateChanged, EventKind::JobCompleted]))
        .owner("alice")
        .recipient("mailto:alice@example.com")
        .printer("lp1")
        .job(JobId(3))
        .user_data(b"hi".to_vec())
        .interval(30)
        .max_events(4usize)
        .lease(3_600)
        .expiration(1_700_000_000)
        .next_sequence(12)
        .build();

    let text = write_to_string(18, &[sub.clone()]);
    assert!(text.contains("NextSubscriptionId 18"));
    assert!(text.contains("<Subscription 17>"));

    let parsed = load_subscriptions(text.as_bytes(), "subscriptions.conf");
    assert_eq!(parsed.next_id, 18);
    assert_eq!(parsed.subscriptions.len(), 1);
    let back = &parsed.subscriptions[0];
    assert_eq!(back.id, sub.id);
    assert_eq!(back.mask, sub.mask);
    assert_eq!(back.owner, sub.owner);
    assert_eq!(back.recipient, sub.recipient);
    assert_eq!(back.printer, sub.printer);
    assert_eq!(back.job, sub.job);
    assert_eq!(back.user_data, sub.user_data);
    assert_eq!(back.interval, sub.interval);
    assert_eq!(back.max_events, Some(4));
    assert_eq!(back.lease, sub.lease);
    assert_eq!(back.expiration, sub.expiration);
    assert_eq!(back.next_sequence, sub.next_sequence);
}

#[test]
fn all_mask_round_trips() {
    let sub = SubscriptionBuilder::default().id(SubscriptionId(1)).build();
    let text = write_to_string(2, &[sub]);
    assert!(text.contains("Events all"));

    let parsed = load_subscriptions(text.as_bytes(), "subscriptions.conf");
    assert_eq!(parsed.subscriptions[0].mask, EventMask::all());
}

#[test]
fn user_data_escapes() {
    assert_eq!(encode_user_data(b"plain"), "plain");
    assert_eq!(encode_user_data(b"a<b"), "a<3C>b");
    assert_eq!(encode_user_data(&[0x00, 0xff, b'!']), "<00><FF>!");

    assert_eq!(decode_user_data("a<3C>b").unwrap(), b"a<b");
    assert_eq!(decode_user_data("<00><FF>!").unwrap(), vec![0x00, 0xff, b'!']);
    assert!(decode_user_data("<zz>").is_none());
    assert!(decode_user_data("<3").is_none());
}

#[test]
fn malformed_block_is_skipped() {
    let text = "\
NextSubscriptionId 5
<Subscription 1>
Events all
JobId notanumber
</Subscription>
<Subscription 2>
Events job-created
Owner bob
</Subscription>
";
    let parsed = load_subscriptions(text.as_bytes(), "subscriptions.conf");
    assert_eq!(parsed.subscriptions.len(), 1);
    assert_eq!(parsed.subscriptions[0].id, SubscriptionId(2));
    assert_eq!(parsed.subscriptions[0].owner, "bob");
}

#[test]
fn next_id_never_collides_with_loaded_blocks() {
    let text = "\
NextSubscriptionId 2
<Subscription 9>
Events all
</Subscription>
";
    let parsed = load_subscriptions(text.as_bytes(), "subscriptions.conf");
    assert_eq!(parsed.next_id, 10);
}

#[test]
fn empty_file_defaults() {
    let parsed = load_subscriptions(&b""[..], "subscriptions.conf");
    assert_eq!(parsed.next_id, 1);
    assert!(parsed.subscriptions.is_empty());
}

proptest! {
    #[test]
    fn user_data_round_trips(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let encoded = encode_user_data(&data);
        prop_assert_eq!(decode_user_data(&encoded).unwrap(), data);
    }
}
