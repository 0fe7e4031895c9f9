#![allow(non_snake_case)]

use super::*;
use crate::{
    game::GameSession,
    test_helpers::{
        RollbackLog,
        arb_game_session,
    },
};
use proptest::prelude::*;

fn moved_session(base: &GameSession, position: u32) -> GameSession {
    base.with_piece_at("red", 0, position).unwrap()
}

#[test]
fn apply_optimistic_update__new_id__display_shows_candidate() {
    // given
    let s0 = arb_game_session();
    let s1 = moved_session(&s0, 4);
    let mut store = OptimisticStore::new(s0.clone());

    // when
    store
        .apply_optimistic_update("m1".into(), s1.clone())
        .unwrap();

    // then
    assert_eq!(store.display_state(), &s1);
    assert_eq!(store.confirmed_state(), &s0);
    assert!(store.has_pending_updates());
}

#[test]
fn confirm_update__with_state__adopts_new_baseline() {
    // given
    let s0 = arb_game_session();
    let s1 = moved_session(&s0, 4);
    let mut store = OptimisticStore::new(s0);
    store
        .apply_optimistic_update("m1".into(), s1.clone())
        .unwrap();

    // when
    let confirmed = store.confirm_update(&"m1".into(), Some(s1.clone()));

    // then
    assert!(confirmed);
    assert_eq!(store.pending_len(), 0);
    assert_eq!(store.confirmed_state(), &s1);
    assert_eq!(store.display_state(), &s1);
}

#[test]
fn rollback_update__pending__restores_baseline_and_notifies_once() {
    // given
    let s0 = arb_game_session();
    let s1 = moved_session(&s0, 4);
    let log = RollbackLog::default();
    let mut store = OptimisticStore::new(s0.clone()).with_rollback_hook(log.hook());
    store
        .apply_optimistic_update("m1".into(), s1.clone())
        .unwrap();

    // when
    let discarded = store.rollback_update(&"m1".into());

    // then
    assert_eq!(discarded.map(|u| u.payload), Some(s1.clone()));
    assert_eq!(store.pending_len(), 0);
    assert_eq!(store.confirmed_state(), &s0);
    assert_eq!(store.display_state(), &s0);
    let rolled_back = log.entries();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].id, UpdateId::from("m1"));
    assert_eq!(rolled_back[0].payload, s1);
}

#[test]
fn apply_optimistic_update__duplicate_pending_id__is_rejected() {
    // given
    let s0 = arb_game_session();
    let s1 = moved_session(&s0, 4);
    let mut store = OptimisticStore::new(s0);
    store
        .apply_optimistic_update("m1".into(), s1.clone())
        .unwrap();

    // when
    let result = store.apply_optimistic_update("m1".into(), s1);

    // then
    assert_eq!(result, Err(StoreError::DuplicateUpdate("m1".into())));
    assert_eq!(store.pending_len(), 1);
}

#[test]
fn apply_optimistic_update__id_reused_after_confirm__is_accepted() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("m1".into(), 1).unwrap();
    store.confirm_update(&"m1".into(), Some(1));

    // when
    let result = store.apply_optimistic_update("m1".into(), 2);

    // then
    assert!(result.is_ok());
    assert_eq!(store.display_state(), &2);
}

#[test]
fn confirm_update__called_twice__second_call_changes_nothing() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("m1".into(), 1).unwrap();
    store.confirm_update(&"m1".into(), Some(1));

    // when
    let second = store.confirm_update(&"m1".into(), Some(7));

    // then
    assert!(!second);
    assert_eq!(store.confirmed_state(), &1);
    assert_eq!(store.display_state(), &1);
}

#[test]
fn confirm_update__after_rollback__is_ignored() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("m1".into(), 1).unwrap();
    store.rollback_update(&"m1".into());

    // when
    let late = store.confirm_update(&"m1".into(), Some(1));

    // then
    assert!(!late);
    assert_eq!(store.confirmed_state(), &0);
}

#[test]
fn rollback_update__called_twice__notifies_once() {
    // given
    let log = RollbackLog::default();
    let mut store = OptimisticStore::new(0u32).with_rollback_hook(log.hook());
    store.apply_optimistic_update("m1".into(), 1).unwrap();

    // when
    let first = store.rollback_update(&"m1".into());
    let second = store.rollback_update(&"m1".into());
    let unknown = store.rollback_update(&"nope".into());

    // then
    assert!(first.is_some());
    assert!(second.is_none());
    assert!(unknown.is_none());
    assert_eq!(log.entries().len(), 1);
}

#[test]
fn display_state__three_pending__shows_newest_payload_only() {
    // given
    let mut store = OptimisticStore::new(0u32);

    // when
    store.apply_optimistic_update("u1".into(), 1).unwrap();
    store.apply_optimistic_update("u2".into(), 2).unwrap();
    store.apply_optimistic_update("u3".into(), 3).unwrap();

    // then
    assert_eq!(store.display_state(), &3);
    assert_eq!(store.pending_len(), 3);
}

#[test]
fn display_state__newest_rolled_back__falls_back_to_previous_pending() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("u1".into(), 1).unwrap();
    store.apply_optimistic_update("u2".into(), 2).unwrap();

    // when
    store.rollback_update(&"u2".into());

    // then
    assert_eq!(store.display_state(), &1);
}

#[test]
fn reconcile__snapshot_matches_pending__confirms_that_update() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("u1".into(), 1).unwrap();
    store.apply_optimistic_update("u2".into(), 2).unwrap();

    // when
    let reconciled = store.reconcile(1);

    // then
    assert_eq!(reconciled.confirmed, vec![UpdateId::from("u1")]);
    assert!(!reconciled.unkeyed);
    assert_eq!(store.confirmed_state(), &1);
    assert_eq!(store.display_state(), &2);
}

#[test]
fn reconcile__no_pending_matches__replaces_baseline_and_keeps_pending() {
    // given
    let mut store = OptimisticStore::new(0u32);
    store.apply_optimistic_update("u1".into(), 1).unwrap();

    // when
    let reconciled = store.reconcile(5);

    // then
    assert!(reconciled.unkeyed);
    assert!(reconciled.confirmed.is_empty());
    assert_eq!(store.confirmed_state(), &5);
    assert_eq!(store.display_state(), &1);
}

#[test]
fn expire_stale__update_older_than_limit__is_rolled_back_with_notification() {
    // given
    let log = RollbackLog::default();
    let mut store = OptimisticStore::new(0u32)
        .with_max_pending_age(Some(Duration::from_secs(5)))
        .with_rollback_hook(log.hook());
    store.apply_optimistic_update("old".into(), 1).unwrap();
    let later = Instant::now() + Duration::from_secs(6);

    // when
    let expired = store.expire_stale(later);

    // then
    assert_eq!(expired, vec![UpdateId::from("old")]);
    assert!(!store.has_pending_updates());
    assert_eq!(store.display_state(), &0);
    assert_eq!(log.entries().len(), 1);
}

#[test]
fn expire_stale__update_within_limit__is_kept() {
    // given
    let mut store =
        OptimisticStore::new(0u32).with_max_pending_age(Some(Duration::from_secs(5)));
    store.apply_optimistic_update("fresh".into(), 1).unwrap();

    // when
    let expired = store.expire_stale(Instant::now());

    // then
    assert!(expired.is_empty());
    assert_eq!(store.pending_len(), 1);
}

#[test]
fn expire_stale__limit_disabled__never_expires() {
    // given
    let mut store = OptimisticStore::new(0u32).with_max_pending_age(None);
    store.apply_optimistic_update("u1".into(), 1).unwrap();
    let much_later = Instant::now() + Duration::from_secs(3600);

    // when
    let expired = store.expire_stale(much_later);

    // then
    assert!(expired.is_empty());
    assert_eq!(store.pending_len(), 1);
}

#[derive(Clone, Debug)]
enum Op {
    Apply(u8, u32),
    Confirm(u8, Option<u32>),
    Rollback(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0u32..100).prop_map(|(id, v)| Op::Apply(id, v)),
        (0u8..4, proptest::option::of(0u32..100)).prop_map(|(id, v)| Op::Confirm(id, v)),
        (0u8..4).prop_map(Op::Rollback),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn store__any_sequence_drained__display_equals_confirmed(
        ops in proptest::collection::vec(arb_op(), 0..40)
    ) {
        let mut store = OptimisticStore::new(0u32).with_max_pending_age(None);
        for op in ops {
            match op {
                Op::Apply(id, value) => {
                    let _ = store.apply_optimistic_update(UpdateId::new(id.to_string()), value);
                }
                Op::Confirm(id, value) => {
                    store.confirm_update(&UpdateId::new(id.to_string()), value);
                }
                Op::Rollback(id) => {
                    store.rollback_update(&UpdateId::new(id.to_string()));
                }
            }
            if !store.has_pending_updates() {
                prop_assert_eq!(store.display_state(), store.confirmed_state());
            }
        }

        let remaining: Vec<UpdateId> = store.pending_updates().map(|u| u.id.clone()).collect();
        for id in remaining {
            store.rollback_update(&id);
        }
        prop_assert_eq!(store.display_state(), store.confirmed_state());
    }
}
