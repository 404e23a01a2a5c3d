#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;
use sombra_counts::counts::CountKey;
use sombra_counts::types::{CountsError, LabelId, PropId, TxId, TypeId};
use tempfile::tempdir;

use common::{assert_counts, base_graph, bootstrap, delta_graph, merge, open};

#[test]
fn counts_survive_rotation_and_reopen() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let graph = base_graph();
    {
        let tracker = open(&base);
        graph.apply_to(&tracker);
        tracker.rotate(TxId(1)).unwrap();
        tracker.close();
    }
    let tracker = open(&base);
    assert_eq!(tracker.tx_id().unwrap(), TxId(1));
    assert_counts(&tracker, &graph.expected());
    assert_eq!(tracker.get(&CountKey::node_label(LabelId(4))).unwrap(), 0);
}

#[test]
fn bootstrap_apply_rotate_reopen_reads_one() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let keys = [
        CountKey::node_label(LabelId(0)),
        CountKey::node_label(LabelId(1)),
        CountKey::relationship_type(TypeId(1)),
    ];
    {
        let tracker = open(&base);
        for key in keys {
            tracker.apply(key, 1).unwrap();
        }
        tracker.rotate(TxId(1)).unwrap();
    }
    let tracker = open(&base);
    for key in keys {
        assert_eq!(tracker.get(&key).unwrap(), 1, "{key}");
    }
}

#[test]
fn existing_store_takes_new_keys() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let mut expected = base_graph().expected();
    {
        let tracker = open(&base);
        base_graph().apply_to(&tracker);
        tracker.rotate(TxId(1)).unwrap();
        assert_counts(&tracker, &expected);

        let delta = delta_graph();
        delta.apply_to(&tracker);
        merge(&mut expected, &delta.expected());
        assert_counts(&tracker, &expected);
        assert_eq!(tracker.get(&CountKey::node_label(LabelId(4))).unwrap(), 1);
        assert_eq!(tracker.get(&CountKey::relationship_type(TypeId(2))).unwrap(), 1);

        tracker.rotate(TxId(2)).unwrap();
    }
    let tracker = open(&base);
    assert_eq!(tracker.tx_id().unwrap(), TxId(2));
    assert_counts(&tracker, &expected);
    assert_eq!(tracker.get(&CountKey::node_label(LabelId(4))).unwrap(), 1);
    assert_eq!(tracker.get(&CountKey::relationship_type(TypeId(2))).unwrap(), 1);
}

#[test]
fn repeated_reads_agree() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let tracker = open(&base);
    base_graph().apply_to(&tracker);
    let key = CountKey::relationship(Some(LabelId(0)), Some(TypeId(1)), None);
    let first = tracker.get(&key).unwrap();
    assert_eq!(first, tracker.get(&key).unwrap());
    tracker.rotate(TxId(3)).unwrap();
    let after = tracker.get(&key).unwrap();
    assert_eq!(after, first);
    assert_eq!(after, tracker.get(&key).unwrap());
}

#[test]
fn non_monotonic_rotation_leaves_state_unchanged() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let tracker = open(&base);
    let key = CountKey::index_statistic(LabelId(1), PropId(2));
    tracker.apply(key, 10).unwrap();
    tracker.rotate(TxId(5)).unwrap();
    tracker.apply(key, 1).unwrap();
    let path_before = tracker.store_path().unwrap();

    for stale in [TxId(5), TxId(4), TxId(0)] {
        assert!(matches!(
            tracker.rotate(stale),
            Err(CountsError::NonMonotonicTxId { .. })
        ));
    }
    assert_eq!(tracker.tx_id().unwrap(), TxId(5));
    assert_eq!(tracker.store_path().unwrap(), path_before);
    assert_eq!(tracker.get(&key).unwrap(), 11);

    tracker.rotate(TxId(6)).unwrap();
    drop(tracker);
    assert_eq!(open(&base).get(&key).unwrap(), 11);
}

#[test]
fn zero_net_keys_read_zero_after_reopen() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let key = CountKey::node_label(LabelId(9));
    {
        let tracker = open(&base);
        tracker.apply(key, 1).unwrap();
        tracker.apply(key, -1).unwrap();
        let report = tracker.rotate(TxId(1)).unwrap();
        assert_eq!(report.entries_written, 1);
    }
    assert_eq!(open(&base).get(&key).unwrap(), 0);
}

#[test]
fn rotation_without_updates_advances_tx_id() {
    let dir = tempdir().unwrap();
    let base = bootstrap(dir.path());
    let tracker = open(&base);
    let report = tracker.rotate(TxId(1)).unwrap();
    assert_eq!(report.entries_written, 0);
    let report = tracker.rotate(TxId(2)).unwrap();
    assert_eq!(report.previous_tx_id, TxId(1));
    assert_eq!(tracker.generation().unwrap().0, 2);
}

fn token() -> impl Strategy<Value = Option<u32>> {
    prop::option::of(0u32..4)
}

fn arb_key() -> impl Strategy<Value = CountKey> {
    prop_oneof![
        token().prop_map(|l| CountKey::NodeLabel { label: l.map(LabelId) }),
        token().prop_map(|t| CountKey::RelationshipType { rel_type: t.map(TypeId) }),
        (token(), token(), token()).prop_map(|(s, t, e)| CountKey::relationship(
            s.map(LabelId),
            t.map(TypeId),
            e.map(LabelId)
        )),
        (0u32..4, 0u32..4).prop_map(|(l, p)| CountKey::index_statistic(LabelId(l), PropId(p))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_update_sequence_round_trips(
        batches in prop::collection::vec(
            prop::collection::vec((arb_key(), -5i64..=5), 0..40),
            1..4,
        )
    ) {
        let dir = tempdir().unwrap();
        let base = bootstrap(dir.path());
        let mut expected: BTreeMap<CountKey, i64> = BTreeMap::new();
        {
            let tracker = open(&base);
            for (i, batch) in batches.iter().enumerate() {
                for (key, delta) in batch {
                    tracker.apply(*key, *delta).unwrap();
                    *expected.entry(*key).or_insert(0) += delta;
                }
                tracker.rotate(TxId(i as u64 + 1)).unwrap();
            }
        }
        let tracker = open(&base);
        for (key, value) in &expected {
            prop_assert_eq!(tracker.get(key).unwrap(), *value);
        }
    }
}
