//! Property-based tests for the log invariants.
//!
//! Uses proptest to verify the store and projection invariants under
//! arbitrary delivery orders and duplications:
//! - watermarks are always the longest contiguous prefix from 1
//! - saves are idempotent under any amount of duplication
//! - rebuilds are deterministic across permutations

use std::collections::HashSet;
use std::sync::Arc;

use driftlog_core::projection::KeyValueProjection;
use driftlog_core::{Event, NodeId, Payload, ProjectionEngine, Storage, VectorClock};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

/// A permutation of the timestamps `1..=n` with some dropped: arbitrary
/// delivery order with holes.
fn delivery_strategy(max: u64) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::hash_set(1..=max, 0..max as usize)
        .prop_flat_map(|set| Just(set.into_iter().collect::<Vec<u64>>()).prop_shuffle())
}

/// Key/value payload events with small key space and arbitrary creation
/// timestamps, so permutations genuinely reorder them.
fn kv_events_strategy(len: usize) -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(
        (0..4u8, any::<i32>(), 0..1_000i64),
        1..len,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (key, value, created))| {
                let mut payload = Payload::new();
                payload.insert("key".to_string(), serde_json::json!(format!("k{}", key)));
                payload.insert("value".to_string(), serde_json::json!(value));
                let mut event = Event::new(NodeId::from("a"), (i + 1) as u64, payload);
                event.creation_timestamp = created;
                event
            })
            .collect()
    })
}

fn open_store(tmp: &TempDir) -> Storage {
    Storage::open(tmp.path().join("test.redb")).unwrap()
}

fn expected_watermark(delivered: &[u64]) -> u64 {
    let present: HashSet<u64> = delivered.iter().copied().collect();
    let mut mark = 0;
    while present.contains(&(mark + 1)) {
        mark += 1;
    }
    mark
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever order events arrive in, the watermark is exactly the
    /// longest contiguous prefix from 1, and every delivered event is
    /// present.
    #[test]
    fn watermark_is_longest_contiguous_prefix(delivered in delivery_strategy(12)) {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).events();
        let origin = NodeId::from("a");

        for &ts in &delivered {
            store
                .save_event(&Event::new(origin.clone(), ts, Payload::new()))
                .unwrap();
        }

        prop_assert_eq!(
            store.get_latest_timestamp_for_node(&origin).unwrap(),
            expected_watermark(&delivered)
        );
        prop_assert_eq!(
            store.get_event_count().unwrap(),
            delivered.len() as u64
        );
    }

    /// Saving each event k >= 1 times leaves store and watermark exactly
    /// as saving it once.
    #[test]
    fn save_is_idempotent(
        delivered in delivery_strategy(8),
        repeats in 1..4usize,
    ) {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).events();
        let origin = NodeId::from("a");

        let events: Vec<Event> = delivered
            .iter()
            .map(|&ts| Event::new(origin.clone(), ts, Payload::new()))
            .collect();

        for event in &events {
            store.save_event(event).unwrap();
        }
        let count_once = store.get_event_count().unwrap();
        let mark_once = store.get_latest_timestamp_for_node(&origin).unwrap();

        for _ in 0..repeats {
            for event in &events {
                prop_assert!(!store.save_event(event).unwrap());
            }
        }

        prop_assert_eq!(store.get_event_count().unwrap(), count_once);
        prop_assert_eq!(
            store.get_latest_timestamp_for_node(&origin).unwrap(),
            mark_once
        );
    }

    /// Batch save and one-by-one save agree on store contents and
    /// watermark.
    #[test]
    fn batch_save_matches_sequential(delivered in delivery_strategy(10)) {
        let origin = NodeId::from("a");
        let events: Vec<Event> = delivered
            .iter()
            .map(|&ts| Event::new(origin.clone(), ts, Payload::new()))
            .collect();

        let tmp_batch = TempDir::new().unwrap();
        let batch_store = open_store(&tmp_batch).events();
        batch_store.save_events(&events).unwrap();

        let tmp_seq = TempDir::new().unwrap();
        let seq_store = open_store(&tmp_seq).events();
        for event in &events {
            seq_store.save_event(event).unwrap();
        }

        prop_assert_eq!(
            batch_store.get_latest_timestamps_for_all_nodes().unwrap(),
            seq_store.get_latest_timestamps_for_all_nodes().unwrap()
        );
        prop_assert_eq!(
            batch_store.get_event_count().unwrap(),
            seq_store.get_event_count().unwrap()
        );
    }

    /// Two engines fed the same multiset of events in different orders
    /// rebuild to byte-identical projection states.
    #[test]
    fn rebuild_is_deterministic_across_permutations(
        mut events in kv_events_strategy(12),
        seed in any::<u64>(),
    ) {
        let tmp = TempDir::new().unwrap();
        let storage = open_store(&tmp);

        let mut first = ProjectionEngine::new(Arc::new(storage.projections()), 10_000);
        first.register(Box::new(KeyValueProjection::new()));
        first.rebuild(&events);
        let snapshot_a = first.snapshot_of("key_values").unwrap().unwrap();

        // Deterministic permutation from the seed.
        let len = events.len();
        for i in 0..len {
            let j = (seed as usize).wrapping_mul(31).wrapping_add(i * 17) % len;
            events.swap(i, j);
        }

        let mut second = ProjectionEngine::new(Arc::new(storage.projections()), 10_000);
        second.register(Box::new(KeyValueProjection::new()));
        second.rebuild(&events);
        let snapshot_b = second.snapshot_of("key_values").unwrap().unwrap();

        prop_assert_eq!(
            serde_json::to_vec(&snapshot_a).unwrap(),
            serde_json::to_vec(&snapshot_b).unwrap()
        );
    }

    /// Clock merge is commutative and dominates both inputs.
    #[test]
    fn clock_merge_laws(
        left in prop::collection::btree_map("[a-d]", 0..50u64, 0..4),
        right in prop::collection::btree_map("[a-d]", 0..50u64, 0..4),
    ) {
        let left: VectorClock = left
            .into_iter()
            .map(|(k, v)| (NodeId::from(k.as_str()), v))
            .collect();
        let right: VectorClock = right
            .into_iter()
            .map(|(k, v)| (NodeId::from(k.as_str()), v))
            .collect();

        let mut lr = left.clone();
        lr.merge(&right);
        let mut rl = right.clone();
        rl.merge(&left);

        prop_assert_eq!(&lr, &rl);
        prop_assert!(lr.dominates(&left));
        prop_assert!(lr.dominates(&right));

        // Idempotence
        let mut again = lr.clone();
        again.merge(&lr.clone());
        prop_assert_eq!(again, lr);
    }
}

/// Round-trip law: `Event::from_json(event.to_json())` is identity.
#[test]
fn event_json_roundtrip_identity() {
    let mut payload = Payload::new();
    payload.insert("t".to_string(), serde_json::json!("x"));
    payload.insert("nested".to_string(), serde_json::json!({"a": [1, 2, 3]}));
    let event = Event::new(NodeId::generate(), 42, payload);

    let decoded = Event::from_json(&event.to_json().unwrap()).unwrap();
    assert_eq!(decoded, event);
}
