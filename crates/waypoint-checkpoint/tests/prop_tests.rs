//! Property-based tests for waypoint-checkpoint.
//!
//! Covers:
//! 1. Checkpoint JSON serde roundtrip (arbitrary data)
//! 2. Memory vs Sqlite store equivalence
//! 3. Append-only semantics and fork isolation on both stores

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};

use waypoint_checkpoint::prelude::*;
use waypoint_core::error::{CheckpointError, WaypointError};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Generate an arbitrary JSON value with bounded depth.
fn arb_json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9_ \\-]{0,30}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z_]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_state() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::hash_map("[a-z_]{1,8}", arb_json_value(), 0..4)
        .prop_map(|m| m.into_iter().collect())
}

fn arb_metadata() -> impl Strategy<Value = CheckpointMetadata> {
    (
        prop_oneof![
            Just(CheckpointSource::Input),
            Just(CheckpointSource::Loop),
            Just(CheckpointSource::Interrupt),
            Just(CheckpointSource::Update),
        ],
        0..100usize,
        prop::collection::vec("[a-z_]{1,10}".prop_map(String::from), 0..3),
    )
        .prop_map(|(source, step, writes)| CheckpointMetadata::new(source, step).with_writes(writes))
}

fn arb_interrupt() -> impl Strategy<Value = Option<PendingInterrupt>> {
    proptest::option::of(
        (
            "[a-z_]{1,10}",
            arb_json_value(),
            prop::collection::vec(arb_json_value(), 0..3),
            prop::collection::vec(("[a-z_]{1,10}", arb_json_value()), 0..3),
        )
            .prop_map(|(node, payload, resume_values, writes)| {
                let mut pending = PendingInterrupt::node(node, payload);
                pending.resume_values = resume_values;
                pending.writes = writes
                    .into_iter()
                    .map(|(sibling, update)| PendingWrite::new(sibling, update))
                    .collect();
                pending
            }),
    )
}

/// Generate an arbitrary Checkpoint.
/// Uses second-precision timestamps to ensure SQLite roundtrip fidelity.
fn arb_checkpoint() -> impl Strategy<Value = Checkpoint> {
    (
        "[a-z0-9\\-]{1,16}",
        0..50u64,
        arb_state(),
        prop::collection::vec("[a-z_]{1,10}".prop_map(String::from), 0..3),
        arb_interrupt(),
        arb_metadata(),
        (1_700_000_000i64..1_800_000_000i64),
    )
        .prop_map(
            |(thread_id, sequence, state, next_nodes, interrupt, metadata, ts)| {
                let mut cp = Checkpoint::new(thread_id, sequence, state, next_nodes, metadata);
                cp.interrupt = interrupt;
                cp.created_at = Utc.timestamp_opt(ts, 0).unwrap();
                cp
            },
        )
}

fn loop_checkpoint(thread_id: &str, sequence: u64, state: Map<String, Value>) -> Checkpoint {
    let mut cp = Checkpoint::new(
        thread_id,
        sequence,
        state,
        vec![],
        CheckpointMetadata::new(CheckpointSource::Loop, sequence as usize),
    );
    cp.created_at = Utc
        .timestamp_opt(1_700_000_000 + sequence as i64, 0)
        .unwrap();
    cp
}

// ===========================================================================
// 1. Checkpoint JSON serde roundtrip
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn checkpoint_json_serde_roundtrip(cp in arb_checkpoint()) {
        let json_str = serde_json::to_string(&cp).unwrap();
        let deserialized: Checkpoint = serde_json::from_str(&json_str).unwrap();
        prop_assert_eq!(cp, deserialized);
    }
}

// ===========================================================================
// 2. Memory vs Sqlite store equivalence
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// put then get returns the same checkpoint for both stores.
    #[test]
    fn store_equivalence_put_get(cp in arb_checkpoint()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mem = MemoryCheckpointStore::new();
            let sqlite = SqliteCheckpointStore::in_memory().unwrap();

            mem.put(cp.clone()).await.unwrap();
            sqlite.put(cp.clone()).await.unwrap();

            let m = mem.get(&cp.thread_id, Some(cp.sequence)).await.unwrap().unwrap();
            let s = sqlite.get(&cp.thread_id, Some(cp.sequence)).await.unwrap().unwrap();

            assert_eq!(m, cp);
            assert_eq!(s, cp);
        });
    }

    /// history returns the same ascending checkpoints from both stores,
    /// whatever the insertion order.
    #[test]
    fn store_equivalence_history_ordering(
        sequence_order in prop::collection::vec(0..20u64, 1..8),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mem = MemoryCheckpointStore::new();
            let sqlite = SqliteCheckpointStore::in_memory().unwrap();
            let thread_id = "order-thread";

            let mut seen = HashSet::new();
            for &seq in &sequence_order {
                if !seen.insert(seq) {
                    continue;
                }
                let mut state = Map::new();
                state.insert("s".into(), Value::Number(seq.into()));
                let cp = loop_checkpoint(thread_id, seq, state);
                mem.put(cp.clone()).await.unwrap();
                sqlite.put(cp).await.unwrap();
            }

            let m_list = mem.history(thread_id).await.unwrap();
            let s_list = sqlite.history(thread_id).await.unwrap();
            assert_eq!(m_list, s_list);
            for w in m_list.windows(2) {
                assert!(w[0].sequence < w[1].sequence, "history not ascending");
            }

            let m_latest = mem.get_latest(thread_id).await.unwrap();
            let s_latest = sqlite.get_latest(thread_id).await.unwrap();
            assert_eq!(m_latest, s_latest);
            assert_eq!(m_latest.unwrap().sequence, *seen.iter().max().unwrap());
        });
    }

    /// delete_thread then history returns empty for both stores.
    #[test]
    fn store_equivalence_delete(cp in arb_checkpoint()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mem = MemoryCheckpointStore::new();
            let sqlite = SqliteCheckpointStore::in_memory().unwrap();

            mem.put(cp.clone()).await.unwrap();
            sqlite.put(cp.clone()).await.unwrap();

            mem.delete_thread(&cp.thread_id).await.unwrap();
            sqlite.delete_thread(&cp.thread_id).await.unwrap();

            assert!(mem.history(&cp.thread_id).await.unwrap().is_empty());
            assert!(sqlite.history(&cp.thread_id).await.unwrap().is_empty());
        });
    }
}

// ===========================================================================
// 3. Append-only and fork isolation
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// A second put at an existing sequence is rejected and the original survives.
    #[test]
    fn second_put_never_overwrites(first in arb_state(), second in arb_state()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let stores: Vec<Box<dyn CheckpointStore>> = vec![
                Box::new(MemoryCheckpointStore::new()),
                Box::new(SqliteCheckpointStore::in_memory().unwrap()),
            ];
            for store in &stores {
                store.put(loop_checkpoint("t", 0, first.clone())).await.unwrap();
                let err = store
                    .put(loop_checkpoint("t", 0, second.clone()))
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    WaypointError::Checkpoint(CheckpointError::SequenceConflict { .. })
                ));
                let stored = store.get("t", Some(0)).await.unwrap().unwrap();
                assert_eq!(stored.state, first);
            }
        });
    }

    /// Appending to a fork leaves the source thread's history unchanged.
    #[test]
    fn fork_is_isolated(
        states in prop::collection::vec(arb_state(), 1..5),
        at in 0..5usize,
        extra in arb_state(),
    ) {
        let at = (at % states.len()) as u64;
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = SqliteCheckpointStore::in_memory().unwrap();
            for (i, state) in states.iter().enumerate() {
                store
                    .put(loop_checkpoint("src", i as u64, state.clone()))
                    .await
                    .unwrap();
            }
            let before = store.history("src").await.unwrap();

            let forked = store.fork("src", at, Map::new()).await.unwrap();
            store.put(loop_checkpoint(&forked, 1, extra.clone())).await.unwrap();
            store.put(loop_checkpoint(&forked, 2, extra.clone())).await.unwrap();

            assert_eq!(store.history("src").await.unwrap(), before);
            let fork_history = store.history(&forked).await.unwrap();
            assert_eq!(fork_history.len(), 3);
            assert_eq!(fork_history[0].state, states[at as usize]);
        });
    }
}
