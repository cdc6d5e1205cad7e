//! Property-based tests for the core invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Topic confidence stays within [0, 1] under any feedback sequence
//! - Repeated success approaches but never reaches 1.0
//! - Every memory is owned by exactly one tier
//! - Recall over an unchanged store is deterministic

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use symbiont::config::{ConfidenceConfig, MemoryConfig};
use symbiont::models::FeedbackSignal;
use symbiont::services::RecallQuery;
use symbiont::storage::InMemoryStorage;
use symbiont::{
    ConfidenceEstimator, EmaConfidenceEstimator, MemoryId, MemoryItem, MemoryStore, RecallRanker,
    Tier, TieredMemoryStore, WeightedRecallRanker,
};

#[derive(Debug, Clone)]
enum Op {
    Store { id: u8, tier: u8, importance: f32 },
    Demote { id: u8 },
    Remove { id: u8 },
    Sweep { advance: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..24, 0u8..3, 0.0f32..=1.0).prop_map(|(id, tier, importance)| Op::Store { id, tier, importance }),
        1 => (0u8..24).prop_map(|id| Op::Demote { id }),
        1 => (0u8..24).prop_map(|id| Op::Remove { id }),
        1 => (0u64..1200).prop_map(|advance| Op::Sweep { advance }),
    ]
}

fn small_store() -> TieredMemoryStore {
    let config = MemoryConfig {
        working_capacity: 3,
        short_term_capacity: 5,
        ..MemoryConfig::default()
    };
    TieredMemoryStore::new(config, Arc::new(InMemoryStorage::new()))
}

fn owners(store: &TieredMemoryStore) -> Vec<MemoryId> {
    let mut ids = Vec::new();
    for tier in Tier::ALL {
        store.visit(tier, &mut |item| {
            assert_eq!(item.tier, tier, "item {} reports the wrong tier", item.id);
            ids.push(item.id.clone());
        });
    }
    ids
}

proptest! {
    /// Property: confidence stays within [0, 1] for any graded feedback.
    #[test]
    fn prop_confidence_bounded(scores in prop::collection::vec(-2.0f32..3.0, 1..60)) {
        let estimator = EmaConfidenceEstimator::new(ConfidenceConfig::default());
        for score in scores {
            let signal = FeedbackSignal::graded(score).expect("finite");
            let change = estimator.update("topic", signal, 1);
            prop_assert!((0.0..=1.0).contains(&change.after));
        }
        prop_assert!((0.0..=1.0).contains(&estimator.confidence("topic")));
    }

    /// Property: repeated success is monotone and stays below 1.0.
    #[test]
    fn prop_success_never_saturates(steps in 1usize..30) {
        let estimator = EmaConfidenceEstimator::new(ConfidenceConfig::default());
        let mut previous = estimator.confidence("topic");
        for _ in 0..steps {
            let change = estimator.update("topic", FeedbackSignal::SUCCESS, 1);
            prop_assert!(change.after > previous);
            prop_assert!(change.after < 1.0);
            previous = change.after;
        }
    }

    /// Property: no id is claimed by two tiers after any operation sequence.
    #[test]
    fn prop_single_tier_ownership(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let store = small_store();
        let mut now = 1_000;
        for op in ops {
            match op {
                Op::Store { id, tier, importance } => {
                    let tier = Tier::ALL[usize::from(tier)];
                    let item = MemoryItem::new(format!("m{id}"), vec![1.0, f32::from(id)], now)
                        .with_id(format!("m{id}"))
                        .with_topic("t")
                        .with_importance(importance)
                        .with_tier(tier);
                    let _ = store.store(item);
                },
                Op::Demote { id } => {
                    let _ = store.demote(&MemoryId::new(format!("m{id}")), now);
                },
                Op::Remove { id } => {
                    let _ = store.remove(&MemoryId::new(format!("m{id}")));
                },
                Op::Sweep { advance } => {
                    now += advance;
                    store.sweep_short_term(now);
                },
            }

            let ids = owners(&store);
            let unique: HashSet<&MemoryId> = ids.iter().collect();
            prop_assert_eq!(unique.len(), ids.len());
            for id in &ids {
                prop_assert!(store.locate(id).is_some());
            }
        }
    }

    /// Property: the same query over an unchanged store yields the same list.
    #[test]
    fn prop_recall_deterministic(
        vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 1..30),
        query in prop::collection::vec(-1.0f32..1.0, 4),
    ) {
        let store = TieredMemoryStore::new(MemoryConfig::default(), Arc::new(InMemoryStorage::new()));
        for (i, vector) in vectors.into_iter().enumerate() {
            let tier = Tier::ALL[i % 2];
            let item = MemoryItem::new(format!("m{i}"), vector, 500 + i as u64)
                .with_id(format!("m{i}"))
                .with_tier(tier);
            store.store(item).expect("store");
        }

        let ranker = WeightedRecallRanker::default();
        let request = RecallQuery { vector: &query, topic: None, limit: 10 };
        let first: Vec<MemoryId> = ranker
            .recall(&store, &request, 1_000)
            .into_iter()
            .map(|c| c.item.id)
            .collect();
        let second: Vec<MemoryId> = ranker
            .recall(&store, &request, 1_000)
            .into_iter()
            .map(|c| c.item.id)
            .collect();
        prop_assert_eq!(first, second);
    }
}
