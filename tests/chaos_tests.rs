//! Chaos testing for concurrent access.
//!
//! Tests concurrent operations to find race conditions and deadlocks:
//! - Concurrent admission and recall across tiers
//! - Consolidation running against live writes
//! - Racing feedback on one decision
//! - Concurrent utterances from many sessions

// Chaos tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
// Excessive nesting is acceptable in concurrent test code with thread spawns
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::excessive_nesting,
    clippy::cast_precision_loss
)]

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use symbiont::config::{MemoryConfig, SymbiontConfig};
use symbiont::services::RecallQuery;
use symbiont::storage::InMemoryStorage;
use symbiont::{
    InteractionService, MemoryId, MemoryItem, MemoryStore, RecallRanker, SessionContext,
    TemplateResponder, Tier, TieredMemoryStore, WeightedRecallRanker,
};

fn join_within(handles: Vec<thread::JoinHandle<()>>, timeout: Duration) {
    let start = Instant::now();
    for handle in handles {
        handle.join().expect("worker panicked");
    }
    assert!(start.elapsed() < timeout, "workers took too long, possible deadlock");
}

fn assert_single_ownership(store: &TieredMemoryStore) {
    let mut seen = HashSet::new();
    for tier in Tier::ALL {
        store.visit(tier, &mut |item| {
            assert!(seen.insert(item.id.clone()), "{} owned twice", item.id);
        });
    }
}

/// Test: writers and readers on every tier never deadlock or duplicate items.
#[test]
fn test_concurrent_admission_and_recall() {
    let config = MemoryConfig {
        working_capacity: 4,
        short_term_capacity: 16,
        ..MemoryConfig::default()
    };
    let store = Arc::new(TieredMemoryStore::new(config, Arc::new(InMemoryStorage::new())));
    let ranker = Arc::new(WeightedRecallRanker::default());
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for t in 0..4 {
        let store = Arc::clone(&store);
        let completed = Arc::clone(&completed);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let tier = Tier::ALL[(t + i) % 3];
                let item = MemoryItem::new(format!("t{t}-{i}"), vec![1.0, (i % 7) as f32], 1_000)
                    .with_id(format!("t{t}-{i}"))
                    .with_topic("chaos")
                    .with_importance(0.8)
                    .with_tier(tier);
                store.store(item).expect("store");
                completed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let ranker = Arc::clone(&ranker);
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                let query = RecallQuery {
                    vector: &[1.0, 3.0],
                    topic: Some("chaos"),
                    limit: 10,
                };
                let results = ranker.recall(store.as_ref(), &query, 1_000);
                assert!(results.len() <= 10);
            }
        }));
    }
    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for step in 0..50 {
                store.sweep_short_term(1_000 + step * 30);
            }
        }));
    }

    join_within(handles, Duration::from_secs(30));
    assert_eq!(completed.load(Ordering::SeqCst), 400);
    assert_single_ownership(&store);
}

/// Test: racing stores of one id admit it exactly once.
#[test]
fn test_racing_stores_of_same_id() {
    for round in 0..50 {
        let config = MemoryConfig {
            working_capacity: 1,
            ..MemoryConfig::default()
        };
        let store = Arc::new(TieredMemoryStore::new(config, Arc::new(InMemoryStorage::new())));
        let barrier = Arc::new(Barrier::new(4));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    let item = MemoryItem::new(format!("shared {round}"), vec![1.0], 1_000)
                        .with_id("shared")
                        .with_importance(0.5);
                    barrier.wait();
                    if store.store(item).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        join_within(handles, Duration::from_secs(10));

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(store.count(Tier::Working) + store.count(Tier::ShortTerm), 1);
        assert_single_ownership(&store);
    }
}

/// Test: demotion and merging race with updates without losing ownership.
#[test]
fn test_demote_and_merge_race_with_updates() {
    let store = Arc::new(TieredMemoryStore::new(
        MemoryConfig::default(),
        Arc::new(InMemoryStorage::new()),
    ));
    for i in 0..40 {
        let item = MemoryItem::new(format!("m{i}"), vec![1.0, 0.0], 1_000)
            .with_id(format!("m{i}"))
            .with_topic("race")
            .with_importance(0.9)
            .with_tier(Tier::LongTerm);
        store.store(item).expect("store");
    }

    let mut handles = Vec::new();
    for t in 0..3 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..40 {
                let survivor = MemoryId::new(format!("m{}", (i + t) % 40));
                let absorbed = MemoryId::new(format!("m{}", (i + t + 1) % 40));
                let _ = store.merge(&survivor, &absorbed, 2_000);
            }
        }));
    }
    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..40 {
                let _ = store.demote(&MemoryId::new(format!("m{i}")), 2_000);
            }
        }));
    }
    {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..40 {
                let _ = store.update(&MemoryId::new(format!("m{i}")), &mut |item| {
                    item.importance = 0.95;
                });
            }
        }));
    }

    join_within(handles, Duration::from_secs(30));
    assert_single_ownership(&store);
}

/// Test: many sessions talking at once each get an answer and a decision.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions() {
    let service = Arc::new(
        InteractionService::builder(SymbiontConfig::default())
            .with_storage(Arc::new(InMemoryStorage::new()))
            .with_generator(Arc::new(TemplateResponder))
            .build()
            .expect("build"),
    );

    let mut tasks = Vec::new();
    for s in 0..16 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            let session = SessionContext::new(format!("user-{s}"));
            let mut decisions = Vec::new();
            for i in 0..5 {
                let answer = service
                    .handle_utterance(&format!("question {i} about topic{}", s % 3), &session)
                    .await
                    .expect("answer");
                assert!(!answer.text.is_empty());
                decisions.push(answer.decision_id);
            }
            decisions
        }));
    }

    let mut all = HashSet::new();
    for task in tasks {
        for id in task.await.expect("task") {
            assert!(all.insert(id), "decision id reused");
        }
    }
    assert_eq!(all.len(), 80);
}

/// Test: racing explicit feedback on one decision applies exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_feedback_applies_once() {
    let service = Arc::new(
        InteractionService::builder(SymbiontConfig::default())
            .with_storage(Arc::new(InMemoryStorage::new()))
            .with_generator(Arc::new(TemplateResponder))
            .build()
            .expect("build"),
    );
    let session = SessionContext::new("racer").with_topic_hint("race");
    let answer = service
        .handle_utterance("who wins the race", &session)
        .await
        .expect("answer");

    let applied = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let applied = Arc::clone(&applied);
            let id = answer.decision_id.clone();
            thread::spawn(move || {
                if service.submit_feedback(&id, 1.0).is_ok() {
                    applied.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    join_within(handles, Duration::from_secs(10));

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    let topic = service.topics().into_iter().find(|t| t.name == "race").expect("topic");
    assert_eq!(topic.interactions, 1);
    assert!((topic.confidence - 0.44).abs() < 1e-4);
}
