//! Benchmarks for recall over a populated store.
//!
//! Benchmark targets:
//! - 100 memories: <1ms
//! - 1,000 memories: <5ms
//! - 10,000 memories: <50ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use symbiont::config::MemoryConfig;
use symbiont::services::RecallQuery;
use symbiont::storage::InMemoryStorage;
use symbiont::{
    FeatureExtractor, HashingFeatureExtractor, MemoryItem, MemoryStore, RecallRanker, Tier,
    TieredMemoryStore, WeightedRecallRanker,
};

const TOPICS: [&str; 8] = [
    "python", "rust", "sqlite", "tokio", "cooking", "travel", "music", "chess",
];

fn populated_store(size: usize, extractor: &HashingFeatureExtractor) -> TieredMemoryStore {
    let config = MemoryConfig {
        short_term_capacity: size,
        ..MemoryConfig::default()
    };
    let store = TieredMemoryStore::new(config, Arc::new(InMemoryStorage::new()));
    for i in 0..size {
        let topic = TOPICS[i % TOPICS.len()];
        let text = format!("note {i} about {topic} and related detail {}", i % 13);
        let features = extractor.extract(&text, Some(topic)).expect("extract");
        let tier = match i % 10 {
            0 => Tier::Working,
            1..=4 => Tier::ShortTerm,
            _ => Tier::LongTerm,
        };
        let item = MemoryItem::new(text, features.vector, 1_000 + i as u64)
            .with_topic(topic)
            .with_importance(0.6)
            .with_tier(tier);
        store.store(item).expect("store");
    }
    store
}

fn bench_recall(c: &mut Criterion) {
    let extractor = HashingFeatureExtractor::default();
    let ranker = WeightedRecallRanker::default();
    let query = extractor
        .extract("tell me about rust ownership", None)
        .expect("extract");

    let mut group = c.benchmark_group("recall");
    for size in [100, 1_000, 10_000] {
        let store = populated_store(size, &extractor);
        group.bench_with_input(BenchmarkId::from_parameter(size), &store, |b, store| {
            b.iter(|| {
                let request = RecallQuery {
                    vector: &query.vector,
                    topic: Some("rust"),
                    limit: 10,
                };
                black_box(ranker.recall(store, &request, 100_000))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_recall);
criterion_main!(benches);
