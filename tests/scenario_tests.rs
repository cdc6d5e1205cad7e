//! End-to-end scenarios for the arbitration loop.
//!
//! - A: a new topic earns autonomy through explicit feedback
//! - B: Working Memory overflow moves the LRU item to Short-Term
//! - C: an unavailable generator degrades to the template responder
//! - D: consolidation merges near-duplicate Long-Term items

// Scenario tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use symbiont::config::{MemoryConfig, SymbiontConfig};
use symbiont::generator::GenerationRequest;
use symbiont::models::{AnswerSource, SymbiontEvent};
use symbiont::services::TieredMemoryStore;
use symbiont::storage::InMemoryStorage;
use symbiont::{
    ConfidenceBand, Error, Generator, InteractionService, MemoryItem, MemoryStore, Route,
    SessionContext, TemplateResponder, Tier,
};

/// Generator that always times out.
#[derive(Default)]
struct UnavailableGenerator {
    calls: AtomicU32,
}

impl Generator for UnavailableGenerator {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn generate(&self, _request: &GenerationRequest) -> symbiont::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::GeneratorTransient("simulated timeout".to_string()))
    }
}

fn fast_retry_config() -> SymbiontConfig {
    let mut config = SymbiontConfig::default();
    config.gateway.backoff_ms = 5;
    config
}

fn service_with(generator: Arc<dyn Generator>) -> InteractionService {
    InteractionService::builder(fast_retry_config())
        .with_storage(Arc::new(InMemoryStorage::new()))
        .with_generator(generator)
        .build()
        .expect("build service")
}

#[tokio::test]
async fn scenario_a_new_topic_earns_autonomy() {
    let service = service_with(Arc::new(TemplateResponder));
    let session = SessionContext::new("alice").with_topic_hint("python");

    let first = service
        .handle_utterance("what is python?", &session)
        .await
        .expect("first answer");
    assert_eq!(first.band, ConfidenceBand::Low);
    assert_eq!(first.route, Route::Delegated);
    service
        .submit_feedback(&first.decision_id, 1.0)
        .expect("feedback");

    for _ in 0..4 {
        let answer = service
            .handle_utterance("what is python?", &session)
            .await
            .expect("answer");
        service
            .submit_feedback(&answer.decision_id, 1.0)
            .expect("feedback");
    }

    let topic = service
        .topics()
        .into_iter()
        .find(|t| t.name == "python")
        .expect("topic tracked");
    assert!(topic.confidence > 0.75, "confidence {}", topic.confidence);
    assert_eq!(service.band("python"), ConfidenceBand::High);

    let answer = service
        .handle_utterance("what is python?", &session)
        .await
        .expect("autonomous answer");
    assert_eq!(answer.band, ConfidenceBand::High);
    assert_eq!(answer.route, Route::Autonomous);
    assert_eq!(answer.source, AnswerSource::Memory);
    assert!(answer.text.contains("python"));
}

#[test]
fn scenario_b_working_overflow_moves_to_short_term() {
    let config = MemoryConfig {
        working_capacity: 2,
        ..MemoryConfig::default()
    };
    let store = TieredMemoryStore::new(config, Arc::new(InMemoryStorage::new()));
    for id in ["first", "second", "third"] {
        let item = MemoryItem::new(format!("{id} fact"), vec![1.0], 100).with_id(id);
        store.store(item).expect("store");
    }

    assert_eq!(store.count(Tier::Working), 2);
    assert_eq!(store.locate(&"first".into()), Some(Tier::ShortTerm));
    assert_eq!(store.locate(&"second".into()), Some(Tier::Working));
    assert_eq!(store.locate(&"third".into()), Some(Tier::Working));
    assert_eq!(
        store.get(&"first".into()).map(|item| item.content),
        Some("first fact".to_string())
    );
}

#[tokio::test]
async fn scenario_c_generator_failures_degrade() {
    let generator = Arc::new(UnavailableGenerator::default());
    let service = service_with(generator.clone());
    let session = SessionContext::new("bob").with_topic_hint("rust");

    let answer = service
        .handle_utterance("explain rust ownership", &session)
        .await
        .expect("degraded answer");

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    assert_eq!(answer.route, Route::Delegated);
    assert_eq!(answer.source, AnswerSource::Degraded);
    assert!(answer.text.contains("rust"));

    let decision = service.decision(&answer.decision_id).expect("decision");
    assert_eq!(decision.label(), "delegated/degraded");
    assert!(decision.learned_memory.is_none());
    assert_eq!(service.memory().count(Tier::Working), 0);
}

#[tokio::test]
async fn scenario_d_consolidation_merges_duplicates() {
    let service = service_with(Arc::new(TemplateResponder));
    let mut events = service.subscribe();
    let now = symbiont::current_timestamp();

    let keep = MemoryItem::new("python is a programming language", vec![0.8, 0.6, 0.0], now)
        .with_id("keep")
        .with_topic("python")
        .with_importance(0.9)
        .with_tier(Tier::LongTerm);
    let drop = MemoryItem::new("python is a language", vec![0.79, 0.61, 0.0], now)
        .with_id("drop")
        .with_topic("python")
        .with_importance(0.6)
        .with_tier(Tier::LongTerm);
    service.memory().store(drop).expect("store");
    service.memory().store(keep).expect("store");

    let stats = service.run_consolidation().expect("consolidate");
    assert_eq!(stats.merged, 1);
    assert!(service.memory().get(&"drop".into()).is_none());
    let survivor = service.memory().get(&"keep".into()).expect("survivor");
    assert_eq!(survivor.content, "python is a programming language");
    assert_eq!(survivor.tier, Tier::LongTerm);

    let mut saw_consolidated = false;
    while let Ok(event) = events.try_recv() {
        if let SymbiontEvent::Consolidated { merged, .. } = event {
            assert_eq!(merged, 1);
            saw_consolidated = true;
        }
    }
    assert!(saw_consolidated);
}
