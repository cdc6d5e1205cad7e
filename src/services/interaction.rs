//! The interaction context: one object wiring every component together.
//!
//! [`InteractionService`] is built once per process and handed to the
//! front-end. Each utterance runs as an independent unit of work; no Memory
//! Store lock is held across the generator call.

use super::{
    ArbitrationController, ConfidenceEstimator, ConsolidationJob, ConsolidationService,
    ConsolidationStats, EmaConfidenceEstimator, Execution, FeedbackLoop, MemoryStore,
    RecallCandidate, RecallQuery, RecallRanker, TieredMemoryStore, WeightedRecallRanker,
};
use crate::config::{GeneratorProvider, SymbiontConfig};
use crate::current_timestamp;
use crate::features::{FeatureExtractor, Features, HashingFeatureExtractor};
use crate::generator::{
    GenerationRequest, Generator, ModelGateway, OllamaGenerator, TemplateResponder,
};
use crate::models::{
    AnswerSource, ArbitrationDecision, ConfidenceBand, DecisionId, DecisionOutcome, EventMeta,
    FeedbackRecord, FeedbackSignal, FeedbackSource, MemoryId, MemoryItem, Route, SymbiontEvent,
    Tier, Topic,
};
use crate::observability::{EventBus, RequestContext, scope_request_context};
use crate::storage::{InMemoryStorage, InteractionRecord, StorageBackend};
use crate::{Error, Result};
use regex::Regex;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::instrument;
use uuid::Uuid;

/// Importance of a freshly learned answer before emotional weighting.
const BASE_LEARNED_IMPORTANCE: f32 = 0.5;

/// Share of arousal added to a learned answer's importance.
const AROUSAL_IMPORTANCE_WEIGHT: f32 = 0.3;

/// Recalled memories included in a delegation prompt.
const PROMPT_CONTEXT_MEMORIES: usize = 3;

/// Who is speaking and how long they are willing to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// User producing the utterances.
    pub user_id: String,
    /// Conversation the utterances belong to.
    pub session_id: String,
    /// Topic forced by the front-end, if any.
    pub topic_hint: Option<String>,
    /// Caller timeout for delegated answers. Defaults to the gateway setting.
    pub timeout: Option<Duration>,
}

impl SessionContext {
    /// Creates a context with a fresh session ID.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4().to_string(),
            topic_hint: None,
            timeout: None,
        }
    }

    /// Sets the session ID.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Sets the topic hint.
    #[must_use]
    pub fn with_topic_hint(mut self, topic: impl Into<String>) -> Self {
        self.topic_hint = Some(topic.into());
        self
    }

    /// Sets the caller timeout for delegated answers.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Answer delivered for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Text shown to the user.
    pub text: String,
    /// Route taken.
    pub route: Route,
    /// Where the text came from.
    pub source: AnswerSource,
    /// Decision to attach feedback to.
    pub decision_id: DecisionId,
    /// Topic the utterance was filed under.
    pub topic: String,
    /// Confidence band at decision time.
    pub band: ConfidenceBand,
}

/// Builder for [`InteractionService`].
///
/// Unset collaborators get their default implementation: in-memory storage,
/// the hashing feature extractor, the weighted recall ranker, and the
/// generator named by `generator.provider`.
pub struct InteractionServiceBuilder {
    config: SymbiontConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    generator: Option<Arc<dyn Generator>>,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    ranker: Option<Arc<dyn RecallRanker>>,
    events: Option<EventBus>,
}

impl InteractionServiceBuilder {
    /// Uses `storage` as the relational store.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Uses `generator` behind the gateway.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Uses `extractor` for utterance features.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Uses `ranker` for recall.
    #[must_use]
    pub fn with_ranker(mut self, ranker: Arc<dyn RecallRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Publishes events on an existing bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validates the configuration, wires the components and restores
    /// persisted Long-Term memories and topic confidences.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or storage cannot be
    /// read.
    pub fn build(self) -> Result<InteractionService> {
        let config = self.config;
        config.validate()?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let events = self.events.unwrap_or_default();
        let generator: Arc<dyn Generator> = match self.generator {
            Some(generator) => generator,
            None => match config.generator.provider {
                GeneratorProvider::Ollama => Arc::new(ollama_generator(&config)),
                GeneratorProvider::Template => Arc::new(TemplateResponder),
            },
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(HashingFeatureExtractor::default()));
        let ranker = self
            .ranker
            .unwrap_or_else(|| Arc::new(WeightedRecallRanker::new(config.recall.clone())));

        let tiered = TieredMemoryStore::new(config.memory.clone(), Arc::clone(&storage))
            .with_event_bus(events.clone());
        let restored = tiered.restore()?;
        let memory: Arc<dyn MemoryStore> = Arc::new(tiered);

        let confidence: Arc<dyn ConfidenceEstimator> =
            Arc::new(EmaConfidenceEstimator::new(config.confidence.clone()));
        let topics = storage.load_topics()?;
        let topic_count = topics.len();
        confidence.restore(topics);

        let feedback = Arc::new(FeedbackLoop::new(
            config.feedback.clone(),
            Arc::clone(&confidence),
            Arc::clone(&memory),
            Arc::clone(&storage),
            events.clone(),
        ));
        let consolidation = Arc::new(ConsolidationService::new(
            config.consolidation.clone(),
            &config.memory,
            Arc::clone(&memory),
            Arc::clone(&confidence),
            Arc::clone(&feedback),
            Arc::clone(&storage),
            events.clone(),
        ));
        let gateway = ModelGateway::new(generator, &config.gateway);
        let corrections = CorrectionMatcher::new(&config.feedback.correction_markers)?;

        tracing::info!(
            storage = storage.name(),
            generator = gateway.generator_name(),
            max_attempts = gateway.schedule().max_attempts(),
            total_backoff_ms = gateway
                .schedule()
                .delays()
                .map(|d| d.as_millis())
                .sum::<u128>(),
            restored_memories = restored,
            restored_topics = topic_count,
            "Interaction service ready"
        );

        Ok(InteractionService {
            arbiter: ArbitrationController::new(config.arbitration.clone()),
            config,
            extractor,
            memory,
            ranker,
            confidence,
            gateway,
            feedback,
            consolidation,
            storage,
            events,
            corrections,
        })
    }
}

/// Entry point for utterances and feedback.
pub struct InteractionService {
    config: SymbiontConfig,
    extractor: Arc<dyn FeatureExtractor>,
    memory: Arc<dyn MemoryStore>,
    ranker: Arc<dyn RecallRanker>,
    confidence: Arc<dyn ConfidenceEstimator>,
    arbiter: ArbitrationController,
    gateway: ModelGateway,
    feedback: Arc<FeedbackLoop>,
    consolidation: Arc<ConsolidationService>,
    storage: Arc<dyn StorageBackend>,
    events: EventBus,
    corrections: CorrectionMatcher,
}

impl InteractionService {
    /// Starts building a service from `config`.
    #[must_use]
    pub const fn builder(config: SymbiontConfig) -> InteractionServiceBuilder {
        InteractionServiceBuilder {
            config,
            storage: None,
            generator: None,
            extractor: None,
            ranker: None,
            events: None,
        }
    }

    /// Answers one utterance.
    ///
    /// Resolves the session's previous pending decision implicitly, recalls,
    /// arbitrates, records the decision and then executes the chosen route.
    /// Generator failures never surface: the user gets the degraded answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for blank utterances and
    /// [`Error::OperationFailed`] when the interaction cannot be recorded.
    #[instrument(
        name = "symbiont.interaction.handle",
        skip(self, text, session),
        fields(
            session_id = %session.session_id,
            topic = tracing::field::Empty,
            route = tracing::field::Empty
        )
    )]
    pub async fn handle_utterance(&self, text: &str, session: &SessionContext) -> Result<Answer> {
        let context = RequestContext::new().with_session(session.session_id.clone());
        scope_request_context(context, self.handle_in_context(text, session)).await
    }

    async fn handle_in_context(&self, text: &str, session: &SessionContext) -> Result<Answer> {
        let start = Instant::now();
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("utterance must not be empty".to_string()));
        }
        let now = current_timestamp();

        self.resolve_implicit(text, session, now);
        self.memory.sweep_short_term(now);

        let features = self
            .extractor
            .extract(text, session.topic_hint.as_deref())?;
        let topic = features.primary_topic().to_string();
        self.confidence.touch(&topic, now);
        let band = self.confidence.band(&topic);

        let candidates = self.ranker.recall(
            self.memory.as_ref(),
            &RecallQuery {
                vector: &features.vector,
                topic: Some(&topic),
                limit: self.config.recall.limit,
            },
            now,
        );
        let verdict = self.arbiter.decide(band, &candidates);

        let decision = ArbitrationDecision {
            id: DecisionId::generate(),
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            query: text.to_string(),
            topic: topic.clone(),
            band,
            regime: verdict.regime,
            candidates: candidates.iter().map(RecallCandidate::to_score).collect(),
            route: verdict.route,
            answer_memory: None,
            learned_memory: None,
            source: None,
            latency_ms: None,
            created_at: now,
            outcome: DecisionOutcome::Pending,
        };
        self.storage.record_interaction(&InteractionRecord {
            id: decision.id.as_str().to_string(),
            user_id: session.user_id.clone(),
            content: text.to_string(),
            timestamp: now,
            context: json!({
                "session_id": session.session_id,
                "topic": topic,
                "band": band.as_str(),
                "regime": verdict.regime.as_str(),
            }),
            metadata: json!({
                "route": verdict.route.as_str(),
                "candidates": candidates.len(),
                "top_score": verdict.top_score,
            }),
        })?;

        let decision_id = decision.id.clone();
        self.feedback.register(decision);
        self.events.publish(SymbiontEvent::DecisionRecorded {
            meta: EventMeta::new("interaction"),
            decision_id: decision_id.clone(),
            topic: topic.clone(),
            band,
            route: verdict.route,
        });

        let chosen = verdict.chosen.and_then(|index| candidates.get(index));
        let (answer_text, mut execution) = match chosen {
            Some(candidate) if verdict.route == Route::Autonomous => {
                self.answer_from_memory(candidate, now)
            },
            _ => {
                self.delegate(text, &features, &topic, &candidates, session, now)
                    .await
            },
        };
        execution.latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let source = execution.source;
        self.feedback.attach_execution(&decision_id, execution);

        let span = tracing::Span::current();
        span.record("topic", topic.as_str());
        span.record("route", verdict.route.as_str());
        metrics::counter!(
            "interactions_total",
            "route" => verdict.route.as_str(),
            "source" => source.as_str()
        )
        .increment(1);
        metrics::histogram!("interaction_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        Ok(Answer {
            text: answer_text,
            route: verdict.route,
            source,
            decision_id,
            topic,
            band,
        })
    }

    fn answer_from_memory(&self, candidate: &RecallCandidate, now: u64) -> (String, Execution) {
        let id = candidate.item.id.clone();
        let text = match self.memory.update(&id, &mut |item| item.touch(now)) {
            Ok(Some(item)) => item.content,
            Ok(None) => candidate.item.content.clone(),
            Err(e) => {
                tracing::warn!(memory_id = %id, error = %e, "Failed to record memory access");
                candidate.item.content.clone()
            },
        };
        (
            text,
            Execution {
                source: AnswerSource::Memory,
                answer_memory: Some(id),
                learned_memory: None,
                latency_ms: 0,
            },
        )
    }

    async fn delegate(
        &self,
        text: &str,
        features: &Features,
        topic: &str,
        candidates: &[RecallCandidate],
        session: &SessionContext,
        now: u64,
    ) -> (String, Execution) {
        let prompt = build_prompt(text, topic, features, candidates);
        let request = GenerationRequest::new(prompt, &self.config.gateway).with_topic(topic);
        let timeout = session
            .timeout
            .unwrap_or_else(|| Duration::from_millis(self.config.gateway.caller_timeout_ms));
        let reply = self.gateway.generate_within(request, timeout).await;

        let learned = if reply.is_success() {
            self.learn(features, &reply.text, now)
        } else {
            None
        };
        (
            reply.text,
            Execution {
                source: reply.source,
                answer_memory: None,
                learned_memory: learned,
                latency_ms: 0,
            },
        )
    }

    /// Stores a generator answer as a new Working memory keyed by the
    /// utterance's features.
    fn learn(&self, features: &Features, answer: &str, now: u64) -> Option<MemoryId> {
        let importance = AROUSAL_IMPORTANCE_WEIGHT
            .mul_add(features.emotion.arousal, BASE_LEARNED_IMPORTANCE)
            .clamp(0.0, 1.0);
        let item = features.topics.iter().fold(
            MemoryItem::new(answer, features.vector.clone(), now)
                .with_importance(importance)
                .with_emotion(features.emotion),
            |item, topic| item.with_topic(topic.clone()),
        );
        let id = item.id.clone();

        match self.memory.store(item) {
            Ok(tier) => {
                self.events.publish(SymbiontEvent::MemoryLearned {
                    meta: EventMeta::new("interaction"),
                    memory_id: id.clone(),
                    tier,
                    source: AnswerSource::Generator,
                });
                Some(id)
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to learn generator answer");
                None
            },
        }
    }

    /// Resolves the session's pending decision from the new utterance.
    fn resolve_implicit(&self, text: &str, session: &SessionContext, now: u64) {
        let Some(pending) = self.feedback.pending_for_session(&session.session_id) else {
            return;
        };
        let signal = if self.is_correction(text) {
            FeedbackSignal::FAILURE
        } else {
            FeedbackSignal::graded(self.feedback.config().implicit_success_signal)
                .unwrap_or(FeedbackSignal::SUCCESS)
        };
        if let Err(e) =
            self.feedback
                .record_outcome(&pending, signal, FeedbackSource::Implicit, now)
        {
            tracing::debug!(decision_id = %pending, error = %e, "Implicit feedback skipped");
        }
    }

    fn is_correction(&self, text: &str) -> bool {
        self.corrections.matches(text)
    }

    /// Applies explicit feedback to a decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for non-finite scores and
    /// [`Error::InvalidFeedback`] for unknown or already-resolved decisions.
    pub fn submit_feedback(&self, decision_id: &DecisionId, score: f32) -> Result<FeedbackRecord> {
        let signal = FeedbackSignal::graded(score)?;
        self.feedback
            .record_outcome(decision_id, signal, FeedbackSource::Explicit, current_timestamp())
    }

    /// Runs one consolidation pass now.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass summary cannot be persisted.
    pub fn run_consolidation(&self) -> Result<ConsolidationStats> {
        self.consolidation.run_once(current_timestamp())
    }

    /// Starts the background consolidation job if enabled.
    #[must_use]
    pub fn spawn_consolidation(&self) -> Option<ConsolidationJob> {
        let settings = &self.config.consolidation;
        settings.enabled.then(|| {
            ConsolidationJob::spawn(
                Arc::clone(&self.consolidation),
                Duration::from_secs(settings.interval_secs),
            )
        })
    }

    /// Returns all known topics sorted by name.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.confidence.topics()
    }

    /// Returns the current band of `topic`.
    #[must_use]
    pub fn band(&self, topic: &str) -> ConfidenceBand {
        self.confidence.band(topic)
    }

    /// Returns the item count of every tier.
    #[must_use]
    pub fn occupancy(&self) -> [(Tier, usize); 3] {
        Tier::ALL.map(|tier| (tier, self.memory.count(tier)))
    }

    /// Returns a tracked decision.
    #[must_use]
    pub fn decision(&self, id: &DecisionId) -> Option<ArbitrationDecision> {
        self.feedback.decision(id)
    }

    /// Subscribes to core events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SymbiontEvent> {
        self.events.subscribe()
    }

    /// Returns the memory store.
    #[must_use]
    pub fn memory(&self) -> &dyn MemoryStore {
        self.memory.as_ref()
    }

    /// Returns the effective configuration.
    #[must_use]
    pub const fn config(&self) -> &SymbiontConfig {
        &self.config
    }
}

/// Builds the default generator with the gateway's per-attempt timeout as
/// its HTTP timeout.
fn ollama_generator(config: &SymbiontConfig) -> OllamaGenerator {
    let generator = OllamaGenerator::from_config(&config.generator)
        .with_timeout(Duration::from_millis(config.gateway.attempt_timeout_ms));
    tracing::debug!(
        model = generator.model(),
        timeout_ms = config.gateway.attempt_timeout_ms,
        "Using Ollama generator"
    );
    generator
}

/// Detects utterances that reject the previous answer.
///
/// Markers ending in punctuation (`"no,"`) only count at the start of the
/// utterance; every other marker must match on word boundaries.
#[derive(Debug)]
struct CorrectionMatcher {
    leading: Vec<String>,
    phrases: Option<Regex>,
}

impl CorrectionMatcher {
    fn new(markers: &[String]) -> Result<Self> {
        let mut leading = Vec::new();
        let mut phrases = Vec::new();
        for marker in markers {
            let marker = marker.trim().to_lowercase();
            match marker.chars().last() {
                None => {},
                Some(c) if c.is_alphanumeric() => phrases.push(regex::escape(&marker)),
                Some(_) => leading.push(marker),
            }
        }
        let phrases = if phrases.is_empty() {
            None
        } else {
            let pattern = format!(r"\b(?:{})\b", phrases.join("|"));
            Some(Regex::new(&pattern).map_err(|e| {
                Error::InvalidInput(format!("invalid correction markers: {e}"))
            })?)
        };
        Ok(Self { leading, phrases })
    }

    fn matches(&self, text: &str) -> bool {
        let lowered = text.trim_start().to_lowercase();
        self.leading.iter().any(|m| lowered.starts_with(m.as_str()))
            || self.phrases.as_ref().is_some_and(|re| re.is_match(&lowered))
    }
}

/// Assembles the delegation prompt: topic, emotional tone and a few
/// recalled memories as context ahead of the utterance.
fn build_prompt(
    text: &str,
    topic: &str,
    features: &Features,
    candidates: &[RecallCandidate],
) -> String {
    let emotion = features.emotion;
    let mut prompt = format!(
        "You are a helpful assistant learning about '{topic}'.\n\
         Emotional tone: valence {:.2}, arousal {:.2}, dominance {:.2}.\n",
        emotion.valence, emotion.arousal, emotion.dominance
    );
    if !candidates.is_empty() {
        prompt.push_str("Related memories:\n");
        for candidate in candidates.iter().take(PROMPT_CONTEXT_MEMORIES) {
            let _ = writeln!(prompt, "- {}", candidate.item.content);
        }
    }
    let _ = write!(prompt, "User: {text}\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (InteractionService, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let service = InteractionService::builder(SymbiontConfig::default())
            .with_storage(storage.clone())
            .with_generator(Arc::new(TemplateResponder))
            .build()
            .expect("build");
        (service, storage)
    }

    #[tokio::test]
    async fn test_blank_utterance_rejected() {
        let (service, _) = service();
        let err = service
            .handle_utterance("   ", &SessionContext::new("u"))
            .await
            .expect_err("blank");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_new_topic_delegates_and_learns() {
        let (service, storage) = service();
        let session = SessionContext::new("u").with_topic_hint("python");
        let answer = service
            .handle_utterance("what is python", &session)
            .await
            .expect("answer");

        assert_eq!(answer.route, Route::Delegated);
        assert_eq!(answer.source, AnswerSource::Generator);
        assert_eq!(answer.band, ConfidenceBand::Low);
        assert_eq!(answer.topic, "python");
        assert_eq!(service.memory().count(Tier::Working), 1);
        assert_eq!(storage.interaction_count(), 1);

        let decision = service.decision(&answer.decision_id).expect("tracked");
        assert!(decision.learned_memory.is_some());
        assert_eq!(decision.label(), "delegated/success");
    }

    #[tokio::test]
    async fn test_next_utterance_resolves_previous_implicitly() {
        let (service, _) = service();
        let session = SessionContext::new("u").with_topic_hint("python");
        let first = service
            .handle_utterance("what is python", &session)
            .await
            .expect("first");
        service
            .handle_utterance("tell me more about python", &session)
            .await
            .expect("second");

        let decision = service.decision(&first.decision_id).expect("tracked");
        assert!(!decision.outcome.is_pending());
        assert!(service.submit_feedback(&first.decision_id, 1.0).is_err());
        assert!((service.topics()[0].confidence - 0.365).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_correction_counts_as_failure() {
        let (service, _) = service();
        let session = SessionContext::new("u").with_topic_hint("python");
        service
            .handle_utterance("what is python", &session)
            .await
            .expect("first");
        service
            .handle_utterance("that's wrong, python is a language", &session)
            .await
            .expect("second");
        assert!((service.topics()[0].confidence - 0.14).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_words_ending_in_no_are_not_corrections() {
        let (service, _) = service();
        let session = SessionContext::new("u").with_topic_hint("music");
        service
            .handle_utterance("what is a sonata", &session)
            .await
            .expect("first");
        service
            .handle_utterance("great, I play piano, tell me about chopin", &session)
            .await
            .expect("second");
        let music = service
            .topics()
            .into_iter()
            .find(|t| t.name == "music")
            .expect("topic");
        assert!((music.confidence - 0.365).abs() < 1e-4);
    }

    #[test]
    fn test_ollama_timeout_follows_attempt_timeout() {
        let mut config = SymbiontConfig::default();
        config.gateway.attempt_timeout_ms = 1_500;
        let generator = ollama_generator(&config);
        assert_eq!(generator.timeout(), Duration::from_millis(1_500));
        assert_eq!(generator.model(), config.generator.model);
    }

    #[test]
    fn test_correction_matcher() {
        let markers: Vec<String> = ["That's Wrong", "no, ", "incorrect", "  "]
            .into_iter()
            .map(String::from)
            .collect();
        let matcher = CorrectionMatcher::new(&markers).expect("matcher");

        assert!(matcher.matches("No, I meant the other one"));
        assert!(matcher.matches("  no, stop"));
        assert!(matcher.matches("hmm, that's wrong actually"));
        assert!(matcher.matches("THAT'S WRONG"));
        assert!(matcher.matches("this is incorrect."));

        assert!(!matcher.matches("I play piano, what next"));
        assert!(!matcher.matches("volcano, casino, domino"));
        assert!(!matcher.matches("is it correct, yes, no, maybe"));
        assert!(!matcher.matches("nothing else"));
        assert!(!matcher.matches("incorrectly labelled"));
    }

    #[tokio::test]
    async fn test_storage_outage_is_visible() {
        let (service, storage) = service();
        storage.set_available(false);
        let result = service
            .handle_utterance("hello there", &SessionContext::new("u"))
            .await;
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_prompt_includes_context() {
        let features = Features {
            vector: vec![1.0],
            topics: vec!["rust".to_string()],
            emotion: crate::models::EmotionalTag::neutral(),
        };
        let candidate = RecallCandidate {
            item: MemoryItem::new("rust is a systems language", vec![1.0], 1),
            similarity: 1.0,
            score: 0.9,
        };
        let prompt = build_prompt("what is rust", "rust", &features, &[candidate]);
        assert!(prompt.contains("'rust'"));
        assert!(prompt.contains("- rust is a systems language"));
        assert!(prompt.ends_with("User: what is rust\nAssistant:"));
    }
}
