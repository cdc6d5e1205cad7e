//! Decision ledger and feedback application.
//!
//! Every [`ArbitrationDecision`] is registered here before its route runs.
//! Feedback resolves a decision at most once: the first outcome claims it
//! under the ledger lock, later ones are rejected as
//! [`Error::InvalidFeedback`].

use super::{ConfidenceEstimator, MemoryStore};
use crate::config::FeedbackConfig;
use crate::models::{
    AnswerSource, ArbitrationDecision, ConfidenceChange, DecisionId, DecisionOutcome, EventMeta,
    EvictionReason, FeedbackRecord, FeedbackSignal, FeedbackSource, MemoryId, SymbiontEvent,
};
use crate::observability::EventBus;
use crate::storage::{HistoryRecord, PreferenceRecord, StorageBackend};
use crate::{Error, Result};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::instrument;

/// How a decision's route played out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Where the answer text came from.
    pub source: AnswerSource,
    /// Memory the autonomous answer came from.
    pub answer_memory: Option<MemoryId>,
    /// Memory created from a successful generator reply.
    pub learned_memory: Option<MemoryId>,
    /// Time from utterance to answer.
    pub latency_ms: u64,
}

#[derive(Default)]
struct Ledger {
    decisions: HashMap<DecisionId, ArbitrationDecision>,
    order: VecDeque<DecisionId>,
    pending_by_session: HashMap<String, DecisionId>,
    feedback: VecDeque<FeedbackRecord>,
}

impl Ledger {
    /// Drops the oldest resolved decisions beyond `max`; pending ones stay.
    fn prune(&mut self, max: usize) {
        while self.decisions.len() > max {
            let Some(position) = self.order.iter().position(|id| {
                self.decisions
                    .get(id)
                    .is_none_or(|d| !d.outcome.is_pending())
            }) else {
                break;
            };
            if let Some(id) = self.order.remove(position) {
                self.decisions.remove(&id);
            }
        }
        while self.feedback.len() > max {
            self.feedback.pop_front();
        }
    }

    fn release_session(&mut self, decision: &ArbitrationDecision) {
        if self
            .pending_by_session
            .get(&decision.session_id)
            .is_some_and(|id| *id == decision.id)
        {
            self.pending_by_session.remove(&decision.session_id);
        }
    }
}

/// Applies feedback to topic confidence and memory importance.
pub struct FeedbackLoop {
    config: FeedbackConfig,
    ledger: Mutex<Ledger>,
    confidence: Arc<dyn ConfidenceEstimator>,
    memory: Arc<dyn MemoryStore>,
    storage: Arc<dyn StorageBackend>,
    events: EventBus,
}

impl FeedbackLoop {
    /// Creates a feedback loop over the given collaborators.
    #[must_use]
    pub fn new(
        config: FeedbackConfig,
        confidence: Arc<dyn ConfidenceEstimator>,
        memory: Arc<dyn MemoryStore>,
        storage: Arc<dyn StorageBackend>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
            confidence,
            memory,
            storage,
            events,
        }
    }

    /// Returns the feedback configuration.
    #[must_use]
    pub const fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Registers a new pending decision and makes it the session's latest.
    pub fn register(&self, decision: ArbitrationDecision) {
        let mut ledger = self.lock();
        ledger
            .pending_by_session
            .insert(decision.session_id.clone(), decision.id.clone());
        ledger.order.push_back(decision.id.clone());
        ledger.decisions.insert(decision.id.clone(), decision);
        ledger.prune(self.config.max_tracked_decisions);
    }

    /// Records how a pending decision's route executed.
    ///
    /// Ignored once the decision is resolved.
    pub fn attach_execution(&self, id: &DecisionId, execution: Execution) {
        let mut ledger = self.lock();
        if let Some(decision) = ledger.decisions.get_mut(id) {
            if decision.outcome.is_pending() {
                decision.source = Some(execution.source);
                decision.answer_memory = execution.answer_memory;
                decision.learned_memory = execution.learned_memory;
                decision.latency_ms = Some(execution.latency_ms);
            }
        }
    }

    /// Returns a copy of a tracked decision.
    #[must_use]
    pub fn decision(&self, id: &DecisionId) -> Option<ArbitrationDecision> {
        self.lock().decisions.get(id).cloned()
    }

    /// Returns the session's latest decision if it is still pending.
    #[must_use]
    pub fn pending_for_session(&self, session_id: &str) -> Option<DecisionId> {
        let ledger = self.lock();
        ledger
            .pending_by_session
            .get(session_id)
            .filter(|id| {
                ledger
                    .decisions
                    .get(*id)
                    .is_some_and(|d| d.outcome.is_pending())
            })
            .cloned()
    }

    /// Number of decisions awaiting an outcome.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock()
            .decisions
            .values()
            .filter(|d| d.outcome.is_pending())
            .count()
    }

    /// Returns the retained feedback records, oldest first.
    #[must_use]
    pub fn feedback_records(&self) -> Vec<FeedbackRecord> {
        self.lock().feedback.iter().cloned().collect()
    }

    /// Resolves a decision with a success flag or graded score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFeedback`] if the decision is unknown or
    /// already resolved; no state changes in that case.
    #[instrument(
        name = "symbiont.feedback.record",
        skip_all,
        fields(decision_id = %id, signal = signal.value(), source = source.as_str())
    )]
    pub fn record_outcome(
        &self,
        id: &DecisionId,
        signal: FeedbackSignal,
        source: FeedbackSource,
        now: u64,
    ) -> Result<FeedbackRecord> {
        let (decision, change) = {
            let mut ledger = self.lock();
            let Some(decision) = ledger.decisions.get_mut(id) else {
                return Err(self.reject(id, "unknown decision"));
            };
            if !decision.outcome.is_pending() {
                return Err(self.reject(id, "decision already resolved"));
            }

            let change = self.confidence.update(&decision.topic, signal, now);
            decision.outcome = DecisionOutcome::Resolved {
                signal: Some(signal.value()),
                confidence_delta: change.delta(),
                resolved_at: now,
            };
            let decision = decision.clone();
            ledger.release_session(&decision);
            (decision, change)
        };

        for memory_id in decision.used_memories() {
            self.adjust_importance(memory_id, signal);
        }

        let mut record =
            FeedbackRecord::new(decision.id.clone(), decision.topic.clone(), Some(signal), source, now);
        record.confidence_delta = change.delta();
        record.confidence_after = change.after;

        self.persist(&decision, &record, &change);
        self.publish(&decision, &record, &change);
        metrics::counter!(
            "feedback_records_total",
            "source" => source.as_str(),
            "outcome" => if signal.is_success() { "success" } else { "failure" }
        )
        .increment(1);

        let mut ledger = self.lock();
        ledger.feedback.push_back(record.clone());
        ledger.prune(self.config.max_tracked_decisions);
        Ok(record)
    }

    /// Resolves decisions pending longer than the timeout as neutral.
    ///
    /// Neutral outcomes apply no confidence or importance change.
    pub fn resolve_stale(&self, now: u64) -> Vec<FeedbackRecord> {
        let timeout = self.config.pending_timeout_secs;
        let stale: Vec<ArbitrationDecision> = {
            let mut ledger = self.lock();
            let mut stale = Vec::new();
            for decision in ledger.decisions.values_mut() {
                if decision.outcome.is_pending() && now.saturating_sub(decision.created_at) >= timeout
                {
                    decision.outcome = DecisionOutcome::Resolved {
                        signal: None,
                        confidence_delta: 0.0,
                        resolved_at: now,
                    };
                    stale.push(decision.clone());
                }
            }
            for decision in &stale {
                ledger.release_session(decision);
            }
            stale
        };

        let records: Vec<FeedbackRecord> = stale
            .iter()
            .map(|decision| {
                let confidence = self.confidence.confidence(&decision.topic);
                let change = ConfidenceChange {
                    before: confidence,
                    after: confidence,
                    band_before: decision.band,
                    band_after: decision.band,
                };
                let mut record = FeedbackRecord::new(
                    decision.id.clone(),
                    decision.topic.clone(),
                    None,
                    FeedbackSource::Timeout,
                    now,
                );
                record.confidence_after = confidence;
                self.persist(decision, &record, &change);
                self.publish(decision, &record, &change);
                record
            })
            .collect();

        if !records.is_empty() {
            tracing::info!(resolved = records.len(), "Resolved stale decisions as neutral");
            metrics::counter!("feedback_records_total", "source" => "timeout", "outcome" => "neutral")
                .increment(records.len() as u64);
            let mut ledger = self.lock();
            ledger.feedback.extend(records.iter().cloned());
            ledger.prune(self.config.max_tracked_decisions);
        }
        records
    }

    fn adjust_importance(&self, memory_id: &MemoryId, signal: FeedbackSignal) {
        let step = self.config.importance_step * signal.value().mul_add(2.0, -1.0);
        let success = signal.is_success();
        let updated = self.memory.update(memory_id, &mut |item| {
            item.importance = (item.importance + step).clamp(0.0, 1.0);
            if success {
                item.failures = 0;
            } else {
                item.failures += 1;
            }
        });

        match updated {
            Ok(Some(item)) if item.failures >= self.config.max_consecutive_failures => {
                tracing::info!(memory_id = %memory_id, failures = item.failures, "Evicting repeatedly failing memory");
                match self.memory.remove(memory_id) {
                    Ok(_) => {
                        metrics::counter!("memory_evictions_total", "reason" => "failures")
                            .increment(1);
                        self.events.publish(SymbiontEvent::MemoryEvicted {
                            meta: EventMeta::new("feedback"),
                            memory_id: memory_id.clone(),
                            reason: EvictionReason::Failures,
                        });
                    },
                    Err(e) => {
                        tracing::warn!(memory_id = %memory_id, error = %e, "Failed to evict memory");
                    },
                }
            },
            Ok(Some(_)) => {},
            Ok(None) => {
                tracing::debug!(memory_id = %memory_id, "Memory used by decision is gone");
            },
            Err(e) => {
                tracing::warn!(memory_id = %memory_id, error = %e, "Failed to adjust importance");
            },
        }
    }

    fn persist(
        &self,
        decision: &ArbitrationDecision,
        record: &FeedbackRecord,
        change: &ConfidenceChange,
    ) {
        let interactions = self
            .confidence
            .topic(&decision.topic)
            .map_or(0, |t| t.interactions);
        let preference = PreferenceRecord {
            user_id: decision.user_id.clone(),
            preference_type: decision.topic.clone(),
            preference_value: json!({
                "band": change.band_after.as_str(),
                "interactions": interactions,
            }),
            confidence: change.after,
            updated_at: record.created_at,
        };
        if let Err(e) = self.storage.upsert_preference(&preference) {
            tracing::warn!(topic = %decision.topic, error = %e, "Failed to persist topic confidence");
        }

        let history = HistoryRecord {
            id: record.id.clone(),
            user_id: decision.user_id.clone(),
            interaction_id: decision.id.to_string(),
            preference_type: decision.topic.clone(),
            observed_value: json!({
                "signal": record.signal.map(FeedbackSignal::value),
                "source": record.source.as_str(),
                "route": decision.label(),
                "delta": record.confidence_delta,
            }),
            confidence: record.confidence_after,
            created_at: record.created_at,
        };
        if let Err(e) = self.storage.append_history(&history) {
            tracing::warn!(decision_id = %decision.id, error = %e, "Failed to append feedback history");
        }
    }

    fn publish(
        &self,
        decision: &ArbitrationDecision,
        record: &FeedbackRecord,
        change: &ConfidenceChange,
    ) {
        self.events.publish(SymbiontEvent::FeedbackApplied {
            meta: EventMeta::new("feedback"),
            decision_id: decision.id.clone(),
            topic: decision.topic.clone(),
            delta: record.confidence_delta,
            source: record.source,
        });
        if change.band_changed() {
            tracing::info!(
                topic = %decision.topic,
                from = %change.band_before,
                to = %change.band_after,
                "Topic changed confidence band"
            );
            self.events.publish(SymbiontEvent::BandChanged {
                meta: EventMeta::new("feedback"),
                topic: decision.topic.clone(),
                from: change.band_before,
                to: change.band_after,
            });
        }
    }

    fn reject(&self, id: &DecisionId, reason: &str) -> Error {
        tracing::warn!(decision_id = %id, reason, "Dropping feedback");
        metrics::counter!("feedback_rejected_total").increment(1);
        Error::InvalidFeedback {
            decision_id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Decision ledger mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
