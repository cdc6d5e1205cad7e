//! Periodic memory consolidation.
//!
//! A pass sweeps Short-Term, merges near-duplicate Long-Term items, decays
//! idle Long-Term importance and demotes what falls below the admission
//! threshold, decays idle topics, and resolves stale decisions. Tier locks
//! are held for one item operation at a time, never for the whole scan.

use super::{ConfidenceEstimator, FeedbackLoop, MemoryStore};
use crate::config::{ConsolidationConfig, MemoryConfig};
use crate::current_timestamp;
use crate::features::cosine_similarity;
use crate::models::{EventMeta, MemoryId, SymbiontEvent, Tier};
use crate::observability::EventBus;
use crate::storage::{PatternRecord, StorageBackend};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info_span, instrument};
use uuid::Uuid;

/// Seconds per day for Long-Term importance decay.
const SECONDS_PER_DAY: f32 = 86_400.0;

/// Owner recorded on pattern rows written by consolidation.
const SYSTEM_USER: &str = "system";

/// Statistics from a consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationStats {
    /// Short-Term items promoted to Long-Term.
    pub promoted: usize,
    /// Short-Term items expired.
    pub expired: usize,
    /// Promotions deferred by a storage failure.
    pub deferred: usize,
    /// Long-Term items merged into a near-duplicate.
    pub merged: usize,
    /// Merges that lost a race with another pass.
    pub conflicts: usize,
    /// Long-Term items whose importance decayed.
    pub decayed: usize,
    /// Long-Term items demoted to Short-Term.
    pub demoted: usize,
    /// Topics whose confidence decayed toward the floor.
    pub topics_decayed: usize,
    /// Pending decisions resolved as neutral.
    pub stale_resolved: usize,
    /// Whether the pass stopped early for shutdown.
    pub interrupted: bool,
}

impl ConsolidationStats {
    /// Returns true if no work was done.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.promoted == 0
            && self.expired == 0
            && self.merged == 0
            && self.decayed == 0
            && self.demoted == 0
            && self.topics_decayed == 0
            && self.stale_resolved == 0
    }

    /// Returns a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            "Nothing to consolidate".to_string()
        } else {
            format!(
                "Promoted: {}, Expired: {}, Merged: {}, Decayed: {}, Demoted: {}, Topics decayed: {}, Stale decisions: {}",
                self.promoted,
                self.expired,
                self.merged,
                self.decayed,
                self.demoted,
                self.topics_decayed,
                self.stale_resolved
            )
        }
    }
}

/// Service for consolidating memory and confidence state.
pub struct ConsolidationService {
    config: ConsolidationConfig,
    long_term_threshold: f32,
    memory: Arc<dyn MemoryStore>,
    confidence: Arc<dyn ConfidenceEstimator>,
    feedback: Arc<FeedbackLoop>,
    storage: Arc<dyn StorageBackend>,
    events: EventBus,
    last_pass: Mutex<Option<u64>>,
}

impl ConsolidationService {
    /// Creates a consolidation service.
    #[must_use]
    pub fn new(
        config: ConsolidationConfig,
        memory_config: &MemoryConfig,
        memory: Arc<dyn MemoryStore>,
        confidence: Arc<dyn ConfidenceEstimator>,
        feedback: Arc<FeedbackLoop>,
        storage: Arc<dyn StorageBackend>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            long_term_threshold: memory_config.long_term_threshold,
            memory,
            confidence,
            feedback,
            storage,
            events,
            last_pass: Mutex::new(None),
        }
    }

    /// Returns the consolidation configuration.
    #[must_use]
    pub const fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Runs one full pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass summary cannot be persisted. Item-level
    /// failures are logged and counted, never fatal.
    pub fn run_once(&self, now: u64) -> Result<ConsolidationStats> {
        self.run_until(now, &AtomicBool::new(false))
    }

    /// Runs one pass, checking `stop` between single-item operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass summary cannot be persisted.
    #[instrument(
        name = "symbiont.consolidation.run",
        skip(self, stop),
        fields(merged = tracing::field::Empty, demoted = tracing::field::Empty)
    )]
    pub fn run_until(&self, now: u64, stop: &AtomicBool) -> Result<ConsolidationStats> {
        let start = Instant::now();
        let result = (|| {
            let mut stats = ConsolidationStats::default();
            let last_pass = *self
                .last_pass
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            {
                let _span = info_span!("symbiont.consolidation.sweep").entered();
                let sweep = self.memory.sweep_short_term(now);
                stats.promoted = sweep.promoted;
                stats.expired = sweep.expired;
                stats.deferred = sweep.deferred;
            }

            {
                let _span = info_span!("symbiont.consolidation.dedupe").entered();
                self.dedupe(now, stop, &mut stats);
            }

            {
                let _span = info_span!("symbiont.consolidation.decay").entered();
                self.decay_long_term(now, last_pass, stop, &mut stats);
            }

            stats.interrupted = stop.load(Ordering::SeqCst);
            if !stats.interrupted {
                self.decay_topics(now, &mut stats);
                stats.stale_resolved = self.feedback.resolve_stale(now).len();
            }

            *self
                .last_pass
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(now);

            self.storage.record_pattern(&PatternRecord {
                id: Uuid::new_v4().to_string(),
                user_id: SYSTEM_USER.to_string(),
                pattern_type: "consolidation".to_string(),
                pattern_data: json!(stats),
                confidence: self.mean_confidence(),
                created_at: now,
            })?;

            self.events.publish(SymbiontEvent::Consolidated {
                meta: EventMeta::with_timestamp("consolidation", None, now),
                merged: stats.merged,
                promoted: stats.promoted,
                demoted: stats.demoted,
                expired: stats.expired,
            });

            let span = tracing::Span::current();
            span.record("merged", stats.merged);
            span.record("demoted", stats.demoted);
            tracing::info!(summary = %stats.summary(), "Consolidation pass finished");
            Ok(stats)
        })();

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("consolidation_runs_total", "status" => status).increment(1);
        if let Ok(stats) = &result {
            metrics::counter!("consolidation_merged_total").increment(stats.merged as u64);
            metrics::counter!("consolidation_promoted_total").increment(stats.promoted as u64);
            metrics::counter!("consolidation_demoted_total").increment(stats.demoted as u64);
            metrics::counter!("consolidation_expired_total").increment(stats.expired as u64);
        }
        metrics::histogram!("consolidation_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        result
    }

    /// Merges Long-Term items whose similarity reaches the dedupe threshold,
    /// keeping the more important (then more confident) one.
    fn dedupe(&self, now: u64, stop: &AtomicBool, stats: &mut ConsolidationStats) {
        let mut snapshot: Vec<(MemoryId, Vec<f32>, f32, f32)> = Vec::new();
        self.memory.visit(Tier::LongTerm, &mut |item| {
            snapshot.push((
                item.id.clone(),
                item.features.clone(),
                item.importance,
                item.confidence,
            ));
        });
        snapshot.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| b.3.total_cmp(&a.3))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut absorbed = vec![false; snapshot.len()];
        for i in 0..snapshot.len() {
            if absorbed[i] {
                continue;
            }
            for j in (i + 1)..snapshot.len() {
                if absorbed[j] {
                    continue;
                }
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                let similarity = cosine_similarity(&snapshot[i].1, &snapshot[j].1);
                if similarity < self.config.dedupe_threshold {
                    continue;
                }

                let (survivor, folded) = (&snapshot[i].0, &snapshot[j].0);
                match self.memory.merge(survivor, folded, now) {
                    Ok(_) => {
                        tracing::debug!(survivor = %survivor, absorbed = %folded, similarity, "Merged near-duplicate memories");
                        absorbed[j] = true;
                        stats.merged += 1;
                    },
                    Err(Error::ConsolidationConflict { id }) => {
                        tracing::warn!(memory_id = %id, "Merge target vanished under a concurrent pass");
                        metrics::counter!("consolidation_conflicts_total").increment(1);
                        stats.conflicts += 1;
                        if id == folded.as_str() {
                            absorbed[j] = true;
                        } else {
                            break;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(survivor = %survivor, absorbed = %folded, error = %e, "Merge failed");
                    },
                }
            }
        }
    }

    /// Lowers Long-Term importance by the daily rate for the time each item
    /// sat idle since the previous pass, then demotes items below threshold.
    #[allow(clippy::cast_precision_loss)]
    fn decay_long_term(
        &self,
        now: u64,
        last_pass: Option<u64>,
        stop: &AtomicBool,
        stats: &mut ConsolidationStats,
    ) {
        let rate = self.config.long_term_decay_per_day;
        for id in self.memory.ids(Tier::LongTerm) {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let mut decayed = false;
            let updated = self.memory.update(&id, &mut |item| {
                let since = item.last_access.max(last_pass.unwrap_or(item.tier_since));
                let idle_days = now.saturating_sub(since) as f32 / SECONDS_PER_DAY;
                if idle_days > 0.0 && rate > 0.0 {
                    item.importance = (item.importance - rate * idle_days).max(0.0);
                    decayed = true;
                }
            });

            match updated {
                Ok(Some(item)) => {
                    if decayed {
                        stats.decayed += 1;
                    }
                    if item.importance < self.long_term_threshold {
                        match self.memory.demote(&id, now) {
                            Ok(true) => stats.demoted += 1,
                            Ok(false) => {},
                            Err(e) => {
                                tracing::warn!(memory_id = %id, error = %e, "Demotion failed");
                            },
                        }
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(memory_id = %id, error = %e, "Importance decay failed");
                },
            }
        }
    }

    fn decay_topics(&self, now: u64, stats: &mut ConsolidationStats) {
        let changes = self.confidence.decay(now);
        stats.topics_decayed = changes.len();
        for (topic, change) in changes {
            if change.band_changed() {
                self.events.publish(SymbiontEvent::BandChanged {
                    meta: EventMeta::with_timestamp("consolidation", None, now),
                    topic,
                    from: change.band_before,
                    to: change.band_after,
                });
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean_confidence(&self) -> f32 {
        let topics = self.confidence.topics();
        if topics.is_empty() {
            return 0.0;
        }
        topics.iter().map(|t| t.confidence).sum::<f32>() / topics.len() as f32
    }
}

/// Background task running [`ConsolidationService`] on an interval.
///
/// Shutdown lets the pass in progress finish its current item operation.
pub struct ConsolidationJob {
    stop: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ConsolidationJob {
    /// Spawns the job on the current tokio runtime.
    ///
    /// The first pass runs one `interval` after spawning.
    #[must_use]
    pub fn spawn(service: Arc<ConsolidationService>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task_stop = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let service = Arc::clone(&service);
                        let stop = Arc::clone(&task_stop);
                        let pass = tokio::task::spawn_blocking(move || {
                            service.run_until(current_timestamp(), &stop)
                        });
                        match pass.await {
                            Ok(Ok(stats)) if stats.interrupted => break,
                            Ok(Ok(_)) => {},
                            Ok(Err(e)) => tracing::error!(error = %e, "Consolidation pass failed"),
                            Err(e) => tracing::error!(error = %e, "Consolidation task panicked"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Consolidation job stopped");
        });

        Self {
            stop,
            shutdown,
            handle,
        }
    }

    /// Stops the job and waits for the pass in progress to reach a safe point.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Consolidation job ended abnormally");
        }
    }
}
