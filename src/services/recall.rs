//! Recall ranking across the memory tiers.

use super::MemoryStore;
use crate::config::{RecallConfig, RecallWeights};
use crate::features::cosine_similarity;
use crate::models::{CandidateScore, MemoryItem, Tier};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::instrument;

/// A recall request.
#[derive(Debug, Clone, Copy)]
pub struct RecallQuery<'a> {
    /// Query feature vector.
    pub vector: &'a [f32],
    /// Topic hint; matching items get a score bonus.
    pub topic: Option<&'a str>,
    /// Maximum candidates returned.
    pub limit: usize,
}

/// A ranked recall result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallCandidate {
    /// Copy of the recalled item.
    pub item: MemoryItem,
    /// Feature similarity to the query.
    pub similarity: f32,
    /// Combined, tier-weighted score in [0, 1].
    pub score: f32,
}

impl RecallCandidate {
    /// Returns the score entry recorded on a decision.
    #[must_use]
    pub fn to_score(&self) -> CandidateScore {
        CandidateScore {
            memory_id: self.item.id.clone(),
            score: self.score,
            tier: self.item.tier,
        }
    }
}

/// Produces an ordered candidate list for a query.
///
/// An empty list is a valid answer meaning nothing relevant is remembered.
/// Given an unchanged store, the same query returns the same list.
pub trait RecallRanker: Send + Sync {
    /// Ranks the items of `store` against `query`.
    fn recall(
        &self,
        store: &dyn MemoryStore,
        query: &RecallQuery<'_>,
        now: u64,
    ) -> Vec<RecallCandidate>;
}

/// Default [`RecallRanker`]: per-tier top-K by similarity, merged on a
/// weighted score of similarity, importance and recency.
#[derive(Debug, Clone)]
pub struct WeightedRecallRanker {
    config: RecallConfig,
}

impl WeightedRecallRanker {
    /// Creates a ranker.
    #[must_use]
    pub const fn new(config: RecallConfig) -> Self {
        Self { config }
    }

    const fn weights(&self, tier: Tier) -> RecallWeights {
        match tier {
            Tier::Working => self.config.weights.working,
            Tier::ShortTerm => self.config.weights.short_term,
            Tier::LongTerm => self.config.weights.long_term,
        }
    }

    /// Exponential recency decay with the configured half-life.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn recency(&self, last_access: u64, now: u64) -> f32 {
        let age = now.saturating_sub(last_access) as f64;
        let half_life = self.config.recency_half_life_secs.max(1) as f64;
        (-std::f64::consts::LN_2 * age / half_life).exp() as f32
    }

    fn score(&self, item: &MemoryItem, similarity: f32, topic: Option<&str>, now: u64) -> f32 {
        let weights = self.weights(item.tier);
        let mut score = similarity * weights.similarity
            + item.importance * weights.importance
            + self.recency(item.last_access, now) * weights.recency;
        if topic.is_some_and(|t| item.topics.contains(t)) {
            score += self.config.topic_bonus;
        }
        score.clamp(0.0, 1.0)
    }

    fn rank_tier(
        &self,
        store: &dyn MemoryStore,
        tier: Tier,
        query: &RecallQuery<'_>,
        now: u64,
    ) -> Vec<RecallCandidate> {
        let mut matches = Vec::new();
        store.visit(tier, &mut |item| {
            let similarity = cosine_similarity(query.vector, &item.features);
            if similarity > 0.0 {
                matches.push((similarity, item.clone()));
            }
        });

        matches.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        matches.truncate(self.config.per_tier_top_k);
        matches
            .into_iter()
            .map(|(similarity, item)| RecallCandidate {
                score: self.score(&item, similarity, query.topic, now),
                similarity,
                item,
            })
            .collect()
    }
}

impl Default for WeightedRecallRanker {
    fn default() -> Self {
        Self::new(RecallConfig::default())
    }
}

impl RecallRanker for WeightedRecallRanker {
    #[instrument(
        name = "symbiont.recall",
        skip(self, store, query),
        fields(limit = query.limit, candidates = tracing::field::Empty)
    )]
    fn recall(
        &self,
        store: &dyn MemoryStore,
        query: &RecallQuery<'_>,
        now: u64,
    ) -> Vec<RecallCandidate> {
        let start = Instant::now();
        let mut candidates: Vec<RecallCandidate> = Tier::ALL
            .iter()
            .flat_map(|tier| self.rank_tier(store, *tier, query, now))
            .collect();
        candidates.sort_by(compare_candidates);
        candidates.truncate(query.limit);

        tracing::Span::current().record("candidates", candidates.len());
        #[allow(clippy::cast_precision_loss)]
        let found = candidates.len() as f64;
        metrics::histogram!("recall_candidates").record(found);
        metrics::histogram!("recall_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        candidates
    }
}

/// Score descending, then most recent access, then tier priority, then id.
fn compare_candidates(a: &RecallCandidate, b: &RecallCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.item.last_access.cmp(&a.item.last_access))
        .then_with(|| a.item.tier.priority().cmp(&b.item.tier.priority()))
        .then_with(|| a.item.id.cmp(&b.item.id))
}
