//! Arbitration decision records.

use super::{ConfidenceBand, MemoryId, Tier};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an arbitration decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(String);

impl DecisionId {
    /// Creates a decision ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, time-ordered decision ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DecisionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Arbitration regime, derived purely from the confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    /// LOW band: always delegate and learn.
    Symbiosis,
    /// MEDIUM band: answer from memory when the best candidate is accepted.
    Evolving,
    /// HIGH band: answer from memory unless nothing relevant is remembered.
    Autonomous,
}

impl Regime {
    /// Maps a band to its regime.
    #[must_use]
    pub const fn from_band(band: ConfidenceBand) -> Self {
        match band {
            ConfidenceBand::Low => Self::Symbiosis,
            ConfidenceBand::Medium => Self::Evolving,
            ConfidenceBand::High => Self::Autonomous,
        }
    }

    /// Returns the regime as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Symbiosis => "symbiosis",
            Self::Evolving => "evolving",
            Self::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Route taken for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Answered from memory.
    Autonomous,
    /// Routed to the external generator.
    Delegated,
}

impl Route {
    /// Returns the route as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Delegated => "delegated",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the delivered answer text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    /// A remembered item ("true autonomy").
    Memory,
    /// A successful generator call.
    Generator,
    /// The local template responder after the generator failed.
    Degraded,
}

impl AnswerSource {
    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Generator => "success",
            Self::Degraded => "degraded",
        }
    }
}

/// A recall candidate as seen at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// The matched memory.
    pub memory_id: MemoryId,
    /// Combined recall score.
    pub score: f32,
    /// Tier the memory lived in.
    pub tier: Tier,
}

/// Outcome attached to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DecisionOutcome {
    /// Waiting for feedback.
    Pending,
    /// Feedback applied; the decision is now immutable.
    Resolved {
        /// The feedback signal, or `None` when resolved as unknown/neutral.
        signal: Option<f32>,
        /// Confidence delta applied to the topic.
        confidence_delta: f32,
        /// Resolution timestamp (Unix epoch seconds).
        resolved_at: u64,
    },
}

impl DecisionOutcome {
    /// Returns true while feedback is outstanding.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Record of one routing choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationDecision {
    /// Decision identifier.
    pub id: DecisionId,
    /// Session that produced the utterance.
    pub session_id: String,
    /// User that produced the utterance.
    pub user_id: String,
    /// The utterance text.
    pub query: String,
    /// Topic at decision time.
    pub topic: String,
    /// Confidence band at decision time.
    pub band: ConfidenceBand,
    /// Regime implied by the band.
    pub regime: Regime,
    /// Matched memories and their scores.
    pub candidates: Vec<CandidateScore>,
    /// Route chosen.
    pub route: Route,
    /// Memory used for an autonomous answer.
    pub answer_memory: Option<MemoryId>,
    /// Memory learned from a delegated answer.
    pub learned_memory: Option<MemoryId>,
    /// Where the answer came from, once the path has executed.
    pub source: Option<AnswerSource>,
    /// End-to-end latency in milliseconds, once the path has executed.
    pub latency_ms: Option<u64>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Feedback outcome.
    pub outcome: DecisionOutcome,
}

impl ArbitrationDecision {
    /// Returns a label combining route and answer source, e.g. `delegated/degraded`.
    #[must_use]
    pub fn label(&self) -> String {
        match (self.route, self.source) {
            (Route::Autonomous, _) => "autonomous".to_string(),
            (Route::Delegated, Some(source)) => format!("delegated/{}", source.as_str()),
            (Route::Delegated, None) => "delegated/pending".to_string(),
        }
    }

    /// Memories whose importance is affected by feedback on this decision.
    #[must_use]
    pub fn used_memories(&self) -> Vec<&MemoryId> {
        self.answer_memory
            .iter()
            .chain(self.learned_memory.iter())
            .collect()
    }
}
