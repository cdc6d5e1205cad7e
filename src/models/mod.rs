//! Data models for symbiont.
//!
//! The memory store owns [`MemoryItem`]s, the confidence estimator owns
//! [`Topic`]s, and the feedback loop owns [`ArbitrationDecision`]s and
//! [`FeedbackRecord`]s.

mod decision;
mod events;
mod feedback;
mod memory;
mod topic;

pub use decision::{
    AnswerSource, ArbitrationDecision, CandidateScore, DecisionId, DecisionOutcome, Regime, Route,
};
pub use events::{EventMeta, EvictionReason, SymbiontEvent};
pub use feedback::{FeedbackRecord, FeedbackSignal, FeedbackSource};
pub use memory::{EmotionalTag, MemoryId, MemoryItem, Tier};
pub use topic::{ConfidenceBand, ConfidenceChange, Topic};
