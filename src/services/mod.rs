//! Business logic services.
//!
//! Each core component is a trait with one default implementation, wired
//! together by [`InteractionService`]:
//! - [`MemoryStore`] / [`TieredMemoryStore`]: Working, Short-Term and Long-Term tiers
//! - [`RecallRanker`] / [`WeightedRecallRanker`]: weighted cross-tier recall
//! - [`ConfidenceEstimator`] / [`EmaConfidenceEstimator`]: per-topic confidence
//! - [`ArbitrationController`]: memory versus generator routing
//! - [`FeedbackLoop`] and [`ConsolidationService`]: closing the loop

mod arbitration;
mod confidence;
mod consolidation;
mod feedback;
mod interaction;
mod memory_store;
mod recall;

pub use arbitration::{ArbitrationController, Verdict};
pub use confidence::{ConfidenceEstimator, EmaConfidenceEstimator};
pub use consolidation::{ConsolidationJob, ConsolidationService, ConsolidationStats};
pub use feedback::{Execution, FeedbackLoop};
pub use interaction::{Answer, InteractionService, InteractionServiceBuilder, SessionContext};
pub use memory_store::{MemoryStore, SweepReport, TieredMemoryStore};
pub use recall::{RecallCandidate, RecallQuery, RecallRanker, WeightedRecallRanker};
