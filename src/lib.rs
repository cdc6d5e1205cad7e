//! # Symbiont
//!
//! Tiered memory and confidence arbitration for a conversational agent that
//! progressively stops depending on an external text-generation model.
//!
//! Each utterance is turned into a feature vector, matched against a
//! three-tier memory (Working, Short-Term, Long-Term), and routed according
//! to the learned confidence of its topic:
//!
//! - **Symbiosis** (low confidence): always delegate to the generator and
//!   learn from the exchange.
//! - **Evolving** (medium confidence): answer from memory when the best
//!   candidate is good enough, otherwise delegate.
//! - **Autonomous** (high confidence): answer from memory, delegating only
//!   when nothing relevant is remembered.
//!
//! Feedback on each decision drives an exponential moving average of topic
//! confidence and the importance of the memories that were used. A background
//! consolidation job deduplicates, promotes, demotes and expires memories.
//!
//! ## Example
//!
//! ```rust,ignore
//! use symbiont::{InteractionService, SessionContext, SymbiontConfig};
//!
//! let service = InteractionService::builder(SymbiontConfig::default()).build()?;
//! let answer = service
//!     .handle_utterance("what is python?", &SessionContext::new("user-1"))
//!     .await?;
//! service.submit_feedback(&answer.decision_id, 1.0)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod features;
pub mod generator;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::SymbiontConfig;
pub use features::{FeatureExtractor, HashingFeatureExtractor};
pub use generator::{GenerationRequest, Generator, ModelGateway, TemplateResponder};
pub use models::{
    ArbitrationDecision, ConfidenceBand, DecisionId, FeedbackRecord, MemoryId, MemoryItem, Route,
    Tier, Topic,
};
pub use services::{
    Answer, ConfidenceEstimator, ConsolidationService, EmaConfidenceEstimator, FeedbackLoop,
    InteractionService, MemoryStore, RecallRanker, SessionContext, TieredMemoryStore,
    WeightedRecallRanker,
};
pub use storage::{InMemoryStorage, SqliteStorage, StorageBackend};

/// Error type for symbiont operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty utterances, non-finite feedback scores, invalid configuration |
/// | `OperationFailed` | Storage I/O fails, SQL statements fail, observability init fails |
/// | `Capacity` | Long-Term admission fails at the storage boundary |
/// | `GeneratorTransient` | Generator timeout or overload; retried by the gateway |
/// | `GeneratorFatal` | Malformed request or generator misconfiguration; never retried |
/// | `InvalidFeedback` | Feedback names an unknown or already-resolved decision |
/// | `ConsolidationConflict` | A merge target vanished under a concurrent consolidation |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements fail or the database cannot be opened
    /// - The storage backend reports itself unavailable
    /// - Configuration files cannot be read or parsed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Long-Term admission failed at the storage boundary.
    ///
    /// The item stays in Short-Term and is retried on the next consolidation tick.
    #[error("long-term admission of '{id}' failed: {cause}")]
    Capacity {
        /// The memory that could not be admitted.
        id: String,
        /// The underlying storage failure.
        cause: String,
    },

    /// Timeout or overload signaled by the generator.
    #[error("generator transient failure: {0}")]
    GeneratorTransient(String),

    /// Malformed request or fatal generator configuration.
    #[error("generator fatal failure: {0}")]
    GeneratorFatal(String),

    /// Feedback references an unknown or already-resolved decision.
    #[error("invalid feedback for decision '{decision_id}': {reason}")]
    InvalidFeedback {
        /// The decision named by the feedback.
        decision_id: String,
        /// Why the feedback was rejected.
        reason: String,
    },

    /// Two consolidation passes raced on the same item.
    #[error("consolidation conflict on '{id}'")]
    ConsolidationConflict {
        /// The contested memory.
        id: String,
    },
}

impl Error {
    /// Returns true if the failure is worth another generator attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GeneratorTransient(_))
    }
}

/// Result type alias for symbiont operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// ```rust
/// use symbiont::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
