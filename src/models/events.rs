//! Events published by the feedback and consolidation loop.

use super::{AnswerSource, ConfidenceBand, DecisionId, FeedbackSource, MemoryId, Route, Tier};
use crate::current_timestamp;
use crate::observability::current_request_id;
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Request ID of the utterance that caused the event, if any.
    pub correlation_id: Option<String>,
    /// Emitting component.
    pub source: &'static str,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates metadata stamped with the current time and request ID.
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        Self::with_timestamp(source, current_request_id(), current_timestamp())
    }

    /// Creates metadata with an explicit correlation ID and timestamp.
    #[must_use]
    pub fn with_timestamp(
        source: &'static str,
        correlation_id: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id,
            source,
            timestamp,
        }
    }
}

/// Why a memory left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Short-Term retention window elapsed below the promotion threshold.
    Expired,
    /// Short-Term capacity overflow.
    Overflow,
    /// Repeated failed reuse.
    Failures,
    /// Merged into a near-duplicate.
    Merged,
}

impl EvictionReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Overflow => "overflow",
            Self::Failures => "failures",
            Self::Merged => "merged",
        }
    }
}

/// Events emitted by the core.
#[derive(Debug, Clone)]
pub enum SymbiontEvent {
    /// An arbitration decision was recorded.
    DecisionRecorded {
        /// Event metadata.
        meta: EventMeta,
        /// The decision.
        decision_id: DecisionId,
        /// Topic at decision time.
        topic: String,
        /// Band at decision time.
        band: ConfidenceBand,
        /// Route taken.
        route: Route,
    },
    /// A delegated answer was learned as a new memory.
    MemoryLearned {
        /// Event metadata.
        meta: EventMeta,
        /// The new memory.
        memory_id: MemoryId,
        /// Tier it was admitted to.
        tier: Tier,
        /// Where the learned answer came from.
        source: AnswerSource,
    },
    /// Feedback was applied to a decision.
    FeedbackApplied {
        /// Event metadata.
        meta: EventMeta,
        /// The resolved decision.
        decision_id: DecisionId,
        /// Topic that was updated.
        topic: String,
        /// Confidence delta.
        delta: f32,
        /// How the feedback arrived.
        source: FeedbackSource,
    },
    /// A topic crossed a band boundary.
    BandChanged {
        /// Event metadata.
        meta: EventMeta,
        /// Topic name.
        topic: String,
        /// Previous band.
        from: ConfidenceBand,
        /// New band.
        to: ConfidenceBand,
    },
    /// A memory was removed from the store.
    MemoryEvicted {
        /// Event metadata.
        meta: EventMeta,
        /// The removed memory.
        memory_id: MemoryId,
        /// Why it was removed.
        reason: EvictionReason,
    },
    /// A consolidation pass finished.
    Consolidated {
        /// Event metadata.
        meta: EventMeta,
        /// Near-duplicates merged.
        merged: usize,
        /// Short-Term items promoted.
        promoted: usize,
        /// Long-Term items demoted.
        demoted: usize,
        /// Short-Term items expired.
        expired: usize,
    },
}

impl SymbiontEvent {
    /// Returns the event type as a string slice.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::DecisionRecorded { .. } => "decision_recorded",
            Self::MemoryLearned { .. } => "memory_learned",
            Self::FeedbackApplied { .. } => "feedback_applied",
            Self::BandChanged { .. } => "band_changed",
            Self::MemoryEvicted { .. } => "memory_evicted",
            Self::Consolidated { .. } => "consolidated",
        }
    }

    /// Returns the event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::DecisionRecorded { meta, .. }
            | Self::MemoryLearned { meta, .. }
            | Self::FeedbackApplied { meta, .. }
            | Self::BandChanged { meta, .. }
            | Self::MemoryEvicted { meta, .. }
            | Self::Consolidated { meta, .. } => meta,
        }
    }
}
