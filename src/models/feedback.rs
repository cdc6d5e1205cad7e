//! Feedback records.

use super::DecisionId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a piece of feedback was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSource {
    /// Explicit correction or rating from the user.
    Explicit,
    /// Inferred from the user continuing (or correcting) the conversation.
    Implicit,
    /// No feedback arrived before the pending timeout.
    Timeout,
}

impl FeedbackSource {
    /// Returns the source as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
            Self::Timeout => "timeout",
        }
    }
}

/// A graded feedback score in [0, 1]: 1.0 is success, 0.0 is failure.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackSignal(f32);

impl FeedbackSignal {
    /// Full success.
    pub const SUCCESS: Self = Self(1.0);
    /// Full failure.
    pub const FAILURE: Self = Self(0.0);

    /// Creates a graded signal. Values outside [0, 1] are clamped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for NaN or infinite scores.
    pub fn graded(score: f32) -> Result<Self> {
        if !score.is_finite() {
            return Err(Error::InvalidInput(format!(
                "feedback score must be finite, got {score}"
            )));
        }
        Ok(Self(score.clamp(0.0, 1.0)))
    }

    /// Returns the score.
    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// Returns true for scores at or above one half.
    #[must_use]
    pub fn is_success(self) -> bool {
        self.0 >= 0.5
    }
}

impl From<bool> for FeedbackSignal {
    fn from(success: bool) -> Self {
        if success { Self::SUCCESS } else { Self::FAILURE }
    }
}

/// Immutable outcome of a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Record identifier.
    pub id: String,
    /// The decision this feedback resolves.
    pub decision_id: DecisionId,
    /// Topic whose confidence was updated.
    pub topic: String,
    /// The signal, or `None` for unknown/neutral resolution.
    pub signal: Option<FeedbackSignal>,
    /// Confidence delta applied.
    pub confidence_delta: f32,
    /// Confidence after the update.
    pub confidence_after: f32,
    /// How the feedback was obtained.
    pub source: FeedbackSource,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}

impl FeedbackRecord {
    /// Creates a record with a fresh ID.
    #[must_use]
    pub fn new(
        decision_id: DecisionId,
        topic: impl Into<String>,
        signal: Option<FeedbackSignal>,
        source: FeedbackSource,
        now: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            decision_id,
            topic: topic.into(),
            signal,
            confidence_delta: 0.0,
            confidence_after: 0.0,
            source,
            created_at: now,
        }
    }
}
