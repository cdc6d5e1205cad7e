//! Topic confidence types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Confidence band derived from a topic's running confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    /// Confidence below the low threshold.
    Low,
    /// Confidence between the low and high thresholds.
    Medium,
    /// Confidence at or above the high threshold.
    High,
}

impl ConfidenceBand {
    /// Classifies a confidence value.
    ///
    /// LOW if `confidence < low`, MEDIUM if `confidence < high`, otherwise HIGH.
    #[must_use]
    pub fn classify(confidence: f32, low: f32, high: f32) -> Self {
        if confidence < low {
            Self::Low
        } else if confidence < high {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Returns the band as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate confidence state for a named concept.
///
/// The band is never stored; it is recomputed from `confidence` on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name.
    pub name: String,
    /// Running confidence in [0, 1].
    pub confidence: f32,
    /// Number of feedback events applied.
    pub interactions: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
}

impl Topic {
    /// Creates a topic at the given confidence floor.
    #[must_use]
    pub fn new(name: impl Into<String>, floor: f32, now: u64) -> Self {
        Self {
            name: name.into(),
            confidence: floor.clamp(0.0, 1.0),
            interactions: 0,
            updated_at: now,
        }
    }

    /// Returns the current band for the given thresholds.
    #[must_use]
    pub fn band(&self, low: f32, high: f32) -> ConfidenceBand {
        ConfidenceBand::classify(self.confidence, low, high)
    }
}

/// Before/after view of a confidence update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceChange {
    /// Confidence before the update.
    pub before: f32,
    /// Confidence after the update.
    pub after: f32,
    /// Band before the update.
    pub band_before: ConfidenceBand,
    /// Band after the update.
    pub band_after: ConfidenceBand,
}

impl ConfidenceChange {
    /// Signed confidence delta.
    #[must_use]
    pub fn delta(&self) -> f32 {
        self.after - self.before
    }

    /// Returns true if the update crossed a band boundary.
    #[must_use]
    pub fn band_changed(&self) -> bool {
        self.band_before != self.band_after
    }
}
