//! Memory types and identifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random memory ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Memory tier. Every item is owned by exactly one tier at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Small LRU-ordered scratch space for the current exchange.
    #[default]
    Working,
    /// Bounded, time-limited buffer between Working and Long-Term.
    ShortTerm,
    /// Durable memory, persisted through the storage backend.
    LongTerm,
}

impl Tier {
    /// All tiers in lock and tie-break priority order.
    pub const ALL: [Self; 3] = [Self::Working, Self::ShortTerm, Self::LongTerm];

    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }

    /// Tie-break priority: lower wins (Working > `ShortTerm` > `LongTerm`).
    #[must_use]
    pub const fn priority(&self) -> u8 {
        match self {
            Self::Working => 0,
            Self::ShortTerm => 1,
            Self::LongTerm => 2,
        }
    }

    /// Parses a tier string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "working" => Some(Self::Working),
            "short_term" | "short-term" | "shortterm" => Some(Self::ShortTerm),
            "long_term" | "long-term" | "longterm" => Some(Self::LongTerm),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Emotional tag attached to a memory.
///
/// Valence lies in [-1, 1]; arousal and dominance in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmotionalTag {
    /// Pleasantness.
    pub valence: f32,
    /// Intensity.
    pub arousal: f32,
    /// Sense of control.
    pub dominance: f32,
}

impl EmotionalTag {
    /// Creates a tag, clamping each component into its range.
    #[must_use]
    pub fn new(valence: f32, arousal: f32, dominance: f32) -> Self {
        Self {
            valence: clamp_unit(valence, -1.0),
            arousal: clamp_unit(arousal, 0.0),
            dominance: clamp_unit(dominance, 0.0),
        }
    }

    /// A neutral tag.
    #[must_use]
    pub const fn neutral() -> Self {
        Self {
            valence: 0.0,
            arousal: 0.0,
            dominance: 0.5,
        }
    }
}

fn clamp_unit(value: f32, min: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, 1.0)
    } else {
        0.0
    }
}

/// One remembered unit: a fact, an answered concept, or a conversational fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier, preserved across promotion and demotion.
    pub id: MemoryId,
    /// Textual content.
    pub content: String,
    /// Feature vector produced by the feature extractor.
    pub features: Vec<f32>,
    /// Emotional tag.
    pub emotion: EmotionalTag,
    /// Importance in [0, 1].
    pub importance: f32,
    /// Confidence contribution in [0, 1].
    pub confidence: f32,
    /// Topic labels. Must be non-empty for Long-Term eligibility.
    pub topics: BTreeSet<String>,
    /// Owning tier.
    pub tier: Tier,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last access timestamp (Unix epoch seconds).
    pub last_access: u64,
    /// When the item entered its current tier (Unix epoch seconds).
    pub tier_since: u64,
    /// Consecutive failed reuses.
    pub failures: u32,
}

impl MemoryItem {
    /// Creates a new Working-tier item with a fresh ID.
    #[must_use]
    pub fn new(content: impl Into<String>, features: Vec<f32>, now: u64) -> Self {
        Self {
            id: MemoryId::generate(),
            content: content.into(),
            features,
            emotion: EmotionalTag::neutral(),
            importance: 0.5,
            confidence: 0.0,
            topics: BTreeSet::new(),
            tier: Tier::Working,
            created_at: now,
            last_access: now,
            tier_since: now,
            failures: 0,
        }
    }

    /// Sets the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MemoryId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the importance, clamped into [0, 1].
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Adds a topic label.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    /// Sets the emotional tag.
    #[must_use]
    pub const fn with_emotion(mut self, emotion: EmotionalTag) -> Self {
        self.emotion = emotion;
        self
    }

    /// Requests admission into a specific tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Returns true if the item may live in the Long-Term tier.
    #[must_use]
    pub fn is_long_term_eligible(&self, threshold: f32) -> bool {
        !self.topics.is_empty() && self.importance >= threshold
    }

    /// Records an access.
    pub const fn touch(&mut self, now: u64) {
        if now > self.last_access {
            self.last_access = now;
        }
    }

    /// Moves the item into a new tier, preserving ID and content.
    pub const fn relocate(&mut self, tier: Tier, now: u64) {
        self.tier = tier;
        self.tier_since = now;
    }
}
