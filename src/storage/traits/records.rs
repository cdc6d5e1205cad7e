//! Rows exchanged with a storage backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One utterance and the routing decision taken for it (`interactions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Decision ID; history rows reference it.
    pub id: String,
    /// User that produced the utterance.
    pub user_id: String,
    /// Utterance text.
    pub content: String,
    /// Unix epoch seconds.
    pub timestamp: u64,
    /// Session, topic, band and route at decision time.
    pub context: Value,
    /// Candidates and regime.
    pub metadata: Value,
}

/// Per-user topic confidence, upserted on every feedback event (`user_preferences`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    /// User whose feedback produced the row.
    pub user_id: String,
    /// Topic name.
    pub preference_type: String,
    /// Serialized band and interaction count.
    pub preference_value: Value,
    /// Topic confidence after the update.
    pub confidence: f32,
    /// Unix epoch seconds.
    pub updated_at: u64,
}

/// Append-only feedback trail (`preference_history`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Feedback record ID.
    pub id: String,
    /// User that produced the resolved utterance.
    pub user_id: String,
    /// The interaction (decision) this feedback resolves.
    pub interaction_id: String,
    /// Topic name.
    pub preference_type: String,
    /// Serialized signal, delta and source.
    pub observed_value: Value,
    /// Topic confidence after the update.
    pub confidence: f32,
    /// Unix epoch seconds.
    pub created_at: u64,
}

/// Longitudinal summary row (`temporal_patterns`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Pattern ID.
    pub id: String,
    /// Owning user, or `system` for consolidation summaries.
    pub user_id: String,
    /// Pattern kind, e.g. `consolidation`.
    pub pattern_type: String,
    /// Pattern payload.
    pub pattern_data: Value,
    /// Confidence in the pattern.
    pub confidence: f32,
    /// Unix epoch seconds.
    pub created_at: u64,
}
