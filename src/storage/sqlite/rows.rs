//! Row conversion for the `long_term_memories` table.

use crate::models::{EmotionalTag, MemoryId, MemoryItem, Tier};
use crate::{Error, Result};
use std::collections::BTreeSet;

/// Column list shared by the insert and select statements.
pub const MEMORY_COLUMNS: &str = "id, content, features, emotion, importance, confidence, \
     topics, created_at, last_access, tier_since, failures";

/// Raw `long_term_memories` row.
#[derive(Debug)]
pub struct MemoryRow {
    pub id: String,
    pub content: String,
    pub features: String,
    pub emotion: String,
    pub importance: f64,
    pub confidence: f64,
    pub topics: String,
    pub created_at: i64,
    pub last_access: i64,
    pub tier_since: i64,
    pub failures: i64,
}

impl MemoryRow {
    /// Reads a row selected with [`MEMORY_COLUMNS`].
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            features: row.get(2)?,
            emotion: row.get(3)?,
            importance: row.get(4)?,
            confidence: row.get(5)?,
            topics: row.get(6)?,
            created_at: row.get(7)?,
            last_access: row.get(8)?,
            tier_since: row.get(9)?,
            failures: row.get(10)?,
        })
    }

    /// Builds a row from a Long-Term item.
    pub fn from_item(item: &MemoryItem) -> Result<Self> {
        Ok(Self {
            id: item.id.as_str().to_string(),
            content: item.content.clone(),
            features: to_json("encode_features", &item.features)?,
            emotion: to_json("encode_emotion", &item.emotion)?,
            importance: f64::from(item.importance),
            confidence: f64::from(item.confidence),
            topics: to_json("encode_topics", &item.topics)?,
            created_at: to_sql_time(item.created_at),
            last_access: to_sql_time(item.last_access),
            tier_since: to_sql_time(item.tier_since),
            failures: i64::from(item.failures),
        })
    }

    /// Converts the row back into a Long-Term item.
    #[allow(clippy::cast_possible_truncation)]
    pub fn into_item(self) -> Result<MemoryItem> {
        let features: Vec<f32> = from_json("decode_features", &self.features)?;
        let emotion: EmotionalTag = from_json("decode_emotion", &self.emotion)?;
        let topics: BTreeSet<String> = from_json("decode_topics", &self.topics)?;
        Ok(MemoryItem {
            id: MemoryId::new(self.id),
            content: self.content,
            features,
            emotion,
            importance: (self.importance as f32).clamp(0.0, 1.0),
            confidence: (self.confidence as f32).clamp(0.0, 1.0),
            topics,
            tier: Tier::LongTerm,
            created_at: from_sql_time(self.created_at),
            last_access: from_sql_time(self.last_access),
            tier_since: from_sql_time(self.tier_since),
            failures: u32::try_from(self.failures).unwrap_or(0),
        })
    }
}

fn to_json<T: serde::Serialize>(operation: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(operation: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })
}

/// Unix seconds as stored by `SQLite` (rusqlite has no `ToSql` for u64).
#[allow(clippy::cast_possible_wrap)]
pub const fn to_sql_time(ts: u64) -> i64 {
    ts as i64
}

/// Negative stored timestamps read back as the epoch.
#[allow(clippy::cast_sign_loss)]
pub const fn from_sql_time(ts: i64) -> u64 {
    if ts < 0 { 0 } else { ts as u64 }
}
