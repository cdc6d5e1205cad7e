//! `SQLite` storage backend.
//!
//! Holds the Long-Term tier (`long_term_memories`) and the interaction
//! ledger (`interactions`, `user_preferences`, `preference_history`,
//! `temporal_patterns`).
//!
//! # Concurrency Model
//!
//! `rusqlite::Connection` is not `Sync`, so it lives behind a `Mutex`. WAL
//! mode and a 5 second `busy_timeout` keep other processes reading while a
//! write is in flight. A poisoned mutex is recovered rather than propagated.

mod connection;
mod metrics;
mod rows;

use crate::models::{MemoryId, MemoryItem, Topic};
use crate::storage::traits::{
    HistoryRecord, InteractionRecord, PatternRecord, PreferenceRecord, StorageBackend,
};
use crate::{Error, Result};
use self::connection::{acquire_lock, configure_connection, sql_error};
use self::metrics::{record_operation_metrics, status_of};
use self::rows::{MEMORY_COLUMNS, MemoryRow, from_sql_time, to_sql_time};
use rusqlite::{Connection, params};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const BACKEND: &str = "sqlite";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS interactions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    context TEXT,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_interactions_user ON interactions(user_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS user_preferences (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    preference_type TEXT NOT NULL,
    preference_value TEXT,
    confidence REAL NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(user_id, preference_type)
);

CREATE TABLE IF NOT EXISTS preference_history (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    interaction_id TEXT NOT NULL REFERENCES interactions(id),
    preference_type TEXT NOT NULL,
    observed_value TEXT,
    confidence REAL NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_interaction ON preference_history(interaction_id);

CREATE TABLE IF NOT EXISTS temporal_patterns (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    pattern_type TEXT NOT NULL,
    pattern_data TEXT,
    confidence REAL NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_patterns_type ON temporal_patterns(pattern_type, created_at DESC);

CREATE TABLE IF NOT EXISTS long_term_memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    features TEXT NOT NULL,
    emotion TEXT NOT NULL,
    importance REAL NOT NULL,
    confidence REAL NOT NULL,
    topics TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_access INTEGER NOT NULL,
    tier_since INTEGER NOT NULL,
    failures INTEGER NOT NULL DEFAULT 0
);
";

/// `SQLite`-backed [`StorageBackend`].
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_data_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let conn = Connection::open(&db_path).map_err(sql_error("open_sqlite"))?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_error("open_sqlite_in_memory"))?;
        let storage = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        configure_connection(&conn)?;
        conn.execute_batch(SCHEMA)
            .map_err(sql_error("create_schema"))
    }

    /// Loads the feedback trail of one interaction, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_history(&self, interaction_id: &str) -> Result<Vec<HistoryRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, interaction_id, preference_type, observed_value, confidence, created_at
                 FROM preference_history WHERE interaction_id = ?1 ORDER BY created_at, rowid",
            )
            .map_err(sql_error("prepare_load_history"))?;
        let rows = stmt
            .query_map(params![interaction_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(sql_error("load_history"))?;

        let mut history = Vec::new();
        for row in rows {
            let (id, user_id, interaction_id, preference_type, observed, confidence, created_at) =
                row.map_err(sql_error("read_history_row"))?;
            history.push(HistoryRecord {
                id,
                user_id,
                interaction_id,
                preference_type,
                observed_value: parse_value(observed.as_deref()),
                confidence: narrow(confidence),
                created_at: from_sql_time(created_at),
            });
        }
        Ok(history)
    }

    /// Loads pattern rows of one kind, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_patterns(&self, pattern_type: &str) -> Result<Vec<PatternRecord>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, pattern_type, pattern_data, confidence, created_at
                 FROM temporal_patterns WHERE pattern_type = ?1 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(sql_error("prepare_load_patterns"))?;
        let rows = stmt
            .query_map(params![pattern_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(sql_error("load_patterns"))?;

        let mut patterns = Vec::new();
        for row in rows {
            let (id, user_id, pattern_type, data, confidence, created_at) =
                row.map_err(sql_error("read_pattern_row"))?;
            patterns.push(PatternRecord {
                id,
                user_id,
                pattern_type,
                pattern_data: parse_value(data.as_deref()),
                confidence: narrow(confidence),
                created_at: from_sql_time(created_at),
            });
        }
        Ok(patterns)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow(value: f64) -> f32 {
    value as f32
}

fn parse_value(raw: Option<&str>) -> Value {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(Value::Null)
}

impl StorageBackend for SqliteStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, item), fields(operation = "persist_memory", backend = BACKEND, memory.id = %item.id))]
    fn persist_memory(&self, item: &MemoryItem) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let row = MemoryRow::from_item(item)?;
            let conn = acquire_lock(&self.conn);
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO long_term_memories ({MEMORY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    row.id,
                    row.content,
                    row.features,
                    row.emotion,
                    row.importance,
                    row.confidence,
                    row.topics,
                    row.created_at,
                    row.last_access,
                    row.tier_since,
                    row.failures
                ],
            )
            .map_err(sql_error("persist_memory"))?;
            Ok(())
        })();
        record_operation_metrics(BACKEND, "persist_memory", start, status_of(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "delete_memory", backend = BACKEND, memory.id = %id))]
    fn delete_memory(&self, id: &MemoryId) -> Result<bool> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let deleted = conn
                .execute(
                    "DELETE FROM long_term_memories WHERE id = ?1",
                    params![id.as_str()],
                )
                .map_err(sql_error("delete_memory"))?;
            Ok(deleted > 0)
        })();
        record_operation_metrics(BACKEND, "delete_memory", start, status_of(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "load_memories", backend = BACKEND))]
    fn load_memories(&self) -> Result<Vec<MemoryItem>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM long_term_memories ORDER BY created_at, id"
                ))
                .map_err(sql_error("prepare_load_memories"))?;
            let rows = stmt
                .query_map([], MemoryRow::from_row)
                .map_err(sql_error("load_memories"))?;

            let mut items = Vec::new();
            for row in rows {
                let row = row.map_err(sql_error("read_memory_row"))?;
                match row.into_item() {
                    Ok(item) => items.push(item),
                    Err(e) => tracing::warn!(error = %e, "skipping undecodable long-term row"),
                }
            }
            Ok(items)
        })();
        record_operation_metrics(BACKEND, "load_memories", start, status_of(&result));
        result
    }

    #[instrument(skip(self, record), fields(operation = "record_interaction", backend = BACKEND, interaction.id = %record.id))]
    fn record_interaction(&self, record: &InteractionRecord) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO interactions (id, user_id, content, timestamp, context, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.user_id,
                    record.content,
                    to_sql_time(record.timestamp),
                    record.context.to_string(),
                    record.metadata.to_string()
                ],
            )
            .map_err(sql_error("record_interaction"))?;
            Ok(())
        })();
        record_operation_metrics(BACKEND, "record_interaction", start, status_of(&result));
        result
    }

    #[instrument(skip(self, record), fields(operation = "upsert_preference", backend = BACKEND, topic = %record.preference_type))]
    fn upsert_preference(&self, record: &PreferenceRecord) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let now = to_sql_time(record.updated_at);
            conn.execute(
                "INSERT INTO user_preferences
                    (id, user_id, preference_type, preference_value, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(user_id, preference_type) DO UPDATE SET
                    preference_value = excluded.preference_value,
                    confidence = excluded.confidence,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    record.user_id,
                    record.preference_type,
                    record.preference_value.to_string(),
                    f64::from(record.confidence),
                    now
                ],
            )
            .map_err(sql_error("upsert_preference"))?;
            Ok(())
        })();
        record_operation_metrics(BACKEND, "upsert_preference", start, status_of(&result));
        result
    }

    #[instrument(skip(self, record), fields(operation = "append_history", backend = BACKEND, interaction.id = %record.interaction_id))]
    fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT INTO preference_history
                    (id, user_id, interaction_id, preference_type, observed_value, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.user_id,
                    record.interaction_id,
                    record.preference_type,
                    record.observed_value.to_string(),
                    f64::from(record.confidence),
                    to_sql_time(record.created_at)
                ],
            )
            .map_err(sql_error("append_history"))?;
            Ok(())
        })();
        record_operation_metrics(BACKEND, "append_history", start, status_of(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "load_topics", backend = BACKEND))]
    fn load_topics(&self) -> Result<Vec<Topic>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(
                    "SELECT preference_type, preference_value, confidence, updated_at
                     FROM user_preferences ORDER BY updated_at, rowid",
                )
                .map_err(sql_error("prepare_load_topics"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })
                .map_err(sql_error("load_topics"))?;

            // Later rows overwrite earlier ones: the latest row per topic wins.
            let mut latest: HashMap<String, Topic> = HashMap::new();
            for row in rows {
                let (name, value, confidence, updated_at) =
                    row.map_err(sql_error("read_topic_row"))?;
                let interactions = parse_value(value.as_deref())
                    .get("interactions")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                latest.insert(
                    name.clone(),
                    Topic {
                        name,
                        confidence: narrow(confidence).clamp(0.0, 1.0),
                        interactions,
                        updated_at: from_sql_time(updated_at),
                    },
                );
            }
            let mut topics: Vec<Topic> = latest.into_values().collect();
            topics.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(topics)
        })();
        record_operation_metrics(BACKEND, "load_topics", start, status_of(&result));
        result
    }

    #[instrument(skip(self, record), fields(operation = "record_pattern", backend = BACKEND, pattern.kind = %record.pattern_type))]
    fn record_pattern(&self, record: &PatternRecord) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let created = to_sql_time(record.created_at);
            conn.execute(
                "INSERT INTO temporal_patterns
                    (id, user_id, pattern_type, pattern_data, confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    record.id,
                    record.user_id,
                    record.pattern_type,
                    record.pattern_data.to_string(),
                    f64::from(record.confidence),
                    created
                ],
            )
            .map_err(sql_error("record_pattern"))?;
            Ok(())
        })();
        record_operation_metrics(BACKEND, "record_pattern", start, status_of(&result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use serde_json::json;

    fn interaction(id: &str) -> InteractionRecord {
        InteractionRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            content: "what is python".to_string(),
            timestamp: 100,
            context: json!({"topic": "python"}),
            metadata: json!({}),
        }
    }

    fn preference(user: &str, topic: &str, confidence: f32, at: u64) -> PreferenceRecord {
        PreferenceRecord {
            user_id: user.to_string(),
            preference_type: topic.to_string(),
            preference_value: json!({"band": "low", "interactions": 3}),
            confidence,
            updated_at: at,
        }
    }

    #[test]
    fn test_memory_persist_load_delete() {
        let storage = SqliteStorage::in_memory().expect("open");
        let item = MemoryItem::new("python is a language", vec![1.0, 0.0], 10)
            .with_id("m1")
            .with_importance(0.9)
            .with_topic("python")
            .with_tier(Tier::LongTerm);

        storage.persist_memory(&item).expect("persist");
        storage.persist_memory(&item).expect("persist is idempotent");
        let loaded = storage.load_memories().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "python is a language");

        assert!(storage.delete_memory(&item.id).expect("delete"));
        assert!(!storage.delete_memory(&item.id).expect("delete again"));
        assert!(storage.load_memories().expect("load").is_empty());
    }

    #[test]
    fn test_preference_upsert_is_unique_per_user_topic() {
        let storage = SqliteStorage::in_memory().expect("open");
        storage.upsert_preference(&preference("u1", "python", 0.2, 1)).expect("insert");
        storage.upsert_preference(&preference("u1", "python", 0.44, 2)).expect("update");

        let topics = storage.load_topics().expect("load");
        assert_eq!(topics.len(), 1);
        assert!((topics[0].confidence - 0.44).abs() < 1e-6);
        assert_eq!(topics[0].interactions, 3);
    }

    #[test]
    fn test_load_topics_takes_latest_row_across_users() {
        let storage = SqliteStorage::in_memory().expect("open");
        storage.upsert_preference(&preference("u1", "python", 0.5, 5)).expect("u1");
        storage.upsert_preference(&preference("u2", "python", 0.6, 9)).expect("u2");
        storage.upsert_preference(&preference("u1", "rust", 0.3, 7)).expect("rust");

        let topics = storage.load_topics().expect("load");
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "python");
        assert!((topics[0].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_history_requires_interaction() {
        let storage = SqliteStorage::in_memory().expect("open");
        let history = HistoryRecord {
            id: "h1".to_string(),
            user_id: "u1".to_string(),
            interaction_id: "d1".to_string(),
            preference_type: "python".to_string(),
            observed_value: json!({"signal": 1.0}),
            confidence: 0.44,
            created_at: 101,
        };
        assert!(storage.append_history(&history).is_err());

        storage.record_interaction(&interaction("d1")).expect("interaction");
        storage.append_history(&history).expect("history");
        let trail = storage.load_history("d1").expect("load");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].observed_value["signal"], json!(1.0));
    }

    #[test]
    fn test_duplicate_interaction_rejected() {
        let storage = SqliteStorage::in_memory().expect("open");
        storage.record_interaction(&interaction("d1")).expect("first");
        assert!(storage.record_interaction(&interaction("d1")).is_err());
    }

    #[test]
    fn test_patterns_newest_first() {
        let storage = SqliteStorage::in_memory().expect("open");
        for (id, at) in [("p1", 10), ("p2", 20)] {
            storage
                .record_pattern(&PatternRecord {
                    id: id.to_string(),
                    user_id: "system".to_string(),
                    pattern_type: "consolidation".to_string(),
                    pattern_data: json!({"merged": 1}),
                    confidence: 1.0,
                    created_at: at,
                })
                .expect("pattern");
        }
        let patterns = storage.load_patterns("consolidation").expect("load");
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].id, "p2");
    }
}
