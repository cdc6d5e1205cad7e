//! In-memory storage backend for tests and ephemeral runs.

use crate::models::{MemoryId, MemoryItem, Topic};
use crate::storage::traits::{
    HistoryRecord, InteractionRecord, PatternRecord, PreferenceRecord, StorageBackend,
};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    memories: HashMap<MemoryId, MemoryItem>,
    interactions: HashMap<String, InteractionRecord>,
    preferences: HashMap<(String, String), PreferenceRecord>,
    history: Vec<HistoryRecord>,
    patterns: Vec<PatternRecord>,
}

/// Non-persistent [`StorageBackend`] with the same contract as `SQLite`.
///
/// Can be switched unavailable to exercise storage-failure paths: every call
/// then fails with [`Error::OperationFailed`].
#[derive(Debug)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Marks the store available or unavailable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of persisted Long-Term memories.
    #[must_use]
    pub fn memory_count(&self) -> usize {
        self.read().memories.len()
    }

    /// Returns the number of recorded interactions.
    #[must_use]
    pub fn interaction_count(&self) -> usize {
        self.read().interactions.len()
    }

    /// Returns the feedback trail of one interaction.
    #[must_use]
    pub fn history_for(&self, interaction_id: &str) -> Vec<HistoryRecord> {
        self.read()
            .history
            .iter()
            .filter(|h| h.interaction_id == interaction_id)
            .cloned()
            .collect()
    }

    /// Returns all pattern rows, oldest first.
    #[must_use]
    pub fn patterns(&self) -> Vec<PatternRecord> {
        self.read().patterns.clone()
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: "storage unavailable".to_string(),
            })
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn persist_memory(&self, item: &MemoryItem) -> Result<()> {
        self.check("persist_memory")?;
        self.write().memories.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn delete_memory(&self, id: &MemoryId) -> Result<bool> {
        self.check("delete_memory")?;
        Ok(self.write().memories.remove(id).is_some())
    }

    fn load_memories(&self) -> Result<Vec<MemoryItem>> {
        self.check("load_memories")?;
        let mut items: Vec<MemoryItem> = self.read().memories.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    fn record_interaction(&self, record: &InteractionRecord) -> Result<()> {
        self.check("record_interaction")?;
        let mut tables = self.write();
        if tables.interactions.contains_key(&record.id) {
            return Err(Error::OperationFailed {
                operation: "record_interaction".to_string(),
                cause: format!("interaction '{}' already recorded", record.id),
            });
        }
        tables.interactions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn upsert_preference(&self, record: &PreferenceRecord) -> Result<()> {
        self.check("upsert_preference")?;
        let key = (record.user_id.clone(), record.preference_type.clone());
        self.write().preferences.insert(key, record.clone());
        Ok(())
    }

    fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        self.check("append_history")?;
        let mut tables = self.write();
        if !tables.interactions.contains_key(&record.interaction_id) {
            return Err(Error::OperationFailed {
                operation: "append_history".to_string(),
                cause: format!("unknown interaction '{}'", record.interaction_id),
            });
        }
        tables.history.push(record.clone());
        Ok(())
    }

    fn load_topics(&self) -> Result<Vec<Topic>> {
        self.check("load_topics")?;
        let tables = self.read();
        let mut latest: HashMap<&str, &PreferenceRecord> = HashMap::new();
        for record in tables.preferences.values() {
            let newer = latest
                .get(record.preference_type.as_str())
                .is_none_or(|current| record.updated_at >= current.updated_at);
            if newer {
                latest.insert(&record.preference_type, record);
            }
        }
        let mut topics: Vec<Topic> = latest
            .into_values()
            .map(|record| Topic {
                name: record.preference_type.clone(),
                confidence: record.confidence.clamp(0.0, 1.0),
                interactions: record
                    .preference_value
                    .get("interactions")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                updated_at: record.updated_at,
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    fn record_pattern(&self, record: &PatternRecord) -> Result<()> {
        self.check("record_pattern")?;
        self.write().patterns.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unavailable_store_fails_every_call() {
        let storage = InMemoryStorage::new();
        let item = MemoryItem::new("fact", vec![1.0], 1);
        storage.set_available(false);
        assert!(matches!(
            storage.persist_memory(&item),
            Err(Error::OperationFailed { .. })
        ));
        assert!(storage.load_topics().is_err());

        storage.set_available(true);
        storage.persist_memory(&item).expect("persist");
        assert_eq!(storage.memory_count(), 1);
    }

    #[test]
    fn test_history_requires_interaction() {
        let storage = InMemoryStorage::new();
        let history = HistoryRecord {
            id: "h1".into(),
            user_id: "u".into(),
            interaction_id: "d1".into(),
            preference_type: "python".into(),
            observed_value: json!(null),
            confidence: 0.2,
            created_at: 1,
        };
        assert!(storage.append_history(&history).is_err());
        storage
            .record_interaction(&InteractionRecord {
                id: "d1".into(),
                user_id: "u".into(),
                content: "q".into(),
                timestamp: 1,
                context: json!({}),
                metadata: json!({}),
            })
            .expect("interaction");
        storage.append_history(&history).expect("history");
        assert_eq!(storage.history_for("d1").len(), 1);
    }
}
