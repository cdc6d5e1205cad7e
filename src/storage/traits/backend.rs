//! Storage backend trait.

use super::{HistoryRecord, InteractionRecord, PatternRecord, PreferenceRecord};
use crate::Result;
use crate::models::{MemoryId, MemoryItem, Topic};

/// Trait for the relational store collaborator.
///
/// Backends persist the Long-Term tier and the interaction ledger. All
/// methods take `&self`; implementations handle their own synchronization.
pub trait StorageBackend: Send + Sync {
    /// Returns the backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Inserts or replaces a Long-Term memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails.
    fn persist_memory(&self, item: &MemoryItem) -> Result<()>;

    /// Deletes a Long-Term memory. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the delete fails.
    fn delete_memory(&self, id: &MemoryId) -> Result<bool>;

    /// Loads every persisted Long-Term memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the read fails.
    fn load_memories(&self) -> Result<Vec<MemoryItem>>;

    /// Records an interaction row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails.
    fn record_interaction(&self, record: &InteractionRecord) -> Result<()>;

    /// Upserts a (user, topic) confidence row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails.
    fn upsert_preference(&self, record: &PreferenceRecord) -> Result<()>;

    /// Appends a feedback history row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails or the
    /// referenced interaction does not exist.
    fn append_history(&self, record: &HistoryRecord) -> Result<()>;

    /// Loads topic confidences, taking the most recent row per topic.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the read fails.
    fn load_topics(&self) -> Result<Vec<Topic>>;

    /// Records a longitudinal pattern row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the write fails.
    fn record_pattern(&self, record: &PatternRecord) -> Result<()>;
}
