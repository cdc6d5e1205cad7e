//! Storage backend traits and record types.

mod backend;
mod records;

pub use backend::StorageBackend;
pub use records::{HistoryRecord, InteractionRecord, PatternRecord, PreferenceRecord};
