//! Storage layer.
//!
//! The relational store collaborator behind the Long-Term tier and the
//! interaction ledger:
//! - **`SQLite`**: durable storage in a single database file
//! - **Memory**: non-persistent storage for tests and `--in-memory` runs

// Dropping the connection guard slightly earlier buys nothing here.
#![allow(clippy::significant_drop_tightening)]

mod memory;
mod sqlite;
pub mod traits;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{
    HistoryRecord, InteractionRecord, PatternRecord, PreferenceRecord, StorageBackend,
};

use std::path::{Path, PathBuf};

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "symbiont.db";

/// Returns the database path inside a data directory.
#[must_use]
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}
