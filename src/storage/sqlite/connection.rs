//! Connection setup and lock handling.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Locks the connection mutex, recovering from poisoning.
///
/// A panic while holding the lock leaves the connection itself usable, so the
/// guard is taken back instead of failing every later call.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("sqlite connection mutex was poisoned, recovering");
        metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
        poisoned.into_inner()
    })
}

/// Applies connection pragmas.
///
/// - WAL journal and NORMAL synchronous for concurrent readers
/// - a 5 second busy timeout
/// - foreign keys, so history rows must reference a recorded interaction
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if foreign keys cannot be enabled.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so failures here are ignored (in-memory databases report "memory").
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::OperationFailed {
            operation: "enable_foreign_keys".to_string(),
            cause: e.to_string(),
        })
}

/// Maps a rusqlite error into [`Error::OperationFailed`].
pub fn sql_error(operation: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}
