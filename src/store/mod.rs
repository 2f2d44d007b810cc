//! Shared SQLite plumbing for the conflict queue and sync history.
//!
//! Both stores live in the same database file and own separate tables.
//! Each store installs its own schema with `CREATE ... IF NOT EXISTS`, so
//! opening the file from either side is safe in any order.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the durable stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("unknown id: {0}")]
    UnknownId(i64),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Open (creating if needed) a database file with the shared pragmas applied.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    debug!("Opening sync database: {:?}", path);
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// In-memory database for tests and throwaway runs.
pub fn open_in_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    Ok(conn)
}

/// Lock a store connection, mapping poisoning to [`StoreError::LockPoisoned`].
pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("nested").join("sync.db");

        let conn = open_database(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 11, 2, 3, 4, 5).unwrap();

        let early_s = format_timestamp(early);
        let late_s = format_timestamp(late);
        assert!(early_s < late_s);
        assert_eq!(parse_timestamp(&early_s).unwrap(), early);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
