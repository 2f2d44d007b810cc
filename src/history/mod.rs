//! Append-only audit log of sync runs plus a small key-value state table
//! holding per-adapter watermarks.

#[cfg(test)]
mod tests;

use crate::model::{HistoryRecord, SyncDirection};
use crate::store::{self, StoreError, format_timestamp, parse_timestamp};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp TEXT NOT NULL,
  direction TEXT NOT NULL,
  adapter TEXT NOT NULL,
  items_processed INTEGER NOT NULL DEFAULT 0,
  items_created INTEGER NOT NULL DEFAULT 0,
  items_updated INTEGER NOT NULL DEFAULT 0,
  items_failed INTEGER NOT NULL DEFAULT 0,
  errors_json TEXT NOT NULL DEFAULT '[]',
  duration_ms INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sync_state (
  key TEXT PRIMARY KEY,
  value TEXT,
  updated_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_history_timestamp
  ON sync_history(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_sync_history_adapter
  ON sync_history(adapter);
"#;

const SELECT_COLUMNS: &str = "id, timestamp, direction, adapter, items_processed, items_created, \
     items_updated, items_failed, errors_json, duration_ms";

/// Number of history rows scanned for the recent-errors list.
const RECENT_ERROR_ROWS: i64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionStats {
    /// Runs without failed items.
    pub success: usize,
    /// Runs with at least one failed item.
    pub failed: usize,
    pub items: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStats {
    pub runs: usize,
    pub items: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub period_days: u32,
    pub pull: DirectionStats,
    pub push: DirectionStats,
    pub by_adapter: BTreeMap<String, AdapterStats>,
    pub last_sync: Option<DateTime<Utc>>,
    pub recent_errors: Vec<String>,
}

/// Key under which the watermark for `adapter`/`direction` is stored.
pub fn watermark_key(adapter: &str, direction: SyncDirection) -> String {
    format!("watermark:{}:{}", adapter, direction)
}

#[derive(Debug)]
pub struct SyncHistory {
    conn: Mutex<Connection>,
}

impl SyncHistory {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(store::open_database(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(store::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one record and return its id.
    pub fn record(&self, record: &HistoryRecord) -> Result<i64, StoreError> {
        let errors = serde_json::to_string(&record.errors)?;
        let conn = store::lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO sync_history
              (timestamp, direction, adapter, items_processed, items_created,
               items_updated, items_failed, errors_json, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                format_timestamp(record.timestamp),
                record.direction.as_str(),
                record.adapter,
                record.items_processed as i64,
                record.items_created as i64,
                record.items_updated as i64,
                record.items_failed as i64,
                errors,
                record.duration_ms as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            "Recorded {} {} run #{} ({} processed, {} failed)",
            record.adapter, record.direction, id, record.items_processed, record.items_failed
        );
        Ok(id)
    }

    /// Timestamp of the latest run without failures, optionally filtered.
    pub fn get_last_sync(
        &self,
        adapter: Option<&str>,
        direction: Option<SyncDirection>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut sql = String::from("SELECT timestamp FROM sync_history WHERE items_failed = 0");
        let mut values = Vec::new();
        push_filters(&mut sql, &mut values, adapter, direction);
        sql.push_str(" ORDER BY timestamp DESC LIMIT 1");

        let conn = store::lock(&self.conn)?;
        let raw: Option<String> = conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .optional()?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    /// Records from the last `days` days, newest first.
    pub fn get_history(
        &self,
        days: u32,
        adapter: Option<&str>,
        direction: Option<SyncDirection>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM sync_history WHERE timestamp > ?");
        let mut values = vec![Value::Text(cutoff(days))];
        push_filters(&mut sql, &mut values, adapter, direction);
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");
        values.push(Value::Integer(limit as i64));

        let conn = store::lock(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), read_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn get_stats(&self, days: u32) -> Result<HistoryStats, StoreError> {
        let since = cutoff(days);
        let conn = store::lock(&self.conn)?;
        let mut stats = HistoryStats {
            period_days: days,
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT direction, COUNT(*), COALESCE(SUM(items_processed), 0),
                   SUM(CASE WHEN items_failed > 0 THEN 1 ELSE 0 END)
            FROM sync_history WHERE timestamp > ?1 GROUP BY direction
            "#,
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (direction, runs, items, failed) = row?;
            let entry = match direction.parse::<SyncDirection>() {
                Ok(SyncDirection::Pull) => &mut stats.pull,
                Ok(SyncDirection::Push) => &mut stats.push,
                Err(_) => continue,
            };
            entry.success = (runs - failed) as usize;
            entry.failed = failed as usize;
            entry.items = items as usize;
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT adapter, COUNT(*), COALESCE(SUM(items_processed), 0)
            FROM sync_history WHERE timestamp > ?1 GROUP BY adapter
            "#,
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (adapter, runs, items) = row?;
            stats.by_adapter.insert(
                adapter,
                AdapterStats {
                    runs: runs as usize,
                    items: items as usize,
                },
            );
        }

        let last: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM sync_history ORDER BY timestamp DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        stats.last_sync = last.as_deref().map(parse_timestamp).transpose()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT errors_json FROM sync_history
            WHERE timestamp > ?1 AND errors_json != '[]'
            ORDER BY timestamp DESC LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![since, RECENT_ERROR_ROWS], |row| row.get::<_, String>(0))?;
        for row in rows {
            let errors: Vec<String> = serde_json::from_str(&row?)?;
            stats.recent_errors.extend(errors);
        }

        Ok(stats)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = store::lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = store::lock(&self.conn)?;
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_watermark(
        &self,
        adapter: &str,
        direction: SyncDirection,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        debug!("Advancing {} {} watermark to {}", adapter, direction, at);
        self.set_state(&watermark_key(adapter, direction), &format_timestamp(at))
    }

    pub fn watermark(
        &self,
        adapter: &str,
        direction: SyncDirection,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_state(&watermark_key(adapter, direction))?
            .as_deref()
            .map(parse_timestamp)
            .transpose()
    }

    /// Drop history records older than `days`. State rows are kept.
    pub fn cleanup(&self, days: u32) -> Result<usize, StoreError> {
        let conn = store::lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM sync_history WHERE timestamp < ?1",
            params![cutoff(days)],
        )?;
        if removed > 0 {
            info!("Removed {} sync history records older than {} days", removed, days);
        }
        Ok(removed)
    }
}

fn cutoff(days: u32) -> String {
    format_timestamp(Utc::now() - Duration::days(i64::from(days)))
}

fn push_filters(
    sql: &mut String,
    values: &mut Vec<Value>,
    adapter: Option<&str>,
    direction: Option<SyncDirection>,
) {
    if let Some(adapter) = adapter {
        sql.push_str(" AND adapter = ?");
        values.push(Value::Text(adapter.to_string()));
    }
    if let Some(direction) = direction {
        sql.push_str(" AND direction = ?");
        values.push(Value::Text(direction.as_str().to_string()));
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<HistoryRecord, StoreError>> {
    let id: i64 = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let direction: String = row.get(2)?;
    let adapter: String = row.get(3)?;
    let counts: [i64; 4] = [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?];
    let errors: String = row.get(8)?;
    let duration_ms: i64 = row.get(9)?;

    Ok(decode_record(id, &timestamp, &direction, adapter, counts, &errors, duration_ms))
}

fn decode_record(
    id: i64,
    timestamp: &str,
    direction: &str,
    adapter: String,
    counts: [i64; 4],
    errors: &str,
    duration_ms: i64,
) -> Result<HistoryRecord, StoreError> {
    Ok(HistoryRecord {
        id: Some(id),
        timestamp: parse_timestamp(timestamp)?,
        direction: direction.parse().map_err(StoreError::Corrupt)?,
        adapter,
        items_processed: counts[0] as usize,
        items_created: counts[1] as usize,
        items_updated: counts[2] as usize,
        items_failed: counts[3] as usize,
        errors: serde_json::from_str(errors)?,
        duration_ms: duration_ms as u64,
    })
}
