//! Durable queue of conflicts awaiting a human decision.
//!
//! Every mutation is a single statement, so overlapping sync runs can at
//! worst produce duplicate rows, never a half-written one.

use super::types::{Conflict, ConflictField, QueueStats, StrategyUsed, TaskSnapshot};
use crate::store::{self, StoreError, format_timestamp, parse_timestamp};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_conflicts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  external_id TEXT NOT NULL,
  local_task_id TEXT,
  detected_at TEXT NOT NULL,
  conflict_fields_json TEXT NOT NULL,
  resolved INTEGER NOT NULL DEFAULT 0,
  resolved_at TEXT,
  resolution_strategy TEXT,
  resolved_by TEXT,
  notes TEXT
);
CREATE INDEX IF NOT EXISTS idx_conflicts_unresolved
  ON sync_conflicts(resolved, detected_at DESC);
CREATE INDEX IF NOT EXISTS idx_conflicts_external_id
  ON sync_conflicts(external_id);
"#;

const SELECT_COLUMNS: &str = "id, external_id, local_task_id, detected_at, conflict_fields_json, \
     resolved, resolved_at, resolution_strategy, resolved_by, notes";

/// JSON payload stored in `conflict_fields_json`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredFields {
    fields: Vec<ConflictField>,
    local_snapshot: Option<TaskSnapshot>,
    remote_snapshot: Option<TaskSnapshot>,
}

#[derive(Debug)]
pub struct ConflictQueue {
    conn: Mutex<Connection>,
}

impl ConflictQueue {
    /// Open the queue in the database at `path`, installing its tables.
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

    /// Persist a conflict and return its new id.
    pub fn add(&self, conflict: &Conflict) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&StoredFields {
            fields: conflict.fields.clone(),
            local_snapshot: conflict.local_snapshot.clone(),
            remote_snapshot: conflict.remote_snapshot.clone(),
        })?;

        let conn = store::lock(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO sync_conflicts
              (external_id, local_task_id, detected_at, conflict_fields_json,
               resolved, resolved_at, resolution_strategy, resolved_by, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                conflict.external_id,
                conflict.local_task_id,
                format_timestamp(conflict.detected_at),
                payload,
                conflict.resolved,
                conflict.resolved_at.map(format_timestamp),
                conflict.resolution_strategy.map(|s| s.as_str()),
                conflict.resolved_by,
                conflict.notes,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Queued {} as conflict #{}", conflict.summary(), id);
        Ok(id)
    }

    /// Unresolved conflicts, most recent first.
    pub fn get_unresolved(&self, limit: usize) -> Result<Vec<Conflict>, StoreError> {
        let conn = store::lock(&self.conn)?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_conflicts WHERE resolved = 0 \
             ORDER BY detected_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], read_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub fn get(&self, id: i64) -> Result<Option<Conflict>, StoreError> {
        let conn = store::lock(&self.conn)?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM sync_conflicts WHERE id = ?1");
        conn.query_row(&sql, params![id], read_row)
            .optional()?
            .transpose()
    }

    /// Latest record for an external item, resolved or not.
    pub fn get_by_external_id(&self, external_id: &str) -> Result<Option<Conflict>, StoreError> {
        let conn = store::lock(&self.conn)?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_conflicts WHERE external_id = ?1 \
             ORDER BY detected_at DESC, id DESC LIMIT 1"
        );
        conn.query_row(&sql, params![external_id], read_row)
            .optional()?
            .transpose()
    }

    /// Mark a conflict resolved now. Returns `false` if the id does not exist.
    pub fn resolve(
        &self,
        id: i64,
        strategy: impl Into<StrategyUsed>,
        resolved_by: &str,
        notes: &str,
    ) -> Result<bool, StoreError> {
        self.resolve_at(id, strategy, resolved_by, notes, Utc::now())
    }

    pub fn resolve_at(
        &self,
        id: i64,
        strategy: impl Into<StrategyUsed>,
        resolved_by: &str,
        notes: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let strategy = strategy.into();
        let conn = store::lock(&self.conn)?;
        let updated = conn.execute(
            r#"
            UPDATE sync_conflicts
            SET resolved = 1, resolved_at = ?1, resolution_strategy = ?2,
                resolved_by = ?3, notes = ?4
            WHERE id = ?5
            "#,
            params![
                format_timestamp(resolved_at),
                strategy.as_str(),
                resolved_by,
                notes,
                id
            ],
        )?;

        if updated > 0 {
            info!("Conflict #{} resolved by {} ({})", id, resolved_by, strategy);
        }
        Ok(updated > 0)
    }

    pub fn get_stats(&self) -> Result<QueueStats, StoreError> {
        let conn = store::lock(&self.conn)?;
        let mut stats = QueueStats::default();

        let unresolved: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        stats.unresolved_count = unresolved as usize;

        let today = format!("{}%", Utc::now().format("%Y-%m-%d"));
        let resolved_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE resolved = 1 AND resolved_at LIKE ?1",
            params![today],
            |row| row.get(0),
        )?;
        stats.resolved_today = resolved_today as usize;

        let mut stmt =
            conn.prepare("SELECT conflict_fields_json FROM sync_conflicts WHERE resolved = 0")?;
        let payloads = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for payload in payloads {
            let stored: StoredFields = serde_json::from_str(&payload?)?;
            for field in stored.fields {
                *stats
                    .counts_by_category
                    .entry(field.category.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        let oldest: Option<String> = conn
            .query_row(
                "SELECT detected_at FROM sync_conflicts WHERE resolved = 0 \
                 ORDER BY detected_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        stats.oldest_unresolved = oldest.as_deref().map(parse_timestamp).transpose()?;

        Ok(stats)
    }

    /// Purge resolved conflicts older than `retention_days`.
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, StoreError> {
        self.cleanup_before(Utc::now() - Duration::days(i64::from(retention_days)))
    }

    /// Purge resolved conflicts resolved before `cutoff`. Unresolved rows stay.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = store::lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM sync_conflicts WHERE resolved = 1 AND resolved_at < ?1",
            params![format_timestamp(cutoff)],
        )?;
        if removed > 0 {
            info!("Removed {} resolved conflicts older than {}", removed, cutoff);
        }
        Ok(removed)
    }
}

/// Row mapper; decode failures surface as the inner `StoreError`.
fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<Conflict, StoreError>> {
    let id: i64 = row.get(0)?;
    let external_id: String = row.get(1)?;
    let local_task_id: Option<String> = row.get(2)?;
    let detected_at: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let resolved: bool = row.get(5)?;
    let resolved_at: Option<String> = row.get(6)?;
    let strategy: Option<String> = row.get(7)?;
    let resolved_by: Option<String> = row.get(8)?;
    let notes: Option<String> = row.get(9)?;

    Ok(decode_conflict(
        id,
        external_id,
        local_task_id.unwrap_or_default(),
        &detected_at,
        &payload,
        resolved,
        resolved_at.as_deref(),
        strategy.as_deref(),
        resolved_by,
        notes,
    ))
}

#[allow(clippy::too_many_arguments)]
fn decode_conflict(
    id: i64,
    external_id: String,
    local_task_id: String,
    detected_at: &str,
    payload: &str,
    resolved: bool,
    resolved_at: Option<&str>,
    strategy: Option<&str>,
    resolved_by: Option<String>,
    notes: Option<String>,
) -> Result<Conflict, StoreError> {
    let stored: StoredFields = serde_json::from_str(payload)?;
    let resolution_strategy = strategy
        .map(|s| s.parse::<StrategyUsed>().map_err(StoreError::Corrupt))
        .transpose()?;

    Ok(Conflict {
        id: Some(id),
        external_id,
        local_task_id,
        detected_at: parse_timestamp(detected_at)?,
        local_snapshot: stored.local_snapshot,
        remote_snapshot: stored.remote_snapshot,
        fields: stored.fields,
        resolved,
        resolved_at: resolved_at.map(parse_timestamp).transpose()?,
        resolution_strategy,
        resolved_by,
        notes,
    })
}
