//! Local outline store: the authoritative side of every sync.
//!
//! The engine reads local tasks and writes resolved field values through
//! [`OutlineStore`]. A write against content that changed on disk since it
//! was loaded comes back as [`WriteOutcome::StaleConflict`] instead of
//! clobbering the edit.

pub mod json_store;

#[cfg(test)]
mod tests;

pub use json_store::JsonOutlineStore;

use crate::model::{FieldValue, LocalTask, RemoteRef};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum OutlineError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid outline document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Field '{field}' cannot hold {value}")]
    InvalidValue { field: String, value: String },

    #[error("Outline changed on disk since it was loaded: {0}")]
    Stale(PathBuf),

    #[error("Outline lock poisoned")]
    LockPoisoned,
}

/// Result of writing a single resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The backing content changed since load; nothing was written.
    StaleConflict,
}

pub trait OutlineStore: Send + Sync {
    /// Re-read the backing content, discarding the cached view.
    fn refresh(&self) -> Result<(), OutlineError> {
        Ok(())
    }

    fn read_task(&self, id: &str) -> Result<Option<LocalTask>, OutlineError>;

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<LocalTask>, OutlineError>;

    /// Tasks flagged `pending`: new items to create or linked items to update.
    fn pending_tasks(&self) -> Result<Vec<LocalTask>, OutlineError>;

    fn write_resolved_field(
        &self,
        task_id: &str,
        field: &str,
        value: &FieldValue,
    ) -> Result<WriteOutcome, OutlineError>;

    /// Add a routed task under its `location.file` destination.
    fn insert_task(&self, task: LocalTask) -> Result<(), OutlineError>;

    /// Stamp sync metadata after a successful create or update.
    fn mark_synced(
        &self,
        task_id: &str,
        remote: &RemoteRef,
        at: DateTime<Utc>,
    ) -> Result<(), OutlineError>;
}
