use super::{OutlineError, OutlineStore, WriteOutcome};
use crate::model::{
    FieldValue, LocalTask, Priority, RemoteRef, SyncStatus, TaskState, is_remote_state_closed,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// On-disk shape: tasks grouped by destination file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlineDocument {
    #[serde(default)]
    pub files: BTreeMap<String, Vec<LocalTask>>,
}

impl OutlineDocument {
    fn tasks(&self) -> impl Iterator<Item = &LocalTask> {
        self.files.values().flatten()
    }

    fn task_mut(&mut self, id: &str) -> Option<&mut LocalTask> {
        self.files.values_mut().flatten().find(|t| t.id == id)
    }
}

#[derive(Debug)]
struct Loaded {
    document: OutlineDocument,
    /// SHA-256 of the bytes the document was read from; `None` if absent.
    fingerprint: Option<String>,
}

/// File-backed outline store with content-fingerprint stale detection.
#[derive(Debug)]
pub struct JsonOutlineStore {
    path: PathBuf,
    state: Mutex<Loaded>,
}

impl JsonOutlineStore {
    /// Load the document at `path`; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, OutlineError> {
        let path = path.into();
        let loaded = load(&path)?;
        debug!(
            "Loaded outline {:?} ({} tasks)",
            path,
            loaded.document.tasks().count()
        );
        Ok(Self {
            path,
            state: Mutex::new(loaded),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> Result<OutlineDocument, OutlineError> {
        Ok(self.lock()?.document.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Loaded>, OutlineError> {
        self.state.lock().map_err(|_| OutlineError::LockPoisoned)
    }

    fn is_stale(&self, loaded: &Loaded) -> Result<bool, OutlineError> {
        Ok(current_fingerprint(&self.path)? != loaded.fingerprint)
    }

    /// Write through a temp file and rename, then adopt the new fingerprint.
    fn persist(&self, loaded: &mut Loaded) -> Result<(), OutlineError> {
        let bytes = serde_json::to_vec_pretty(&loaded.document)?;
        let io_err = |source| OutlineError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let temp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&temp, &bytes).map_err(io_err)?;
        std::fs::rename(&temp, &self.path).map_err(io_err)?;

        loaded.fingerprint = Some(fingerprint(&bytes));
        Ok(())
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn current_fingerprint(path: &Path) -> Result<Option<String>, OutlineError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(fingerprint(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(OutlineError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn load(path: &Path) -> Result<Loaded, OutlineError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Loaded {
            document: serde_json::from_slice(&bytes)?,
            fingerprint: Some(fingerprint(&bytes)),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Loaded {
            document: OutlineDocument::default(),
            fingerprint: None,
        }),
        Err(source) => Err(OutlineError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn invalid(field: &str, value: &FieldValue) -> OutlineError {
    OutlineError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

/// Apply one resolved value to a task.
pub(crate) fn apply_field(task: &mut LocalTask, field: &str, value: &FieldValue) -> Result<(), OutlineError> {
    match (field, value) {
        ("state", FieldValue::Text(raw)) => {
            task.state = raw.parse::<TaskState>().unwrap_or(if is_remote_state_closed(raw) {
                TaskState::Done
            } else {
                TaskState::Todo
            });
        }
        ("title", FieldValue::Text(title)) => task.title = title.clone(),
        ("description", FieldValue::Text(body)) => task.body = body.clone(),
        ("description", FieldValue::None) => task.body.clear(),
        ("priority", FieldValue::None) => task.priority = None,
        ("priority", FieldValue::Text(raw)) => {
            task.priority = Some(raw.parse::<Priority>().map_err(|_| invalid(field, value))?);
        }
        ("deadline", FieldValue::Date(date)) => task.deadline = Some(*date),
        ("deadline", FieldValue::None) => task.deadline = None,
        ("labels", FieldValue::List(labels)) => task.tags = labels.clone(),
        _ => return Err(invalid(field, value)),
    }
    Ok(())
}

impl OutlineStore for JsonOutlineStore {
    fn refresh(&self) -> Result<(), OutlineError> {
        let fresh = load(&self.path)?;
        *self.lock()? = fresh;
        Ok(())
    }

    fn read_task(&self, id: &str) -> Result<Option<LocalTask>, OutlineError> {
        let loaded = self.lock()?;
        Ok(loaded.document.tasks().find(|t| t.id == id).cloned())
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<LocalTask>, OutlineError> {
        let loaded = self.lock()?;
        Ok(loaded
            .document
            .tasks()
            .find(|t| t.sync.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    fn pending_tasks(&self) -> Result<Vec<LocalTask>, OutlineError> {
        let loaded = self.lock()?;
        Ok(loaded
            .document
            .tasks()
            .filter(|t| t.sync.status == Some(SyncStatus::Pending))
            .cloned()
            .collect())
    }

    fn write_resolved_field(
        &self,
        task_id: &str,
        field: &str,
        value: &FieldValue,
    ) -> Result<WriteOutcome, OutlineError> {
        let mut loaded = self.lock()?;
        if self.is_stale(&loaded)? {
            warn!(
                "Outline {:?} changed on disk; not writing {} of {}",
                self.path, field, task_id
            );
            return Ok(WriteOutcome::StaleConflict);
        }

        let task = loaded
            .document
            .task_mut(task_id)
            .ok_or_else(|| OutlineError::UnknownTask(task_id.to_string()))?;
        apply_field(task, field, value)?;
        self.persist(&mut loaded)?;

        debug!("Wrote {} = {} to {}", field, value, task_id);
        Ok(WriteOutcome::Applied)
    }

    fn insert_task(&self, task: LocalTask) -> Result<(), OutlineError> {
        let mut loaded = self.lock()?;
        if self.is_stale(&loaded)? {
            return Err(OutlineError::Stale(self.path.clone()));
        }

        let destination = task.location.file.display().to_string();
        info!("Adding '{}' to {}", task.title, destination);
        loaded.document.files.entry(destination).or_default().push(task);
        self.persist(&mut loaded)
    }

    fn mark_synced(
        &self,
        task_id: &str,
        remote: &RemoteRef,
        at: DateTime<Utc>,
    ) -> Result<(), OutlineError> {
        let mut loaded = self.lock()?;
        if self.is_stale(&loaded)? {
            return Err(OutlineError::Stale(self.path.clone()));
        }

        let task = loaded
            .document
            .task_mut(task_id)
            .ok_or_else(|| OutlineError::UnknownTask(task_id.to_string()))?;
        task.sync.external_id = Some(remote.external_id.clone());
        if remote.url.is_some() {
            task.sync.external_url = remote.url.clone();
        }
        task.sync.status = Some(SyncStatus::Synced);
        task.sync.last_synced = Some(at);
        self.persist(&mut loaded)
    }
}
