use crate::model::{Change, ChangeKind, LocalTask, Priority, RemoteRef, SyncOutcome, TaskState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Result of a pull: whatever was fetched plus the errors met on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullOutcome {
    pub changes: Vec<Change>,
    pub errors: Vec<String>,
}

impl PullOutcome {
    pub fn new(changes: Vec<Change>) -> Self {
        Self {
            changes,
            errors: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            changes: Vec::new(),
            errors: vec![error.into()],
        }
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What `create_or_link` did for a local task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(RemoteRef),
    /// An existing remote item with the same identity was found and reused.
    Linked(RemoteRef),
}

impl CreateOutcome {
    pub fn remote(&self) -> &RemoteRef {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Linked(r) => r,
        }
    }
}

/// Capability set every external-system integration implements.
///
/// None of these methods return errors: failures are converted to data at
/// the adapter boundary so one misbehaving integration cannot halt a run.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Stable key, also the prefix of every external id this adapter issues.
    fn name(&self) -> &str;

    /// True only when required credentials and settings are present.
    fn is_configured(&self) -> bool;

    /// Live connectivity probe.
    async fn test_connection(&self) -> (bool, String);

    /// Fetch everything updated after `since`, or everything when `None`.
    /// Must not mutate remote state.
    async fn pull_changes(&self, since: Option<DateTime<Utc>>) -> PullOutcome;

    async fn create_task(&self, task: &LocalTask) -> Option<RemoteRef>;

    async fn update_task(&self, remote: &RemoteRef, task: &LocalTask) -> bool;

    async fn close_task(&self, remote: &RemoteRef) -> bool;

    /// Best-effort duplicate search used before creating.
    async fn find_matching_task(&self, task: &LocalTask) -> Option<RemoteRef>;

    async fn reopen_task(&self, _remote: &RemoteRef) -> bool {
        false
    }

    /// Create `task` remotely unless a matching item already exists.
    async fn create_or_link(&self, task: &LocalTask) -> Option<CreateOutcome> {
        if let Some(existing) = self.find_matching_task(task).await {
            debug!(
                "Found existing {} item for '{}': {}",
                self.name(),
                task.title,
                existing
            );
            return Some(CreateOutcome::Linked(existing));
        }
        self.create_task(task).await.map(CreateOutcome::Created)
    }

    /// Apply local-origin changes, counting failures per item.
    ///
    /// Successful creates and updates are echoed into `outcome.changes` with
    /// their remote reference so the caller can stamp sync metadata.
    async fn push_changes(&self, changes: Vec<Change>) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        for change in changes {
            let Some(task) = change.local.clone() else {
                continue;
            };
            outcome.items_processed += 1;

            if change.kind == ChangeKind::Created {
                match self.create_or_link(&task).await {
                    Some(CreateOutcome::Created(remote)) => {
                        outcome.items_created += 1;
                        outcome
                            .changes
                            .push(Change::new(ChangeKind::Created).with_local(task).with_ref(remote));
                    }
                    Some(CreateOutcome::Linked(remote)) => {
                        outcome.items_updated += 1;
                        outcome
                            .changes
                            .push(Change::new(ChangeKind::Updated).with_local(task).with_ref(remote));
                    }
                    None => outcome.add_error(format!(
                        "Failed to create {} item for: {}",
                        self.name(),
                        task.title
                    )),
                }
                continue;
            }

            let Some(remote) = change.remote_ref.clone().or_else(|| task.remote_ref()) else {
                outcome.add_error(format!("No external reference for: {}", task.title));
                continue;
            };

            let (ok, verb) = match change.kind {
                ChangeKind::Closed | ChangeKind::Deleted => (self.close_task(&remote).await, "close"),
                ChangeKind::StateChanged if task.state.is_closed() => {
                    (self.close_task(&remote).await, "close")
                }
                ChangeKind::StateChanged => (self.reopen_task(&remote).await, "reopen"),
                _ => (self.update_task(&remote, &task).await, "update"),
            };

            if ok {
                outcome.items_updated += 1;
                outcome
                    .changes
                    .push(Change::new(change.kind).with_local(task).with_ref(remote));
            } else {
                warn!("{}: failed to {} {}", self.name(), verb, remote);
                outcome.add_error(format!("Failed to {}: {}", verb, task.title));
            }
        }

        outcome
    }

    fn map_state_to_remote(&self, state: TaskState) -> &'static str {
        if state.is_closed() { "closed" } else { "open" }
    }

    fn map_state_from_remote(&self, state: &str) -> TaskState {
        if crate::model::is_remote_state_closed(state) {
            TaskState::Done
        } else {
            TaskState::Todo
        }
    }

    fn map_priority_to_remote(&self, priority: Priority) -> String {
        priority.to_label().to_string()
    }

    fn map_priority_from_remote(&self, labels: &[String]) -> Option<Priority> {
        Priority::from_labels(labels)
    }
}
