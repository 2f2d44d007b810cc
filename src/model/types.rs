use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Workflow state of a local outline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Todo,
    Next,
    Waiting,
    Done,
    Cancelled,
}

impl TaskState {
    /// `Done` and `Cancelled` count as closed; everything else is open.
    pub fn is_closed(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Cancelled)
    }

    pub fn as_keyword(self) -> &'static str {
        match self {
            TaskState::Todo => "TODO",
            TaskState::Next => "NEXT",
            TaskState::Waiting => "WAITING",
            TaskState::Done => "DONE",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_keyword())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TODO" => Ok(TaskState::Todo),
            "NEXT" => Ok(TaskState::Next),
            "WAITING" => Ok(TaskState::Waiting),
            "DONE" => Ok(TaskState::Done),
            "CANCELLED" | "CANCELED" => Ok(TaskState::Cancelled),
            other => Err(format!("unknown task state '{}'", other)),
        }
    }
}

/// Remote state strings that mean "closed" regardless of adapter vocabulary.
const CLOSED_REMOTE_STATES: &[&str] = &["closed", "done", "completed", "resolved"];

/// Coarse open/closed reading of an adapter-specific state string.
pub fn is_remote_state_closed(state: &str) -> bool {
    let state = state.trim().to_lowercase();
    CLOSED_REMOTE_STATES.contains(&state.as_str())
}

/// Outline priority cookie (`[#A]`, `[#B]`, `[#C]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    A,
    B,
    C,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::A, Priority::B, Priority::C];

    /// Derive a priority from a label set by substring match.
    ///
    /// The first label that mentions a priority wins, so `["bug", "p2"]` is
    /// `B`. Returns `None` when no label matches.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Option<Priority> {
        labels
            .iter()
            .find_map(|label| Self::from_label(label.as_ref()))
    }

    /// Read a single label; `"high"`, `"p1"` and `"priority-high"` all mean `A`.
    pub fn from_label(label: &str) -> Option<Priority> {
        let label = label.to_lowercase();
        if label.contains("high") || label == "p1" {
            Some(Priority::A)
        } else if label.contains("medium") || label == "p2" {
            Some(Priority::B)
        } else if label.contains("low") || label == "p3" {
            Some(Priority::C)
        } else {
            None
        }
    }

    pub fn to_label(self) -> &'static str {
        match self {
            Priority::A => "priority-high",
            Priority::B => "priority-medium",
            Priority::C => "priority-low",
        }
    }

    pub fn as_letter(self) -> &'static str {
        match self {
            Priority::A => "A",
            Priority::B => "B",
            Priority::C => "C",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_letter())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("[#").trim_end_matches(']') {
            "A" | "a" => Ok(Priority::A),
            "B" | "b" => Ok(Priority::B),
            "C" | "c" => Ok(Priority::C),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where an outline item lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

/// Synchronization metadata; all fields stay empty until the task is pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub status: Option<SyncStatus>,
    pub last_synced: Option<DateTime<Utc>>,
}

/// A task record whose outline file is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTask {
    pub id: String,
    pub title: String,
    pub state: TaskState,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub scheduled: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub location: SourceLocation,
    #[serde(default)]
    pub sync: SyncMetadata,
}

impl LocalTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state,
            priority: None,
            deadline: None,
            scheduled: None,
            tags: Vec::new(),
            properties: BTreeMap::new(),
            body: String::new(),
            location: SourceLocation::default(),
            sync: SyncMetadata::default(),
        }
    }

    /// A task with an external reference is linked to a remote record.
    pub fn is_linked(&self) -> bool {
        self.sync.external_id.is_some()
    }

    pub fn remote_ref(&self) -> Option<RemoteRef> {
        self.sync.external_id.as_ref().map(|id| {
            RemoteRef::from_external_id(id.clone()).with_url(self.sync.external_url.clone())
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn linked_to(mut self, remote: &RemoteRef) -> Self {
        self.sync.external_id = Some(remote.external_id.clone());
        self.sync.external_url = remote.url.clone();
        self
    }
}

/// A record as it exists in an external tracking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    /// Adapter-scoped id, without the adapter prefix.
    pub id: String,
    pub title: String,
    /// Adapter vocabulary, e.g. `open`, `closed`, `confirmed`.
    pub state: String,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RemoteTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state: state.into(),
            url: None,
            created_at: None,
            updated_at: None,
            body: String::new(),
            labels: Vec::new(),
            assignee: None,
            due_date: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn is_closed(&self) -> bool {
        is_remote_state_closed(&self.state)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Fully-qualified pointer to a remote record: `<adapter>:<opaque-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef {
    pub adapter: String,
    pub external_id: String,
    pub url: Option<String>,
}

impl RemoteRef {
    /// Build a reference from an adapter name and its adapter-scoped id.
    pub fn new(adapter: &str, opaque_id: &str, url: Option<String>) -> Self {
        Self {
            adapter: adapter.to_string(),
            external_id: format!("{}:{}", adapter, opaque_id),
            url,
        }
    }

    /// Recover a reference from a stored external id.
    ///
    /// The adapter is everything before the first `:`. Ids without a prefix
    /// belong to adapter `unknown`.
    pub fn from_external_id(external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        let adapter = match external_id.split_once(':') {
            Some((adapter, _)) if !adapter.is_empty() => adapter.to_string(),
            _ => "unknown".to_string(),
        };
        Self {
            adapter,
            external_id,
            url: None,
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    /// The adapter-scoped part of the id.
    pub fn opaque_id(&self) -> &str {
        self.external_id
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.external_id)
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.external_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    StateChanged,
    Deleted,
    Closed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::StateChanged => "state_changed",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A detected delta travelling between the outline and an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub local: Option<LocalTask>,
    pub remote: Option<RemoteTask>,
    pub remote_ref: Option<RemoteRef>,
    pub timestamp: DateTime<Utc>,
    pub old_state: Option<String>,
    pub new_state: Option<String>,
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl Change {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            local: None,
            remote: None,
            remote_ref: None,
            timestamp: Utc::now(),
            old_state: None,
            new_state: None,
            changed_fields: Vec::new(),
        }
    }

    pub fn with_local(mut self, task: LocalTask) -> Self {
        if self.remote_ref.is_none() {
            self.remote_ref = task.remote_ref();
        }
        self.local = Some(task);
        self
    }

    pub fn with_remote(mut self, task: RemoteTask) -> Self {
        self.remote = Some(task);
        self
    }

    pub fn with_ref(mut self, remote_ref: RemoteRef) -> Self {
        self.remote_ref = Some(remote_ref);
        self
    }

    pub fn with_state_change(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_state = Some(old.into());
        self.new_state = Some(new.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Adapter that owns the remote side, if known.
    pub fn target_adapter(&self) -> Option<&str> {
        self.remote_ref.as_ref().map(|r| r.adapter.as_str())
    }
}

/// Aggregated result of a pull or push against one or more adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub items_processed: usize,
    pub items_created: usize,
    pub items_updated: usize,
    pub items_failed: usize,
    pub errors: Vec<String>,
    pub changes: Vec<Change>,
}

impl Default for SyncOutcome {
    fn default() -> Self {
        Self {
            success: true,
            items_processed: 0,
            items_created: 0,
            items_updated: 0,
            items_failed: 0,
            errors: Vec::new(),
            changes: Vec::new(),
        }
    }
}

impl SyncOutcome {
    /// Record a per-item failure.
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.items_failed += 1;
        self.success = false;
    }

    /// Record a failure that affected `count` items at once.
    pub fn fail_items(&mut self, count: usize, error: impl Into<String>) {
        self.errors.push(error.into());
        self.items_processed += count;
        self.items_failed += count;
        self.success = false;
    }

    /// Sum another outcome into this one.
    pub fn absorb(&mut self, other: SyncOutcome) {
        self.items_processed += other.items_processed;
        self.items_created += other.items_created;
        self.items_updated += other.items_updated;
        self.items_failed += other.items_failed;
        self.errors.extend(other.errors);
        self.changes.extend(other.changes);
        self.success = self.items_failed == 0;
    }
}

/// Value carried by a conflicting field or a resolution entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    None,
    Text(String),
    Date(NaiveDate),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Absent, blank text and empty lists all count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::None => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Date(_) => false,
            FieldValue::List(items) => items.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Option<NaiveDate>> for FieldValue {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map(FieldValue::Date).unwrap_or(FieldValue::None)
    }
}

impl From<Option<Priority>> for FieldValue {
    fn from(value: Option<Priority>) -> Self {
        value
            .map(|p| FieldValue::text(p.as_letter()))
            .unwrap_or(FieldValue::None)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::None => f.write_str("(none)"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Pull,
    Push,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pull" => Ok(SyncDirection::Pull),
            "push" => Ok(SyncDirection::Push),
            other => Err(format!("unknown sync direction '{}'", other)),
        }
    }
}

/// One append-only audit entry for a pull or push invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub direction: SyncDirection,
    pub adapter: String,
    pub items_processed: usize,
    pub items_created: usize,
    pub items_updated: usize,
    pub items_failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl HistoryRecord {
    pub fn from_outcome(
        direction: SyncDirection,
        adapter: impl Into<String>,
        outcome: &SyncOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            direction,
            adapter: adapter.into(),
            items_processed: outcome.items_processed,
            items_created: outcome.items_created,
            items_updated: outcome.items_updated,
            items_failed: outcome.items_failed,
            errors: outcome.errors.clone(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.items_failed == 0
    }
}
