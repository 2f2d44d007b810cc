use crate::model::{FieldValue, LocalTask, RemoteTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Field family a conflict belongs to; strategies are configured per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    State,
    Title,
    Description,
    Priority,
    Deadline,
    Labels,
    Comments,
}

impl ConflictCategory {
    pub const ALL: [ConflictCategory; 7] = [
        ConflictCategory::State,
        ConflictCategory::Title,
        ConflictCategory::Description,
        ConflictCategory::Priority,
        ConflictCategory::Deadline,
        ConflictCategory::Labels,
        ConflictCategory::Comments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConflictCategory::State => "state",
            ConflictCategory::Title => "title",
            ConflictCategory::Description => "description",
            ConflictCategory::Priority => "priority",
            ConflictCategory::Deadline => "deadline",
            ConflictCategory::Labels => "labels",
            ConflictCategory::Comments => "comments",
        }
    }
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown conflict category '{}'", s))
    }
}

/// How a conflicting field is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Local value is pushed to the remote side.
    #[serde(alias = "org_wins")]
    LocalWins,
    /// Remote value overwrites the local side.
    #[serde(alias = "external_wins")]
    RemoteWins,
    Merge,
    Ask,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::LocalWins => "local_wins",
            ResolutionStrategy::RemoteWins => "remote_wins",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Ask => "ask",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local_wins" | "org_wins" => Ok(ResolutionStrategy::LocalWins),
            "remote_wins" | "external_wins" => Ok(ResolutionStrategy::RemoteWins),
            "merge" => Ok(ResolutionStrategy::Merge),
            "ask" => Ok(ResolutionStrategy::Ask),
            other => Err(format!("unknown resolution strategy '{}'", other)),
        }
    }
}

/// Strategy recorded on a resolution: one strategy, or `mixed` when fields
/// were settled by different ones. Audit metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyUsed {
    Single(ResolutionStrategy),
    Mixed,
}

impl StrategyUsed {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyUsed::Single(s) => s.as_str(),
            StrategyUsed::Mixed => "mixed",
        }
    }
}

impl fmt::Display for StrategyUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyUsed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "mixed" {
            Ok(StrategyUsed::Mixed)
        } else {
            s.parse().map(StrategyUsed::Single)
        }
    }
}

impl From<ResolutionStrategy> for StrategyUsed {
    fn from(strategy: ResolutionStrategy) -> Self {
        StrategyUsed::Single(strategy)
    }
}

impl Serialize for StrategyUsed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StrategyUsed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One field that differs between the local and remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictField {
    pub field_name: String,
    pub category: ConflictCategory,
    pub local_value: FieldValue,
    pub remote_value: FieldValue,
}

impl ConflictField {
    pub fn new(category: ConflictCategory, local_value: FieldValue, remote_value: FieldValue) -> Self {
        Self {
            field_name: category.as_str().to_string(),
            category,
            local_value,
            remote_value,
        }
    }
}

/// Identity of one side of a conflict, kept after the live task is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    /// Outline file for the local side, URL for the remote side.
    pub location: Option<String>,
}

impl From<&LocalTask> for TaskSnapshot {
    fn from(task: &LocalTask) -> Self {
        let file: &PathBuf = &task.location.file;
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            location: (!file.as_os_str().is_empty()).then(|| file.display().to_string()),
        }
    }
}

impl From<&RemoteTask> for TaskSnapshot {
    fn from(task: &RemoteTask) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            location: task.url.clone(),
        }
    }
}

/// A detected disagreement between a local task and its remote counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: Option<i64>,
    pub external_id: String,
    pub local_task_id: String,
    pub detected_at: DateTime<Utc>,
    pub local_snapshot: Option<TaskSnapshot>,
    pub remote_snapshot: Option<TaskSnapshot>,
    pub fields: Vec<ConflictField>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_strategy: Option<StrategyUsed>,
    /// `auto`, `human`, or an operator id.
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Conflict {
    pub fn categories(&self) -> Vec<ConflictCategory> {
        self.fields.iter().map(|f| f.category).collect()
    }

    pub fn field(&self, category: ConflictCategory) -> Option<&ConflictField> {
        self.fields.iter().find(|f| f.category == category)
    }

    pub fn summary(&self) -> String {
        let names: Vec<&str> = self.fields.iter().map(|f| f.category.as_str()).collect();
        format!("Conflict in {}: {}", self.external_id, names.join(", "))
    }
}

/// Outcome of applying the strategy table to a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub conflict: Conflict,
    pub strategy_used: StrategyUsed,
    /// Field values to write into the outline.
    pub local_changes: BTreeMap<String, FieldValue>,
    /// Field values to push to the remote side.
    pub remote_changes: BTreeMap<String, FieldValue>,
    pub needs_human_review: bool,
    pub notes: Vec<String>,
}

impl Resolution {
    pub fn notes_text(&self) -> String {
        self.notes.join("; ")
    }
}

/// Queue statistics reported by `conflicts stats` and the diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub unresolved_count: usize,
    pub resolved_today: usize,
    pub counts_by_category: BTreeMap<String, usize>,
    pub oldest_unresolved: Option<DateTime<Utc>>,
}
