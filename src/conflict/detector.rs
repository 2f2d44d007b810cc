//! Field-by-field comparison of a local task against its remote counterpart.
//!
//! A field populated on only one side is a pending propagation, not a
//! conflict. Description and deadline are only flagged when both sides
//! carry a value; [`ConflictDetector::propagations`] reports the one-sided
//! copies instead.

use super::types::{Conflict, ConflictCategory, ConflictField, TaskSnapshot};
use crate::model::{FieldValue, LocalTask, Priority, RemoteTask};
use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Direction of a silent one-sided copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationTarget {
    Local,
    Remote,
}

/// A value present on one side only, to be copied to the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    pub field_name: String,
    pub target: PropagationTarget,
    pub value: FieldValue,
}

/// Stateless conflict detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Run every field check and collect the ones that fire.
    ///
    /// `last_sync` is only logged; fields are compared directly.
    pub fn detect(
        &self,
        local: &LocalTask,
        remote: &RemoteTask,
        last_sync: Option<DateTime<Utc>>,
    ) -> Option<Conflict> {
        let fields: Vec<ConflictField> = [
            self.check_state(local, remote),
            self.check_title(local, remote),
            self.check_description(local, remote),
            self.check_priority(local, remote),
            self.check_deadline(local, remote),
        ]
        .into_iter()
        .flatten()
        .collect();

        if fields.is_empty() {
            debug!("No conflict for {} (last sync: {:?})", local.id, last_sync);
            return None;
        }

        let external_id = local
            .sync
            .external_id
            .clone()
            .unwrap_or_else(|| format!("external:{}", remote.id));

        let conflict = Conflict {
            id: None,
            external_id,
            local_task_id: local.id.clone(),
            detected_at: Utc::now(),
            local_snapshot: Some(TaskSnapshot::from(local)),
            remote_snapshot: Some(TaskSnapshot::from(remote)),
            fields,
            resolved: false,
            resolved_at: None,
            resolution_strategy: None,
            resolved_by: None,
            notes: None,
        };
        debug!("{}", conflict.summary());
        Some(conflict)
    }

    fn check_state(&self, local: &LocalTask, remote: &RemoteTask) -> Option<ConflictField> {
        if local.state.is_closed() == remote.is_closed() {
            return None;
        }
        Some(ConflictField::new(
            ConflictCategory::State,
            FieldValue::text(local.state.as_keyword()),
            FieldValue::text(remote.state.trim().to_lowercase()),
        ))
    }

    fn check_title(&self, local: &LocalTask, remote: &RemoteTask) -> Option<ConflictField> {
        if normalize_title(&local.title) == normalize_title(&remote.title) {
            return None;
        }
        Some(ConflictField::new(
            ConflictCategory::Title,
            FieldValue::text(local.title.trim()),
            FieldValue::text(remote.title.trim()),
        ))
    }

    fn check_description(&self, local: &LocalTask, remote: &RemoteTask) -> Option<ConflictField> {
        let local_body = local.body.trim();
        let remote_body = remote.body.trim();

        if local_body.is_empty() || remote_body.is_empty() {
            return None;
        }
        if content_hash(local_body) == content_hash(remote_body) {
            return None;
        }
        Some(ConflictField::new(
            ConflictCategory::Description,
            FieldValue::text(local_body),
            FieldValue::text(remote_body),
        ))
    }

    fn check_priority(&self, local: &LocalTask, remote: &RemoteTask) -> Option<ConflictField> {
        let remote_priority = Priority::from_labels(&remote.labels);
        if local.priority == remote_priority {
            return None;
        }
        Some(ConflictField::new(
            ConflictCategory::Priority,
            FieldValue::from(local.priority),
            FieldValue::from(remote_priority),
        ))
    }

    fn check_deadline(&self, local: &LocalTask, remote: &RemoteTask) -> Option<ConflictField> {
        let (local_date, remote_date) = (local.deadline?, remote_due_date(remote)?);
        if local_date == remote_date {
            return None;
        }
        Some(ConflictField::new(
            ConflictCategory::Deadline,
            FieldValue::Date(local_date),
            FieldValue::Date(remote_date),
        ))
    }

    /// One-sided description and deadline values to copy across silently.
    pub fn propagations(&self, local: &LocalTask, remote: &RemoteTask) -> Vec<Propagation> {
        let mut out = Vec::new();

        let local_body = local.body.trim();
        let remote_body = remote.body.trim();
        match (local_body.is_empty(), remote_body.is_empty()) {
            (true, false) => out.push(Propagation {
                field_name: ConflictCategory::Description.as_str().to_string(),
                target: PropagationTarget::Local,
                value: FieldValue::text(remote_body),
            }),
            (false, true) => out.push(Propagation {
                field_name: ConflictCategory::Description.as_str().to_string(),
                target: PropagationTarget::Remote,
                value: FieldValue::text(local_body),
            }),
            _ => {}
        }

        match (local.deadline, remote_due_date(remote)) {
            (None, Some(date)) => out.push(Propagation {
                field_name: ConflictCategory::Deadline.as_str().to_string(),
                target: PropagationTarget::Local,
                value: FieldValue::Date(date),
            }),
            (Some(date), None) => out.push(Propagation {
                field_name: ConflictCategory::Deadline.as_str().to_string(),
                target: PropagationTarget::Remote,
                value: FieldValue::Date(date),
            }),
            _ => {}
        }

        out
    }
}

fn remote_due_date(remote: &RemoteTask) -> Option<NaiveDate> {
    remote.due_date.map(|due| due.date_naive())
}

/// Strip one leading bracketed tag (`[WIP]`, `[TEST]`), lower-case and trim.
pub fn normalize_title(title: &str) -> String {
    let title = title.trim();
    let stripped = match title.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        Some((_, rest)) => rest.trim_start(),
        None => title,
    };
    stripped.to_lowercase().trim().to_string()
}

/// SHA-256 of the whitespace-normalized text.
pub fn content_hash(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}
