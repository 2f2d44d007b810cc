//! Placement of newly discovered remote items into the outline.
//!
//! Rules are evaluated top to bottom and the first match wins. Anything no
//! rule claims lands in the inbox as `TODO`.

pub mod rules;

#[cfg(test)]
mod tests;

pub use rules::*;

use crate::env;
use crate::model::{LocalTask, Priority, RemoteRef, RemoteTask, SourceLocation, SyncMetadata, SyncStatus, TaskState};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TaskRouter {
    rules: Vec<RoutingRule>,
    data_dir: PathBuf,
}

impl TaskRouter {
    /// Parse configured rules; an empty list installs [`RoutingRule::defaults`].
    pub fn new(configs: &[RoutingRuleConfig], data_dir: impl Into<PathBuf>) -> Result<Self, RouterError> {
        let rules = if configs.is_empty() {
            RoutingRule::defaults()
        } else {
            configs
                .iter()
                .map(RoutingRule::try_from)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            rules,
            data_dir: data_dir.into(),
        })
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn route(&self, task: &RemoteTask, adapter: &str) -> Route {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(adapter) && rule.condition.matches(task))
            .map(|rule| {
                debug!(
                    "Routing {}:{} to {} ({})",
                    adapter, task.id, rule.destination, rule.condition
                );
                Route::from(rule)
            })
            .unwrap_or_else(Route::unfiled)
    }

    /// Build the local task for a remote item seen for the first time.
    pub fn external_to_local(&self, task: &RemoteTask, adapter: &str, external_id: &str) -> LocalTask {
        let route = self.route(task, adapter);
        let now = Utc::now();

        let state = if task.is_closed() {
            TaskState::Done
        } else {
            route.state.unwrap_or(TaskState::Todo)
        };

        let mut tags = route.tags.clone();
        for tag in task.labels.iter().filter_map(|label| ai_label_tag(label)) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let remote_ref = RemoteRef::from_external_id(external_id);
        let mut properties = BTreeMap::new();
        properties.insert("CREATED".to_string(), now.format("[%Y-%m-%d %a]").to_string());
        properties.insert("EXTERNAL_ID".to_string(), external_id.to_string());
        if let Some(url) = &task.url {
            properties.insert(
                "EXTERNAL_URL".to_string(),
                format!("[[{}][{}]]", url, remote_ref.opaque_id()),
            );
        }
        properties.insert("SYNC_STATUS".to_string(), SyncStatus::Synced.to_string());
        properties.insert(
            "SYNC_UPDATED".to_string(),
            now.format("[%Y-%m-%d %a %H:%M]").to_string(),
        );
        if let Some(category) = &route.category {
            properties.insert("CATEGORY".to_string(), category.clone());
        }

        LocalTask {
            id: format!("{}:{}", adapter, task.id),
            title: task.title.clone(),
            state,
            priority: Priority::from_labels(&task.labels),
            deadline: task.due_date.map(|d| d.date_naive()),
            scheduled: None,
            tags,
            properties,
            body: task.body.clone(),
            location: SourceLocation {
                file: PathBuf::from(&route.destination),
                line: 0,
            },
            sync: SyncMetadata {
                external_id: Some(external_id.to_string()),
                external_url: task.url.clone(),
                status: Some(SyncStatus::Synced),
                last_synced: Some(now),
            },
        }
    }

    /// `<data_dir>/<space>/org/<destination>`.
    pub fn destination_path(&self, destination: &str, space: Option<&str>) -> PathBuf {
        env::org_file_path(
            &self.data_dir,
            space.unwrap_or(env::outline::DEFAULT_SPACE),
            destination,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// `ai-task` becomes `:AI:`, any other `ai-<x>` becomes `:AI:<x>:`.
pub fn ai_label_tag(label: &str) -> Option<String> {
    match label.strip_prefix("ai-")? {
        "task" => Some(":AI:".to_string()),
        rest if !rest.is_empty() => Some(format!(":AI:{}:", rest)),
        _ => None,
    }
}
