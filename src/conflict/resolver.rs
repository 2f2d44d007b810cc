//! Per-category policy engine turning a [`Conflict`] into a [`Resolution`].

use super::types::{
    Conflict, ConflictCategory, ConflictField, Resolution, ResolutionStrategy, StrategyUsed,
};
use crate::model::FieldValue;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Marker placed between the two halves of a concatenated description.
pub const MERGE_SEPARATOR: &str = "\n\n---\n[Merged from external]\n";

/// Who settles conflicts that need no human input.
pub const AUTO_RESOLVER: &str = "auto";

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    strategies: BTreeMap<ConflictCategory, ResolutionStrategy>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        use ConflictCategory::*;
        use ResolutionStrategy::*;

        let strategies = BTreeMap::from([
            (State, LocalWins),
            (Title, LocalWins),
            (Priority, LocalWins),
            (Deadline, LocalWins),
            (Description, Merge),
            (Labels, Merge),
            (Comments, RemoteWins),
        ]);
        Self { strategies }
    }
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the configured category → strategy map.
    pub fn from_config(overrides: &BTreeMap<ConflictCategory, ResolutionStrategy>) -> Self {
        let mut resolver = Self::default();
        for (category, strategy) in overrides {
            resolver.strategies.insert(*category, *strategy);
        }
        resolver
    }

    pub fn strategy_for(&self, category: ConflictCategory) -> ResolutionStrategy {
        self.strategies
            .get(&category)
            .copied()
            .unwrap_or(ResolutionStrategy::Ask)
    }

    /// Apply the strategy table to every field of `conflict`.
    ///
    /// The conflict is marked resolved by `auto` only when no field needs a
    /// human; otherwise it is returned untouched inside the resolution and
    /// the caller must enqueue it.
    pub fn resolve(&self, mut conflict: Conflict) -> Resolution {
        let mut local_changes = BTreeMap::new();
        let mut remote_changes = BTreeMap::new();
        let mut needs_human_review = false;
        let mut notes = Vec::new();

        for field in &conflict.fields {
            let strategy = self.strategy_for(field.category);
            debug!(
                "Resolving {} of {} with {}",
                field.field_name, conflict.external_id, strategy
            );

            match strategy {
                ResolutionStrategy::LocalWins => {
                    remote_changes.insert(field.field_name.clone(), field.local_value.clone());
                    notes.push(format!("{}: local wins", field.field_name));
                }
                ResolutionStrategy::RemoteWins => {
                    local_changes.insert(field.field_name.clone(), field.remote_value.clone());
                    notes.push(format!("{}: remote wins", field.field_name));
                }
                ResolutionStrategy::Merge => match try_merge(field) {
                    Some(merged) => {
                        local_changes.insert(field.field_name.clone(), merged.clone());
                        remote_changes.insert(field.field_name.clone(), merged);
                        notes.push(format!("{}: merged", field.field_name));
                    }
                    None => {
                        needs_human_review = true;
                        notes.push(format!("{}: merge failed, needs review", field.field_name));
                    }
                },
                ResolutionStrategy::Ask => {
                    needs_human_review = true;
                    notes.push(format!("{}: needs human decision", field.field_name));
                }
            }
        }

        let strategy_used = self.strategy_used(&conflict);

        if !needs_human_review {
            conflict.resolved = true;
            conflict.resolved_at = Some(Utc::now());
            conflict.resolution_strategy = Some(strategy_used);
            conflict.resolved_by = Some(AUTO_RESOLVER.to_string());
        }

        Resolution {
            conflict,
            strategy_used,
            local_changes,
            remote_changes,
            needs_human_review,
            notes,
        }
    }

    fn strategy_used(&self, conflict: &Conflict) -> StrategyUsed {
        let used: BTreeSet<&'static str> = conflict
            .fields
            .iter()
            .map(|f| self.strategy_for(f.category).as_str())
            .collect();

        match conflict.fields.first() {
            None => StrategyUsed::Single(ResolutionStrategy::LocalWins),
            Some(first) if used.len() == 1 => StrategyUsed::Single(self.strategy_for(first.category)),
            Some(_) => StrategyUsed::Mixed,
        }
    }
}

/// Automatic combination for categories that have a merge rule.
fn try_merge(field: &ConflictField) -> Option<FieldValue> {
    match field.category {
        ConflictCategory::Description => {
            let local = field.local_value.as_text()?;
            let remote = field.remote_value.as_text()?;
            Some(FieldValue::Text(merge_descriptions(local, remote)))
        }
        ConflictCategory::Labels => {
            let local = field.local_value.as_list().unwrap_or_default();
            let remote = field.remote_value.as_list().unwrap_or_default();
            Some(FieldValue::List(merge_labels(local, remote)))
        }
        _ => None,
    }
}

/// Keep the longer text when one contains the other, otherwise concatenate.
pub fn merge_descriptions(local: &str, remote: &str) -> String {
    let local_norm = local.trim().to_lowercase();
    let remote_norm = remote.trim().to_lowercase();

    if remote_norm.contains(&local_norm) {
        remote.to_string()
    } else if local_norm.contains(&remote_norm) {
        local.to_string()
    } else {
        format!("{}{}{}", local, MERGE_SEPARATOR, remote)
    }
}

pub fn merge_labels(local: &[String], remote: &[String]) -> Vec<String> {
    local
        .iter()
        .chain(remote)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
