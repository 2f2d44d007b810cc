use crate::conflict::QueueStats;
use crate::history::HistoryStats;
use crate::model::{Change, SyncOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Result of one adapter's pull.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterPull {
    pub since: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub items: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl AdapterPull {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Aggregated pull across every adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PullReport {
    #[serde(skip)]
    pub changes: Vec<Change>,
    pub adapters: BTreeMap<String, AdapterPull>,
    /// History records that could not be written.
    pub persistence_errors: Vec<String>,
}

impl PullReport {
    /// Every adapter error, prefixed with the adapter name.
    pub fn errors(&self) -> Vec<String> {
        self.adapters
            .iter()
            .flat_map(|(name, pull)| pull.errors.iter().map(move |e| format!("{}: {}", name, e)))
            .collect()
    }
}

/// Aggregated push across every adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PushReport {
    pub outcome: SyncOutcome,
    /// Items sent to each adapter.
    pub adapters: BTreeMap<String, usize>,
    pub persistence_errors: Vec<String>,
}

/// Everything a full sync run did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pulled: BTreeMap<String, usize>,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    pub conflicts_queued: usize,
    pub propagations_applied: usize,
    pub local_created: usize,
    pub local_updated: usize,
    pub push: SyncOutcome,
    /// Adapter and outline errors; the run carried on past each of them.
    pub errors: Vec<String>,
    /// Queue or history writes that did not happen.
    pub persistence_errors: Vec<String>,
}

impl SyncReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            duration_ms: 0,
            pulled: BTreeMap::new(),
            conflicts_detected: 0,
            conflicts_auto_resolved: 0,
            conflicts_queued: 0,
            propagations_applied: 0,
            local_created: 0,
            local_updated: 0,
            push: SyncOutcome::default(),
            errors: Vec::new(),
            persistence_errors: Vec::new(),
        }
    }

    pub fn items_pulled(&self) -> usize {
        self.pulled.values().sum()
    }

    /// No errors of any kind. Queued conflicts do not count against this.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.persistence_errors.is_empty() && self.push.items_failed == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync run {} ({} ms)", self.run_id, self.duration_ms)?;
        for (adapter, items) in &self.pulled {
            writeln!(f, "  pulled {:>4} from {}", items, adapter)?;
        }
        writeln!(
            f,
            "  local: {} created, {} updated, {} propagated",
            self.local_created, self.local_updated, self.propagations_applied
        )?;
        writeln!(
            f,
            "  push: {} processed / {} created / {} updated / {} failed",
            self.push.items_processed,
            self.push.items_created,
            self.push.items_updated,
            self.push.items_failed
        )?;
        writeln!(
            f,
            "  conflicts: {} detected, {} auto-resolved, {} need review",
            self.conflicts_detected, self.conflicts_auto_resolved, self.conflicts_queued
        )?;
        for error in self.errors.iter().chain(&self.push.errors) {
            writeln!(f, "  error: {}", error)?;
        }
        for error in &self.persistence_errors {
            writeln!(f, "  PERSISTENCE FAILURE: {}", error)?;
        }
        Ok(())
    }
}

/// Health of one adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterDiagnostic {
    pub name: String,
    pub configured: bool,
    pub connected: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub adapters: Vec<AdapterDiagnostic>,
    pub history: HistoryStats,
    pub queue: QueueStats,
}

impl Diagnostic {
    pub fn is_healthy(&self) -> bool {
        self.adapters.iter().all(|a| a.configured && a.connected)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Adapters:")?;
        if self.adapters.is_empty() {
            writeln!(f, "  (none enabled)")?;
        }
        for adapter in &self.adapters {
            let mark = if adapter.configured && adapter.connected {
                "✓"
            } else {
                "✗"
            };
            writeln!(
                f,
                "  {} {} (configured: {}) - {}",
                mark, adapter.name, adapter.configured, adapter.message
            )?;
        }
        writeln!(f, "History ({} days):", self.history.period_days)?;
        writeln!(
            f,
            "  pull: {} ok / {} failed, push: {} ok / {} failed",
            self.history.pull.success,
            self.history.pull.failed,
            self.history.push.success,
            self.history.push.failed
        )?;
        if let Some(last) = self.history.last_sync {
            writeln!(f, "  last sync: {}", last.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        writeln!(f, "Conflicts:")?;
        writeln!(
            f,
            "  {} unresolved, {} resolved today",
            self.queue.unresolved_count, self.queue.resolved_today
        )
    }
}
