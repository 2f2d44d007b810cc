use super::report::{AdapterDiagnostic, AdapterPull, Diagnostic, PullReport, PushReport, SyncReport};
use super::{SyncConfig, SyncError};
use crate::adapter::{AdapterRegistry, PullOutcome, SyncAdapter};
use crate::conflict::{Conflict, ConflictDetector, ConflictQueue, ConflictResolver, PropagationTarget};
use crate::history::SyncHistory;
use crate::model::{
    Change, ChangeKind, FieldValue, HistoryRecord, RemoteRef, RemoteTask, SyncDirection,
    SyncOutcome,
};
use crate::outline::json_store::apply_field;
use crate::outline::{JsonOutlineStore, OutlineError, OutlineStore, WriteOutcome};
use crate::router::TaskRouter;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DIAGNOSTIC_HISTORY_DAYS: u32 = 7;
const STALE_WRITE_NOTE: &str = "outline changed on disk while the resolution was being written";

/// Conflicts and history rows removed by [`SyncEngine::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub conflicts_removed: usize,
    pub history_removed: usize,
}

pub struct SyncEngine {
    config: SyncConfig,
    adapters: BTreeMap<String, Arc<dyn SyncAdapter>>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    router: TaskRouter,
    queue: ConflictQueue,
    history: SyncHistory,
    outline: Arc<dyn OutlineStore>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}

/// Mutable bookkeeping for one pass over the pulled changes.
#[derive(Default)]
struct RunState {
    outgoing: Vec<Change>,
    /// Local task ids already scheduled for push by this run.
    touched: BTreeSet<String>,
    /// Adapters whose changes were not fully processed; their watermark stays put.
    held_back: BTreeSet<String>,
}

impl SyncEngine {
    /// Open the stores named by `config` and build every enabled adapter.
    pub fn new(config: SyncConfig, registry: &AdapterRegistry) -> Result<Self, SyncError> {
        config.validate()?;

        let database = config.database_path();
        let queue = ConflictQueue::open(&database)?;
        let history = SyncHistory::open(&database)?;
        let outline: Arc<dyn OutlineStore> = Arc::new(JsonOutlineStore::open(config.outline_path())?);

        let mut engine = Self::with_components(config, outline, queue, history)?;
        engine.adapters = registry.build_enabled(&engine.config.adapters);
        info!(
            "Sync engine ready: {} adapters ({})",
            engine.adapters.len(),
            engine.adapter_names().join(", ")
        );
        Ok(engine)
    }

    /// Assemble an engine from already-open parts, with no adapters.
    pub fn with_components(
        config: SyncConfig,
        outline: Arc<dyn OutlineStore>,
        queue: ConflictQueue,
        history: SyncHistory,
    ) -> Result<Self, SyncError> {
        let resolver = ConflictResolver::from_config(&config.conflict_resolution);
        let router = TaskRouter::new(&config.routing, config.data_dir.clone())?;
        Ok(Self {
            config,
            adapters: BTreeMap::new(),
            detector: ConflictDetector::new(),
            resolver,
            router,
            queue,
            history,
            outline,
        })
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SyncAdapter>) -> Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn adapter(&self, name: &str) -> Option<&Arc<dyn SyncAdapter>> {
        self.adapters.get(name)
    }

    pub fn queue(&self) -> &ConflictQueue {
        &self.queue
    }

    pub fn history(&self) -> &SyncHistory {
        &self.history
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn outline(&self) -> &Arc<dyn OutlineStore> {
        &self.outline
    }

    /// Adapter that receives brand-new items carrying no external reference.
    pub fn default_adapter(&self) -> Option<&str> {
        match &self.config.default_adapter {
            Some(name) => self
                .adapters
                .contains_key(name)
                .then_some(name.as_str()),
            None => self.adapters.keys().next().map(String::as_str),
        }
    }

    /// Pull from every adapter with the same `since`.
    pub async fn pull_all(&self, since: Option<DateTime<Utc>>) -> PullReport {
        let plan = self
            .adapters
            .keys()
            .map(|name| (name.clone(), since))
            .collect();
        self.pull(plan).await
    }

    async fn pull(&self, plan: Vec<(String, Option<DateTime<Utc>>)>) -> PullReport {
        let timeout = self.config.adapter_timeout();

        let pulls = plan.into_iter().filter_map(|(name, since)| {
            let adapter = self.adapters.get(&name)?.clone();
            Some(async move {
                let started_at = Utc::now();
                let start = Instant::now();
                let outcome = if adapter.is_configured() {
                    debug!("Pulling {} since {:?}", name, since);
                    let handle = tokio::spawn(async move {
                        tokio::time::timeout(timeout, adapter.pull_changes(since)).await
                    });
                    match handle.await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => {
                            warn!("Pull from {} timed out after {:?}", name, timeout);
                            PullOutcome::failed(format!("pull timed out after {}s", timeout.as_secs()))
                        }
                        Err(e) => {
                            error!("Pull from {} aborted: {}", name, e);
                            PullOutcome::failed(format!("pull aborted: {}", e))
                        }
                    }
                } else {
                    warn!("Adapter {} is not configured; skipping pull", name);
                    PullOutcome::failed("adapter is not configured")
                };
                (name, since, started_at, start.elapsed(), outcome)
            })
        });

        let mut report = PullReport::default();
        for (name, since, started_at, elapsed, outcome) in join_all(pulls).await {
            let mut summary = SyncOutcome {
                items_processed: outcome.changes.len(),
                ..Default::default()
            };
            for e in &outcome.errors {
                summary.add_error(e.clone());
            }
            if let Some(e) = self.record_history(SyncDirection::Pull, &name, &summary, elapsed) {
                report.persistence_errors.push(e);
            }

            info!(
                "Pulled {} changes from {} ({} errors) in {:.2}s",
                outcome.changes.len(),
                name,
                outcome.errors.len(),
                elapsed.as_secs_f64()
            );
            report.adapters.insert(
                name.clone(),
                AdapterPull {
                    since,
                    started_at,
                    items: outcome.changes.len(),
                    errors: outcome.errors,
                    duration_ms: elapsed.as_millis() as u64,
                },
            );
            report.changes.extend(outcome.changes.into_iter().map(|mut change| {
                if change.remote_ref.is_none()
                    && let Some(remote) = &change.remote
                {
                    change.remote_ref = Some(RemoteRef::new(&name, &remote.id, remote.url.clone()));
                }
                change
            }));
        }
        report
    }

    /// Push changes grouped by target adapter.
    ///
    /// Changes without a reference go to [`default_adapter`](Self::default_adapter);
    /// changes naming an adapter that is not loaded fail individually.
    pub async fn push_all(&self, changes: Vec<Change>) -> PushReport {
        let mut report = PushReport::default();
        let default = self.default_adapter().map(str::to_string);

        let mut groups: BTreeMap<String, Vec<Change>> = BTreeMap::new();
        for change in changes {
            let title = change
                .local
                .as_ref()
                .map(|t| t.title.clone())
                .unwrap_or_default();
            match change.target_adapter().map(str::to_string).or_else(|| default.clone()) {
                Some(name) if self.adapters.contains_key(&name) => {
                    groups.entry(name).or_default().push(change)
                }
                Some(name) => {
                    warn!("No adapter '{}' loaded for '{}'", name, title);
                    report
                        .outcome
                        .fail_items(1, format!("No adapter '{}' for: {}", name, title));
                }
                None => report
                    .outcome
                    .fail_items(1, format!("No default adapter for new item: {}", title)),
            }
        }

        let timeout = self.config.adapter_timeout();
        let pushes = groups.into_iter().filter_map(|(name, batch)| {
            let adapter = self.adapters.get(&name)?.clone();
            Some(async move {
                let count = batch.len();
                let start = Instant::now();
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, adapter.push_changes(batch)).await
                });
                let outcome = match handle.await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => {
                        warn!("Push to {} timed out after {:?}", name, timeout);
                        let mut outcome = SyncOutcome::default();
                        outcome.fail_items(
                            count,
                            format!("{}: push timed out after {}s", name, timeout.as_secs()),
                        );
                        outcome
                    }
                    Err(e) => {
                        error!("Push to {} aborted: {}", name, e);
                        let mut outcome = SyncOutcome::default();
                        outcome.fail_items(count, format!("{}: push aborted: {}", name, e));
                        outcome
                    }
                };
                (name, count, start.elapsed(), outcome)
            })
        });

        for (name, count, elapsed, outcome) in join_all(pushes).await {
            if let Some(e) = self.record_history(SyncDirection::Push, &name, &outcome, elapsed) {
                report.persistence_errors.push(e);
            }
            info!(
                "Pushed {} changes to {}: {} created, {} updated, {} failed",
                count, name, outcome.items_created, outcome.items_updated, outcome.items_failed
            );
            report.adapters.insert(name, count);
            report.outcome.absorb(outcome);
        }
        report
    }

    /// One full bidirectional run.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        if !self.config.enabled {
            return Err(SyncError::Disabled);
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let mut report = SyncReport::new(Uuid::new_v4().to_string(), started_at);
        info!(
            "Starting sync run {} ({} adapters)",
            report.run_id,
            self.adapters.len()
        );

        self.outline.refresh()?;

        let plan = self
            .adapters
            .keys()
            .map(|name| (name.clone(), self.pull_since(name, &mut report)))
            .collect();
        let pulled = self.pull(plan).await;
        report.errors.extend(pulled.errors());
        report.persistence_errors.extend(pulled.persistence_errors);
        for (name, pull) in &pulled.adapters {
            report.pulled.insert(name.clone(), pull.items);
        }

        let mut run = RunState::default();
        for change in &pulled.changes {
            if let Err(e) = self.apply_remote_change(change, &mut run, &mut report) {
                let target = change
                    .remote_ref
                    .as_ref()
                    .map(|r| r.external_id.clone())
                    .unwrap_or_default();
                warn!("Failed to apply {} change for {}: {}", change.kind, target, e);
                report.errors.push(format!("{}: {}", target, e));
                if let Some(adapter) = change.target_adapter() {
                    run.held_back.insert(adapter.to_string());
                }
            }
        }

        match self.outline.pending_tasks() {
            Ok(tasks) => {
                for task in tasks {
                    if run.touched.contains(&task.id) {
                        continue;
                    }
                    let Some(remote_ref) = task.remote_ref() else {
                        debug!("Pending local {} for '{}'", ChangeKind::Created, task.title);
                        run.outgoing.push(Change::new(ChangeKind::Created).with_local(task));
                        continue;
                    };
                    debug!("Pending local {} for '{}'", ChangeKind::Updated, task.title);
                    let closed = task.state.is_closed();
                    run.outgoing.push(
                        Change::new(ChangeKind::Updated)
                            .with_ref(remote_ref.clone())
                            .with_local(task.clone()),
                    );
                    // An update alone never closes the remote item.
                    if closed {
                        run.outgoing.push(
                            Change::new(ChangeKind::StateChanged)
                                .with_ref(remote_ref)
                                .with_local(task)
                                .with_fields(["state"]),
                        );
                    }
                }
            }
            Err(e) => {
                warn!("Could not list pending tasks: {}", e);
                report.errors.push(format!("outline: {}", e));
            }
        }

        if !run.outgoing.is_empty() {
            let pushed = self.push_all(std::mem::take(&mut run.outgoing)).await;
            report.persistence_errors.extend(pushed.persistence_errors);

            let now = Utc::now();
            for change in &pushed.outcome.changes {
                if let (Some(task), Some(remote)) = (&change.local, &change.remote_ref)
                    && let Err(e) = self.outline.mark_synced(&task.id, remote, now)
                {
                    warn!("Could not stamp sync metadata on {}: {}", task.id, e);
                    report.errors.push(format!("{}: {}", task.id, e));
                }
            }
            report.push = pushed.outcome;
        }

        for (name, pull) in &pulled.adapters {
            if !pull.is_clean() || run.held_back.contains(name) {
                debug!("Keeping {} pull watermark in place", name);
                continue;
            }
            if let Err(e) = self
                .history
                .set_watermark(name, SyncDirection::Pull, pull.started_at)
            {
                error!("Failed to advance {} watermark: {}", name, e);
                report
                    .persistence_errors
                    .push(format!("watermark {}: {}", name, e));
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Sync run {} finished in {} ms: {} pulled, {} pushed, {} conflicts queued, {} errors",
            report.run_id,
            report.duration_ms,
            report.items_pulled(),
            report.push.items_processed,
            report.conflicts_queued,
            report.errors.len() + report.push.errors.len()
        );
        Ok(report)
    }

    /// Watermark for `adapter`, falling back to its last clean pull.
    fn pull_since(&self, adapter: &str, report: &mut SyncReport) -> Option<DateTime<Utc>> {
        let lookup = self
            .history
            .watermark(adapter, SyncDirection::Pull)
            .and_then(|mark| match mark {
                Some(at) => Ok(Some(at)),
                None => self.history.get_last_sync(Some(adapter), Some(SyncDirection::Pull)),
            });
        match lookup {
            Ok(since) => since,
            Err(e) => {
                warn!("No pull watermark for {}: {}", adapter, e);
                report.errors.push(format!("{}: watermark unavailable: {}", adapter, e));
                None
            }
        }
    }

    fn apply_remote_change(
        &self,
        change: &Change,
        run: &mut RunState,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let (Some(remote), Some(remote_ref)) = (&change.remote, &change.remote_ref) else {
            debug!("Skipping {} change without a remote item", change.kind);
            return Ok(());
        };

        let Some(local) = self.outline.find_by_external_id(&remote_ref.external_id)? else {
            return self.import_remote(remote, remote_ref, report);
        };

        let mut outgoing = local.clone();
        let mut remote_fields: Vec<String> = Vec::new();

        if let Some(conflict) = self.detector.detect(&local, remote, local.sync.last_synced) {
            report.conflicts_detected += 1;
            let resolution = self.resolver.resolve(conflict);
            debug!("{} -> {}", resolution.conflict.summary(), resolution.notes_text());

            if resolution.needs_human_review {
                self.enqueue(&resolution.conflict, report);
            } else {
                match self.write_fields(&local.id, &resolution.local_changes)? {
                    WriteOutcome::StaleConflict => {
                        self.enqueue(&reopened(resolution.conflict), report);
                        return Ok(());
                    }
                    WriteOutcome::Applied => {
                        report.conflicts_auto_resolved += 1;
                        if !resolution.local_changes.is_empty() {
                            report.local_updated += 1;
                        }
                        for (field, value) in &resolution.local_changes {
                            apply_field(&mut outgoing, field, value)?;
                        }
                        for (field, value) in &resolution.remote_changes {
                            apply_field(&mut outgoing, field, value)?;
                            remote_fields.push(field.clone());
                        }
                    }
                }
            }
        }

        let mut to_local = BTreeMap::new();
        for propagation in self.detector.propagations(&local, remote) {
            match propagation.target {
                PropagationTarget::Local => {
                    to_local.insert(propagation.field_name, propagation.value);
                }
                PropagationTarget::Remote => {
                    report.propagations_applied += 1;
                    if !remote_fields.contains(&propagation.field_name) {
                        remote_fields.push(propagation.field_name);
                    }
                }
            }
        }
        if !to_local.is_empty() {
            match self.write_fields(&local.id, &to_local)? {
                WriteOutcome::Applied => {
                    report.propagations_applied += to_local.len();
                    report.local_updated += 1;
                    for (field, value) in &to_local {
                        apply_field(&mut outgoing, field, value)?;
                    }
                }
                WriteOutcome::StaleConflict => {
                    warn!("Outline changed on disk; not copying remote fields into {}", local.id);
                    return Err(OutlineError::Stale(local.location.file.clone()).into());
                }
            }
        }

        if remote_fields.is_empty() {
            return Ok(());
        }
        debug!("Scheduling push of {:?} for {}", remote_fields, remote_ref);
        run.touched.insert(local.id.clone());

        // Close/reopen carries no field data, so other fields travel as a separate update.
        let (state, fields): (Vec<String>, Vec<String>) =
            remote_fields.into_iter().partition(|f| f == "state");
        if !fields.is_empty() {
            run.outgoing.push(
                Change::new(ChangeKind::Updated)
                    .with_ref(remote_ref.clone())
                    .with_local(outgoing.clone())
                    .with_fields(fields),
            );
        }
        if !state.is_empty() {
            run.outgoing.push(
                Change::new(ChangeKind::StateChanged)
                    .with_ref(remote_ref.clone())
                    .with_local(outgoing)
                    .with_fields(state),
            );
        }
        Ok(())
    }

    /// File a remote item seen for the first time. Closed items are not imported.
    fn import_remote(
        &self,
        remote: &RemoteTask,
        remote_ref: &RemoteRef,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if remote.is_closed() {
            debug!("Ignoring closed {} with no local task", remote_ref);
            return Ok(());
        }
        let task = self
            .router
            .external_to_local(remote, &remote_ref.adapter, &remote_ref.external_id);
        self.outline.insert_task(task)?;
        report.local_created += 1;
        Ok(())
    }

    fn write_fields(
        &self,
        task_id: &str,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<WriteOutcome, OutlineError> {
        for (field, value) in fields {
            if self.outline.write_resolved_field(task_id, field, value)? == WriteOutcome::StaleConflict {
                return Ok(WriteOutcome::StaleConflict);
            }
        }
        Ok(WriteOutcome::Applied)
    }

    /// Queue `conflict` unless the same categories are already awaiting review.
    fn enqueue(&self, conflict: &Conflict, report: &mut SyncReport) {
        match self.queue.get_by_external_id(&conflict.external_id) {
            Ok(Some(latest)) if !latest.resolved && latest.categories() == conflict.categories() => {
                debug!(
                    "Conflict for {} already queued as #{}",
                    conflict.external_id,
                    latest.id.unwrap_or_default()
                );
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not look up queued conflicts for {}: {}", conflict.external_id, e),
        }
        match self.queue.add(conflict) {
            Ok(id) => {
                report.conflicts_queued += 1;
                info!("Queued conflict #{} for review: {}", id, conflict.summary());
            }
            Err(e) => {
                error!("Failed to queue conflict for {}: {}", conflict.external_id, e);
                report
                    .persistence_errors
                    .push(format!("conflict {} not queued: {}", conflict.external_id, e));
            }
        }
    }

    /// Returns the error text when the record could not be written.
    fn record_history(
        &self,
        direction: SyncDirection,
        adapter: &str,
        outcome: &SyncOutcome,
        elapsed: Duration,
    ) -> Option<String> {
        let record = HistoryRecord::from_outcome(direction, adapter, outcome, elapsed);
        match self.history.record(&record) {
            Ok(_) => None,
            Err(e) => {
                error!("Failed to record {} history for {}: {}", direction, adapter, e);
                Some(format!("{} history for {} not recorded: {}", direction, adapter, e))
            }
        }
    }

    /// Per-adapter configuration and connectivity, plus store statistics.
    /// Read-only.
    pub async fn diagnostic(&self) -> Result<Diagnostic, SyncError> {
        let timeout = self.config.adapter_timeout();
        let probes = self.adapters.iter().map(|(name, adapter)| {
            let name = name.clone();
            let adapter = adapter.clone();
            async move {
                let configured = adapter.is_configured();
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, adapter.test_connection()).await
                });
                let (connected, message) = match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => (
                        false,
                        format!("connection test timed out after {}s", timeout.as_secs()),
                    ),
                    Err(e) => (false, format!("connection test aborted: {}", e)),
                };
                AdapterDiagnostic {
                    name,
                    configured,
                    connected,
                    message,
                }
            }
        });
        let adapters = join_all(probes).await;

        Ok(Diagnostic {
            adapters,
            history: self.history.get_stats(DIAGNOSTIC_HISTORY_DAYS)?,
            queue: self.queue.get_stats()?,
        })
    }

    /// Drop resolved conflicts and history past their retention windows.
    pub fn cleanup(&self) -> Result<CleanupSummary, SyncError> {
        let summary = CleanupSummary {
            conflicts_removed: self.queue.cleanup(self.config.conflict_retention_days)?,
            history_removed: self.history.cleanup(self.config.history_retention_days)?,
        };
        info!(
            "Cleanup removed {} conflicts and {} history records",
            summary.conflicts_removed, summary.history_removed
        );
        Ok(summary)
    }
}

fn reopened(mut conflict: Conflict) -> Conflict {
    conflict.resolved = false;
    conflict.resolved_at = None;
    conflict.resolution_strategy = None;
    conflict.resolved_by = None;
    conflict.notes = Some(STALE_WRITE_NOTE.to_string());
    conflict
}
