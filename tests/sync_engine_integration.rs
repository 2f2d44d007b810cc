use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tasksync::adapter::{AdapterError, AdapterRegistry, AdapterSettings, PullOutcome, SyncAdapter};
use tasksync::conflict::ConflictQueue;
use tasksync::history::SyncHistory;
use tasksync::model::{
    Change, ChangeKind, LocalTask, RemoteRef, RemoteTask, SyncDirection, SyncStatus, TaskState,
};
use tasksync::outline::{JsonOutlineStore, OutlineStore};
use tasksync::sync::{SyncConfig, SyncEngine};
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct FixtureItem {
    id: String,
    title: String,
    #[serde(default = "default_state")]
    state: String,
    #[serde(default)]
    labels: Vec<String>,
}

fn default_state() -> String {
    "open".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct FixtureSettings {
    #[serde(default)]
    items: Vec<FixtureItem>,
}

/// Adapter whose remote items are declared in its configuration table.
struct FixtureAdapter {
    items: Vec<RemoteTask>,
}

#[async_trait]
impl SyncAdapter for FixtureAdapter {
    fn name(&self) -> &str {
        "fixture"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn test_connection(&self) -> (bool, String) {
        (true, format!("{} items available", self.items.len()))
    }

    async fn pull_changes(&self, _since: Option<DateTime<Utc>>) -> PullOutcome {
        let changes = self
            .items
            .iter()
            .map(|item| {
                let kind = if item.is_closed() {
                    ChangeKind::Closed
                } else {
                    ChangeKind::Updated
                };
                Change::new(kind)
                    .with_ref(RemoteRef::new(self.name(), &item.id, None))
                    .with_remote(item.clone())
            })
            .collect();
        PullOutcome::new(changes)
    }

    async fn create_task(&self, _task: &LocalTask) -> Option<RemoteRef> {
        Some(RemoteRef::new(self.name(), "100", None))
    }

    async fn update_task(&self, _remote: &RemoteRef, _task: &LocalTask) -> bool {
        true
    }

    async fn close_task(&self, _remote: &RemoteRef) -> bool {
        true
    }

    async fn find_matching_task(&self, _task: &LocalTask) -> Option<RemoteRef> {
        None
    }
}

fn fixture_factory(settings: &AdapterSettings) -> Result<Arc<dyn SyncAdapter>, AdapterError> {
    let parsed: FixtureSettings = settings.parse()?;
    let items = parsed
        .items
        .into_iter()
        .map(|item| RemoteTask::new(item.id, item.title, item.state).with_labels(item.labels))
        .collect();
    Ok(Arc::new(FixtureAdapter { items }))
}

fn registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::builtin();
    registry.register("fixture", fixture_factory);
    registry
}

fn config_for(dir: &TempDir, extra: &str) -> SyncConfig {
    let content = format!(
        r#"
data_dir = {:?}
adapter_timeout_secs = 5

[adapters.fixture]
items = [
    {{ id = "1", title = "Automate release notes", labels = ["ai-task"] }},
    {{ id = "2", title = "Renew domain" }},
    {{ id = "3", title = "Old chore", state = "closed" }},
]

[adapters.calendar]
enabled = false

[adapters.mystery]
{}
"#,
        dir.path().display().to_string(),
        extra
    );
    SyncConfig::from_toml_str(&content).expect("fixture config should parse")
}

#[tokio::test]
async fn test_file_backed_sync_imports_and_persists() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, "");
    let outline_path = config.outline_path();
    let database_path = config.database_path();

    let engine = SyncEngine::new(config, &registry()).unwrap();
    assert_eq!(engine.adapter_names(), vec!["fixture"]);

    let report = engine.sync().await.unwrap();
    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.items_pulled(), 3);
    assert_eq!(report.local_created, 2);
    drop(engine);

    assert!(outline_path.exists(), "outline should be written to disk");
    let outline = JsonOutlineStore::open(&outline_path).unwrap();
    let imported = outline
        .find_by_external_id("fixture:1")
        .unwrap()
        .expect("ai-task item should be imported");
    assert_eq!(imported.location.file.to_str(), Some("next_actions.org"));
    assert!(imported.tags.contains(&":AI:".to_string()));
    assert_eq!(imported.sync.status, Some(SyncStatus::Synced));
    assert!(outline.find_by_external_id("fixture:3").unwrap().is_none());

    let history = SyncHistory::open(&database_path).unwrap();
    let pulls = history
        .get_history(1, Some("fixture"), Some(SyncDirection::Pull), 10)
        .unwrap();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].items_processed, 3);
    assert!(
        history
            .watermark("fixture", SyncDirection::Pull)
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_second_run_over_same_data_dir_is_quiet() {
    let dir = TempDir::new().unwrap();

    let first = SyncEngine::new(config_for(&dir, ""), &registry()).unwrap();
    first.sync().await.unwrap();
    drop(first);

    let second = SyncEngine::new(config_for(&dir, ""), &registry()).unwrap();
    let report = second.sync().await.unwrap();

    assert_eq!(report.local_created, 0);
    assert_eq!(report.conflicts_detected, 0);
    assert_eq!(report.push.items_processed, 0);
    assert_eq!(
        second
            .history()
            .get_history(1, Some("fixture"), Some(SyncDirection::Pull), 10)
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_queued_conflict_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir, "");
    config
        .conflict_resolution
        .insert(tasksync::ConflictCategory::Title, tasksync::ResolutionStrategy::Ask);

    let remote = RemoteRef::new("fixture", "2", None);
    let mut local = LocalTask::new("renew", "Renew domain name", TaskState::Todo).linked_to(&remote);
    local.sync.status = Some(SyncStatus::Synced);
    JsonOutlineStore::open(config.outline_path())
        .unwrap()
        .insert_task(local)
        .unwrap();

    let database_path = config.database_path();
    let engine = SyncEngine::new(config, &registry()).unwrap();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.conflicts_queued, 1);
    drop(engine);

    let queue = ConflictQueue::open(&database_path).unwrap();
    let pending = queue.get_unresolved(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].external_id, "fixture:2");
    assert_eq!(pending[0].local_task_id, "renew");
}

#[tokio::test]
async fn test_pending_local_task_is_created_on_default_adapter() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir, "");
    config.default_adapter = Some("fixture".to_string());

    let mut draft = LocalTask::new("draft", "Book venue", TaskState::Next);
    draft.sync.status = Some(SyncStatus::Pending);
    JsonOutlineStore::open(config.outline_path())
        .unwrap()
        .insert_task(draft)
        .unwrap();

    let outline_path = config.outline_path();
    let engine = SyncEngine::new(config, &registry()).unwrap();
    assert_eq!(engine.default_adapter(), Some("fixture"));

    let report = engine.sync().await.unwrap();
    assert_eq!(report.push.items_created, 1);
    drop(engine);

    let stamped = JsonOutlineStore::open(&outline_path)
        .unwrap()
        .read_task("draft")
        .unwrap()
        .unwrap();
    assert_eq!(stamped.sync.external_id.as_deref(), Some("fixture:100"));
    assert_eq!(stamped.sync.status, Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_unconstructible_adapter_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, "token = \"abc\"");

    let engine = SyncEngine::new(config, &registry()).unwrap();
    assert!(engine.adapter("mystery").is_none());
    assert!(engine.adapter("calendar").is_none());
    assert!(engine.adapter("fixture").is_some());

    let diagnostic = engine.diagnostic().await.unwrap();
    assert_eq!(diagnostic.adapters.len(), 1);
    assert!(diagnostic.is_healthy());
}
