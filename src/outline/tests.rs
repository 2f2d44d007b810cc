use super::json_store::OutlineDocument;
use super::*;
use crate::model::{FieldValue, LocalTask, Priority, RemoteRef, SyncStatus, TaskState};
use chrono::NaiveDate;
use std::path::PathBuf;
use tempfile::TempDir;

fn pending(id: &str, title: &str) -> LocalTask {
    let mut task = LocalTask::new(id, title, TaskState::Todo);
    task.location.file = PathBuf::from("inbox.org");
    task.sync.status = Some(SyncStatus::Pending);
    task
}

fn seeded_store(dir: &TempDir) -> JsonOutlineStore {
    let path = dir.path().join("outline.json");
    let mut document = OutlineDocument::default();
    let linked = LocalTask::new("next_actions.org:3", "Linked", TaskState::Next)
        .linked_to(&RemoteRef::new("github", "o/r#3", None));
    document
        .files
        .insert("next_actions.org".into(), vec![linked]);
    document
        .files
        .insert("inbox.org".into(), vec![pending("inbox.org:1", "Draft")]);
    std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
    JsonOutlineStore::open(path).unwrap()
}

#[test]
fn test_missing_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let store = JsonOutlineStore::open(dir.path().join("none.json")).unwrap();
    assert!(store.pending_tasks().unwrap().is_empty());
    assert!(store.read_task("x").unwrap().is_none());
}

#[test]
fn test_lookups() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);

    assert_eq!(store.read_task("inbox.org:1").unwrap().unwrap().title, "Draft");
    let linked = store.find_by_external_id("github:o/r#3").unwrap().unwrap();
    assert_eq!(linked.id, "next_actions.org:3");

    let pending = store.pending_tasks().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "inbox.org:1");
}

#[test]
fn test_write_resolved_fields() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);
    let id = "next_actions.org:3";

    let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
    for (field, value) in [
        ("title", FieldValue::text("Renamed")),
        ("description", FieldValue::text("Body")),
        ("priority", FieldValue::text("B")),
        ("deadline", FieldValue::Date(date)),
        ("state", FieldValue::text("closed")),
    ] {
        assert_eq!(
            store.write_resolved_field(id, field, &value).unwrap(),
            WriteOutcome::Applied
        );
    }

    let reopened = JsonOutlineStore::open(store.path()).unwrap();
    let task = reopened.read_task(id).unwrap().unwrap();
    assert_eq!(task.title, "Renamed");
    assert_eq!(task.body, "Body");
    assert_eq!(task.priority, Some(Priority::B));
    assert_eq!(task.deadline, Some(date));
    assert_eq!(task.state, TaskState::Done);
}

#[test]
fn test_write_rejects_bad_values_and_unknown_tasks() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);

    let err = store
        .write_resolved_field("nope", "title", &FieldValue::text("x"))
        .unwrap_err();
    assert!(matches!(err, OutlineError::UnknownTask(_)));

    let err = store
        .write_resolved_field("inbox.org:1", "deadline", &FieldValue::text("soon"))
        .unwrap_err();
    assert!(matches!(err, OutlineError::InvalidValue { .. }));
}

#[test]
fn test_external_edit_makes_write_stale() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir);

    // Someone edits the file behind the store's back.
    let mut edited = store.document().unwrap();
    edited.files.get_mut("inbox.org").unwrap()[0].title = "Edited by hand".into();
    std::fs::write(store.path(), serde_json::to_vec_pretty(&edited).unwrap()).unwrap();

    let outcome = store
        .write_resolved_field("inbox.org:1", "title", &FieldValue::text("Resolved"))
        .unwrap();
    assert_eq!(outcome, WriteOutcome::StaleConflict);

    let on_disk = JsonOutlineStore::open(store.path()).unwrap();
    assert_eq!(on_disk.read_task("inbox.org:1").unwrap().unwrap().title, "Edited by hand");

    assert!(matches!(
        store.insert_task(pending("inbox.org:2", "New")),
        Err(OutlineError::Stale(_))
    ));

    store.refresh().unwrap();
    assert_eq!(
        store
            .write_resolved_field("inbox.org:1", "title", &FieldValue::text("Resolved"))
            .unwrap(),
        WriteOutcome::Applied
    );
}

#[test]
fn test_insert_and_mark_synced() {
    let dir = TempDir::new().unwrap();
    let store = JsonOutlineStore::open(dir.path().join("state").join("outline.json")).unwrap();

    store.insert_task(pending("inbox.org:9", "Fresh")).unwrap();
    assert_eq!(store.pending_tasks().unwrap().len(), 1);

    let remote = RemoteRef::new("github", "o/r#9", Some("https://github.com/o/r/issues/9".into()));
    store
        .mark_synced("inbox.org:9", &remote, chrono::Utc::now())
        .unwrap();

    let task = store.read_task("inbox.org:9").unwrap().unwrap();
    assert!(task.is_linked());
    assert_eq!(task.sync.status, Some(SyncStatus::Synced));
    assert_eq!(task.sync.external_url.as_deref(), Some("https://github.com/o/r/issues/9"));
    assert!(store.pending_tasks().unwrap().is_empty());

    let err = store
        .mark_synced("missing", &remote, chrono::Utc::now())
        .unwrap_err();
    assert!(matches!(err, OutlineError::UnknownTask(_)));
}
