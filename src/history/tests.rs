use super::*;
use crate::model::SyncOutcome;
use std::time::Duration as StdDuration;

fn record(direction: SyncDirection, adapter: &str, processed: usize, errors: &[&str]) -> HistoryRecord {
    let mut outcome = SyncOutcome {
        items_processed: processed,
        ..Default::default()
    };
    for error in errors {
        outcome.add_error(*error);
    }
    HistoryRecord::from_outcome(direction, adapter, &outcome, StdDuration::from_millis(250))
}

fn aged(mut record: HistoryRecord, days: i64) -> HistoryRecord {
    record.timestamp = Utc::now() - Duration::days(days);
    record
}

#[test]
fn test_record_and_read_back() {
    let history = SyncHistory::in_memory().unwrap();
    let id = history
        .record(&record(SyncDirection::Pull, "github", 3, &["rate limited"]))
        .unwrap();

    let entries = history.get_history(7, None, None, 100).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, Some(id));
    assert_eq!(entry.adapter, "github");
    assert_eq!(entry.direction, SyncDirection::Pull);
    assert_eq!(entry.items_processed, 3);
    assert_eq!(entry.items_failed, 1);
    assert_eq!(entry.errors, vec!["rate limited".to_string()]);
    assert_eq!(entry.duration_ms, 250);
}

#[test]
fn test_last_sync_ignores_failed_runs() {
    let history = SyncHistory::in_memory().unwrap();
    assert!(history.get_last_sync(None, None).unwrap().is_none());

    let clean = aged(record(SyncDirection::Pull, "github", 2, &[]), 1);
    history.record(&clean).unwrap();
    history
        .record(&record(SyncDirection::Pull, "github", 2, &["boom"]))
        .unwrap();
    history
        .record(&record(SyncDirection::Push, "github", 1, &[]))
        .unwrap();

    let last_pull = history
        .get_last_sync(Some("github"), Some(SyncDirection::Pull))
        .unwrap()
        .unwrap();
    assert!((last_pull - clean.timestamp).num_milliseconds().abs() < 1);

    let last_any = history.get_last_sync(None, None).unwrap().unwrap();
    assert!(last_any > clean.timestamp);

    assert!(history.get_last_sync(Some("calendar"), None).unwrap().is_none());
}

#[test]
fn test_history_filters_and_window() {
    let history = SyncHistory::in_memory().unwrap();
    history.record(&record(SyncDirection::Pull, "github", 1, &[])).unwrap();
    history.record(&record(SyncDirection::Push, "github", 1, &[])).unwrap();
    history.record(&record(SyncDirection::Pull, "calendar", 1, &[])).unwrap();
    history
        .record(&aged(record(SyncDirection::Pull, "github", 1, &[]), 10))
        .unwrap();

    assert_eq!(history.get_history(7, None, None, 100).unwrap().len(), 3);
    assert_eq!(history.get_history(30, None, None, 100).unwrap().len(), 4);
    assert_eq!(history.get_history(7, Some("github"), None, 100).unwrap().len(), 2);
    assert_eq!(
        history
            .get_history(7, Some("github"), Some(SyncDirection::Push), 100)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(history.get_history(7, None, None, 2).unwrap().len(), 2);
}

#[test]
fn test_stats_aggregation() {
    let history = SyncHistory::in_memory().unwrap();
    history.record(&record(SyncDirection::Pull, "github", 5, &[])).unwrap();
    history
        .record(&record(SyncDirection::Pull, "calendar", 2, &["token expired"]))
        .unwrap();
    history.record(&record(SyncDirection::Push, "github", 3, &[])).unwrap();

    let stats = history.get_stats(7).unwrap();
    assert_eq!(stats.period_days, 7);
    assert_eq!(
        stats.pull,
        DirectionStats {
            success: 1,
            failed: 1,
            items: 7
        }
    );
    assert_eq!(stats.push.success, 1);
    assert_eq!(stats.by_adapter["github"], AdapterStats { runs: 2, items: 8 });
    assert_eq!(stats.by_adapter["calendar"].runs, 1);
    assert!(stats.last_sync.is_some());
    assert_eq!(stats.recent_errors, vec!["token expired".to_string()]);
}

#[test]
fn test_state_and_watermarks() {
    let history = SyncHistory::in_memory().unwrap();
    assert!(history.get_state("cursor").unwrap().is_none());

    history.set_state("cursor", "abc").unwrap();
    history.set_state("cursor", "def").unwrap();
    assert_eq!(history.get_state("cursor").unwrap().as_deref(), Some("def"));

    let at = Utc::now() - Duration::hours(1);
    history.set_watermark("github", SyncDirection::Pull, at).unwrap();
    let stored = history.watermark("github", SyncDirection::Pull).unwrap().unwrap();
    assert!((stored - at).num_milliseconds().abs() < 1);
    assert!(history.watermark("github", SyncDirection::Push).unwrap().is_none());
    assert_eq!(
        history.get_state("watermark:github:pull").unwrap(),
        Some(format_timestamp(at))
    );
}

#[test]
fn test_cleanup_removes_old_records_only() {
    let history = SyncHistory::in_memory().unwrap();
    history
        .record(&aged(record(SyncDirection::Pull, "github", 1, &[]), 40))
        .unwrap();
    history.record(&record(SyncDirection::Pull, "github", 1, &[])).unwrap();
    history.set_state("keep", "me").unwrap();

    assert_eq!(history.cleanup(30).unwrap(), 1);
    assert_eq!(history.get_history(365, None, None, 100).unwrap().len(), 1);
    assert_eq!(history.get_state("keep").unwrap().as_deref(), Some("me"));
}
