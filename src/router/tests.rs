use super::*;
use chrono::{TimeZone, Utc};
use std::path::Path;

fn issue(id: &str) -> RemoteTask {
    RemoteTask::new(id, "Investigate flaky test", "open")
        .with_url(format!("https://github.com/o/r/issues/{}", id))
}

fn rule(source: &str, condition: &str, destination: &str) -> RoutingRuleConfig {
    RoutingRuleConfig {
        source: source.to_string(),
        condition: condition.to_string(),
        destination: destination.to_string(),
        tags: Vec::new(),
        category: None,
        state: None,
    }
}

#[test]
fn test_condition_grammar() {
    assert_eq!("true".parse::<Condition>().unwrap(), Condition::Always);
    assert_eq!(" TRUE ".parse::<Condition>().unwrap(), Condition::Always);
    assert_eq!(
        "labels contains 'ai-task'".parse::<Condition>().unwrap(),
        Condition::LabelsContain("ai-task".into())
    );
    assert_eq!(
        r#"assignee == "octocat""#.parse::<Condition>().unwrap(),
        Condition::AssigneeIs("octocat".into())
    );
    assert_eq!(
        "assignee is null".parse::<Condition>().unwrap(),
        Condition::AssigneeNull
    );

    for bad in ["labels has 'x'", "1 == 1", "assignee != 'x'", ""] {
        assert!(bad.parse::<Condition>().is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_condition_matching() {
    let task = issue("1").with_labels(["AI-Task", "bug"]).with_assignee("OctoCat");

    assert!(Condition::LabelsContain("ai-task".into()).matches(&task));
    assert!(!Condition::LabelsContain("ai".into()).matches(&task));
    assert!(Condition::AssigneeIs("octocat".into()).matches(&task));
    assert!(!Condition::AssigneeNull.matches(&task));
    assert!(Condition::AssigneeNull.matches(&issue("2")));
}

#[test]
fn test_default_rules_route_ai_tasks_to_next_actions() {
    let router = TaskRouter::new(&[], "/data").unwrap();
    assert_eq!(router.rules().len(), 3);

    let task = issue("42").with_labels(["ai-task"]);
    let route = router.route(&task, "github");
    assert_eq!(route.destination, "next_actions.org");
    assert_eq!(route.tags, vec![":AI:".to_string()]);

    let local = router.external_to_local(&task, "github", "github:o/r#42");
    assert!(local.tags.contains(&":AI:".to_string()));
    assert_eq!(local.location.file, Path::new("next_actions.org"));
}

#[test]
fn test_default_rules_high_priority_forced_next() {
    let router = TaskRouter::new(&[], "/data").unwrap();
    let task = issue("7").with_labels(["priority-high"]);

    let local = router.external_to_local(&task, "github", "github:o/r#7");
    assert_eq!(local.state, TaskState::Next);
    assert_eq!(local.priority, Some(Priority::A));

    let plain = router.route(&issue("8"), "github");
    assert_eq!(plain.destination, "inbox.org");
    assert_eq!(plain.state, None);
}

#[test]
fn test_assignee_null_rule_beats_fallback() {
    let configs = vec![
        rule("github", "assignee == 'me'", "next_actions.org"),
        rule("*", "assignee is null", "triage.org"),
    ];
    let router = TaskRouter::new(&configs, "/data").unwrap();

    assert_eq!(router.route(&issue("1"), "github").destination, "triage.org");
    assert_eq!(
        router.route(&issue("2").with_assignee("me"), "github").destination,
        "next_actions.org"
    );
    // Source-restricted rule does not apply to other adapters.
    assert_eq!(
        router.route(&issue("3").with_assignee("me"), "calendar").destination,
        "inbox.org"
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = TaskRouter::new(&[rule("*", "labels ~= 'x'", "inbox.org")], "/data").unwrap_err();
    assert!(matches!(err, RouterError::InvalidCondition(_)));

    let mut forced = rule("*", "true", "inbox.org");
    forced.state = Some("SOMEDAY".into());
    let err = TaskRouter::new(&[forced], "/data").unwrap_err();
    assert!(matches!(err, RouterError::InvalidState { .. }));
}

#[test]
fn test_closed_remote_routes_as_done() {
    let mut forced = rule("*", "true", "inbox.org");
    forced.state = Some("WAITING".into());
    let router = TaskRouter::new(&[forced], "/data").unwrap();

    let mut task = issue("5");
    assert_eq!(router.external_to_local(&task, "github", "github:o/r#5").state, TaskState::Waiting);

    task.state = "closed".into();
    assert_eq!(router.external_to_local(&task, "github", "github:o/r#5").state, TaskState::Done);
}

#[test]
fn test_external_to_local_metadata() {
    let router = TaskRouter::new(&[], "/data").unwrap();
    let due = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
    let task = issue("42")
        .with_labels(["ai-research", "ai-task", "p2"])
        .with_body("Details")
        .with_due_date(due);

    let local = router.external_to_local(&task, "github", "github:o/r#42");
    assert_eq!(local.id, "github:42");
    assert_eq!(local.title, "Investigate flaky test");
    assert_eq!(local.body, "Details");
    assert_eq!(local.priority, Some(Priority::B));
    assert_eq!(local.deadline, Some(due.date_naive()));
    assert_eq!(local.tags, vec![":AI:".to_string(), ":AI:research:".to_string()]);

    assert!(local.is_linked());
    assert_eq!(local.sync.external_id.as_deref(), Some("github:o/r#42"));
    assert_eq!(local.sync.status, Some(SyncStatus::Synced));
    assert!(local.sync.last_synced.is_some());

    assert_eq!(local.properties["EXTERNAL_ID"], "github:o/r#42");
    assert_eq!(
        local.properties["EXTERNAL_URL"],
        "[[https://github.com/o/r/issues/42][o/r#42]]"
    );
    assert_eq!(local.properties["SYNC_STATUS"], "synced");
    assert!(local.properties.contains_key("CREATED"));
    assert!(local.properties.contains_key("SYNC_UPDATED"));
}

#[test]
fn test_ai_label_tags() {
    assert_eq!(ai_label_tag("ai-task").as_deref(), Some(":AI:"));
    assert_eq!(ai_label_tag("ai-content").as_deref(), Some(":AI:content:"));
    assert_eq!(ai_label_tag("ai-"), None);
    assert_eq!(ai_label_tag("bug"), None);
}

#[test]
fn test_destination_path() {
    let router = TaskRouter::new(&[], "/home/me/Data").unwrap();
    assert_eq!(
        router.destination_path("inbox.org", None),
        Path::new("/home/me/Data/0-personal/org/inbox.org")
    );
    assert_eq!(
        router.destination_path("next_actions.org", Some("1-team")),
        Path::new("/home/me/Data/1-team/org/next_actions.org")
    );
}

#[test]
fn test_rule_config_defaults_from_toml() {
    let config: RoutingRuleConfig = toml::from_str("condition = \"assignee is null\"").unwrap();
    assert_eq!(config.source, "*");
    assert_eq!(config.destination, "inbox.org");
    assert!(config.tags.is_empty());
}
