use std::collections::BTreeMap;
use tasksync::adapter::AdapterSettings;
use tasksync::conflict::{ConflictCategory, ResolutionStrategy};
use tasksync::router::RoutingRuleConfig;
use tasksync::sync::{ConfigError, SyncConfig};
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r#"
data_dir = "/home/user/Data"
default_adapter = "github"
adapter_timeout_secs = 45
conflict_retention_days = 14

[adapters.github]
repos = [{ owner = "acme", repo = "tracker" }]
command_timeout_secs = 20

[adapters.github.label_mapping]
":AI:" = "automation"

[adapters.calendar]
enabled = false
calendar_id = "team@example.com"

[[routing]]
source = "github"
condition = "labels contains 'bug'"
destination = "bugs.org"
tags = [":bug:"]

[[routing]]
condition = "assignee is null"
destination = "inbox.org"
state = "WAITING"

[conflict_resolution]
title = "ask"
state = "external_wins"
description = "org_wins"
"#;

fn custom_config() -> SyncConfig {
    let mut adapters = BTreeMap::new();
    adapters.insert(
        "github".to_string(),
        AdapterSettings::default().with("command_timeout_secs", 15),
    );
    adapters.insert(
        "calendar".to_string(),
        AdapterSettings::disabled().with("calendar_id", "primary"),
    );

    SyncConfig {
        data_dir: "/custom/data".into(),
        default_adapter: Some("github".to_string()),
        adapter_timeout_secs: 90,
        history_retention_days: 60,
        adapters,
        routing: vec![RoutingRuleConfig {
            source: "*".to_string(),
            condition: "labels contains 'ai-task'".to_string(),
            destination: "next_actions.org".to_string(),
            tags: vec![":AI:".to_string()],
            category: Some("AI".to_string()),
            state: None,
        }],
        conflict_resolution: BTreeMap::from([(ConflictCategory::Priority, ResolutionStrategy::Ask)]),
        ..SyncConfig::default()
    }
}

#[test]
fn test_full_config_parses() {
    let config = SyncConfig::from_toml_str(FULL_CONFIG).expect("Should parse full config");

    assert!(config.enabled, "enabled should default to true");
    assert_eq!(config.data_dir, std::path::PathBuf::from("/home/user/Data"));
    assert_eq!(config.adapter_timeout_secs, 45);
    assert_eq!(config.conflict_retention_days, 14);
    assert_eq!(config.history_retention_days, 30);
    assert_eq!(config.enabled_adapters(), vec!["github"]);
    assert_eq!(config.routing.len(), 2);
    assert_eq!(config.routing[1].source, "*");
    assert_eq!(
        config.conflict_resolution.get(&ConflictCategory::State),
        Some(&ResolutionStrategy::RemoteWins)
    );
    assert_eq!(
        config.conflict_resolution.get(&ConflictCategory::Description),
        Some(&ResolutionStrategy::LocalWins)
    );
    assert_eq!(
        config.database_path(),
        std::path::PathBuf::from("/home/user/Data/.tasksync/state/sync_history.db")
    );
    config.validate().expect("Full config should validate");
}

#[test]
fn test_config_serialization_roundtrip() {
    let original_config = custom_config();

    let toml_str = original_config
        .to_toml_string()
        .expect("Should be able to serialize config to TOML");
    assert!(!toml_str.is_empty(), "TOML string should not be empty");
    assert!(toml_str.contains("adapters.github"), "Should contain adapter section");
    assert!(toml_str.contains("[[routing]]"), "Should contain routing rules");
    assert!(toml_str.contains("[conflict_resolution]"), "Should contain strategies");

    let deserialized_config =
        SyncConfig::from_toml_str(&toml_str).expect("Should be able to deserialize TOML string");
    assert_eq!(original_config, deserialized_config);
}

#[test]
fn test_config_file_operations() {
    let original_config = custom_config();

    let temp_file = NamedTempFile::new().expect("Should be able to create temporary file");
    let temp_path = temp_file.path();

    original_config
        .to_toml_file(temp_path)
        .expect("Should be able to save config to file");
    let loaded_config =
        SyncConfig::from_toml_file(temp_path).expect("Should be able to load config from file");

    assert_eq!(original_config, loaded_config);
    assert_eq!(loaded_config.adapter_timeout().as_secs(), 90);
}

#[test]
fn test_config_error_handling() {
    let result = SyncConfig::from_toml_file("non_existent_file.toml");
    assert!(
        matches!(result, Err(ConfigError::Io { .. })),
        "Should fail when loading non-existent file"
    );

    let result = SyncConfig::from_toml_str("invalid toml content [[[");
    assert!(
        matches!(result, Err(ConfigError::Parse(_))),
        "Should fail when parsing invalid TOML"
    );

    let result = SyncConfig::from_toml_str("[conflict_resolution]\ntitle = \"coin_flip\"\n");
    assert!(result.is_err(), "Should reject unknown strategy names");
}

#[test]
fn test_config_validation() {
    let bad_rule = SyncConfig::from_toml_str(
        "[[routing]]\ncondition = \"title matches 'x'\"\ndestination = \"x.org\"\n",
    )
    .expect("Unparsed conditions are still valid TOML");
    assert!(matches!(bad_rule.validate(), Err(ConfigError::Routing(_))));

    let bad_state = SyncConfig::from_toml_str("[[routing]]\nstate = \"SOMEDAY\"\n").unwrap();
    assert!(matches!(bad_state.validate(), Err(ConfigError::Routing(_))));

    let zero_timeout = SyncConfig {
        adapter_timeout_secs: 0,
        ..SyncConfig::default()
    };
    assert!(matches!(zero_timeout.validate(), Err(ConfigError::Invalid(_))));

    let dangling_default = SyncConfig {
        default_adapter: Some("jira".to_string()),
        ..SyncConfig::default()
    };
    assert!(matches!(dangling_default.validate(), Err(ConfigError::Invalid(_))));
}
