use crate::env::outline::{INBOX_FILE_NAME, NEXT_ACTIONS_FILE_NAME};
use crate::model::{RemoteTask, TaskState};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source value matching every adapter.
pub const ANY_SOURCE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("Invalid routing condition: {0}")]
    InvalidCondition(String),

    #[error("Invalid forced state '{state}' for destination {destination}")]
    InvalidState { state: String, destination: String },
}

/// Closed condition grammar for routing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `true`
    Always,
    /// `labels contains '<x>'`, case-insensitive exact label match
    LabelsContain(String),
    /// `assignee == '<x>'`, case-insensitive
    AssigneeIs(String),
    /// `assignee is null`
    AssigneeNull,
}

impl Condition {
    pub fn matches(&self, task: &RemoteTask) -> bool {
        match self {
            Condition::Always => true,
            Condition::LabelsContain(label) => {
                task.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
            }
            Condition::AssigneeIs(expected) => task
                .assignee
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(expected)),
            Condition::AssigneeNull => task.assignee.is_none(),
        }
    }
}

fn pattern(source: &str) -> Result<Regex, RouterError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .map_err(|e| RouterError::InvalidCondition(e.to_string()))
}

impl FromStr for Condition {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let condition = s.trim();

        if condition.eq_ignore_ascii_case("true") {
            return Ok(Condition::Always);
        }
        if pattern(r"^assignee\s+is\s+null$")?.is_match(condition) {
            return Ok(Condition::AssigneeNull);
        }
        if let Some(caps) = pattern(r#"^labels\s+contains\s+['"](.+)['"]$"#)?.captures(condition) {
            return Ok(Condition::LabelsContain(caps[1].to_string()));
        }
        if let Some(caps) = pattern(r#"^assignee\s*==\s*['"](.+)['"]$"#)?.captures(condition) {
            return Ok(Condition::AssigneeIs(caps[1].to_string()));
        }

        Err(RouterError::InvalidCondition(condition.to_string()))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => f.write_str("true"),
            Condition::LabelsContain(label) => write!(f, "labels contains '{}'", label),
            Condition::AssigneeIs(who) => write!(f, "assignee == '{}'", who),
            Condition::AssigneeNull => f.write_str("assignee is null"),
        }
    }
}

fn default_source() -> String {
    ANY_SOURCE.to_string()
}

fn default_condition() -> String {
    "true".to_string()
}

fn default_destination() -> String {
    INBOX_FILE_NAME.to_string()
}

/// Routing rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRuleConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// A parsed routing rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub source: String,
    pub condition: Condition,
    pub destination: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub state: Option<TaskState>,
}

impl RoutingRule {
    pub fn new(condition: Condition, destination: impl Into<String>) -> Self {
        Self {
            source: ANY_SOURCE.to_string(),
            condition,
            destination: destination.into(),
            tags: Vec::new(),
            category: None,
            state: None,
        }
    }

    pub fn applies_to(&self, adapter: &str) -> bool {
        self.source == ANY_SOURCE || self.source == adapter
    }

    /// Rules used when none are configured.
    pub fn defaults() -> Vec<RoutingRule> {
        vec![
            RoutingRule {
                tags: vec![":AI:".to_string()],
                ..RoutingRule::new(
                    Condition::LabelsContain("ai-task".to_string()),
                    NEXT_ACTIONS_FILE_NAME,
                )
            },
            RoutingRule {
                state: Some(TaskState::Next),
                ..RoutingRule::new(
                    Condition::LabelsContain("priority-high".to_string()),
                    NEXT_ACTIONS_FILE_NAME,
                )
            },
            RoutingRule::new(Condition::Always, INBOX_FILE_NAME),
        ]
    }
}

impl TryFrom<&RoutingRuleConfig> for RoutingRule {
    type Error = RouterError;

    fn try_from(config: &RoutingRuleConfig) -> Result<Self, Self::Error> {
        let state = config
            .state
            .as_deref()
            .map(|s| {
                s.parse::<TaskState>().map_err(|_| RouterError::InvalidState {
                    state: s.to_string(),
                    destination: config.destination.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            source: config.source.clone(),
            condition: config.condition.parse()?,
            destination: config.destination.clone(),
            tags: config.tags.clone(),
            category: config.category.clone(),
            state,
        })
    }
}

/// Placement chosen for a remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: String,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub state: Option<TaskState>,
}

impl Route {
    /// Fallback when no rule matches: unfiled, no tags.
    pub fn unfiled() -> Self {
        Self {
            destination: INBOX_FILE_NAME.to_string(),
            tags: Vec::new(),
            category: None,
            state: None,
        }
    }
}

impl From<&RoutingRule> for Route {
    fn from(rule: &RoutingRule) -> Self {
        Self {
            destination: rule.destination.clone(),
            tags: rule.tags.clone(),
            category: rule.category.clone(),
            state: rule.state,
        }
    }
}
