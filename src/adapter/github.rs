//! GitHub issues through the `gh` command-line tool.
//!
//! External ids have the form `github:<owner>/<repo>#<number>`. New issues go
//! to the first configured repository; pulls cover every repository, open and
//! recently closed issues alike.

use super::{AdapterError, AdapterSettings, CommandRunner, CommandSpec, HostRunner, PullOutcome, SyncAdapter};
use crate::model::{Change, ChangeKind, LocalTask, Priority, RemoteRef, RemoteTask};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_GH_PATH: &str = "gh";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const ISSUE_FIELDS: &str = "number,title,state,url,createdAt,updatedAt,body,labels,assignees";
const PULL_LIMIT: &str = "100";
const SEARCH_LIMIT: &str = "5";
const DEFAULT_ISSUE_BODY: &str = "Created from org-mode";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
}

impl RepoSpec {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubSettings {
    #[serde(default)]
    repos: Vec<RepoSpec>,
    /// Entries override the defaults key by key.
    #[serde(default)]
    label_mapping: BTreeMap<String, String>,
    #[serde(default = "default_gh_path")]
    gh_path: String,
    #[serde(default = "default_command_timeout_secs")]
    command_timeout_secs: u64,
}

fn default_gh_path() -> String {
    DEFAULT_GH_PATH.to_string()
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Outline tag → GitHub label.
pub fn default_label_mapping() -> BTreeMap<String, String> {
    [
        (":AI:", "ai-task"),
        (":AI:research:", "ai-research"),
        (":AI:content:", "ai-content"),
        (":AI:data:", "ai-data"),
        (":AI:pm:", "ai-pm"),
        (":AI:technical:", "ai-technical"),
        ("[#A]", "priority-high"),
        ("[#B]", "priority-medium"),
        ("[#C]", "priority-low"),
    ]
    .into_iter()
    .map(|(tag, label)| (tag.to_string(), label.to_string()))
    .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    url: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    assignees: Vec<GhUser>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhSearchHit {
    number: u64,
    title: String,
    #[serde(default)]
    url: String,
}

pub struct GitHubAdapter {
    repos: Vec<RepoSpec>,
    label_mapping: BTreeMap<String, String>,
    gh_path: String,
    command_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for GitHubAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubAdapter")
            .field("repos", &self.repos)
            .field("gh_path", &self.gh_path)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl GitHubAdapter {
    pub const NAME: &'static str = "github";

    pub fn new(repos: Vec<RepoSpec>) -> Self {
        Self {
            repos,
            label_mapping: default_label_mapping(),
            gh_path: DEFAULT_GH_PATH.to_string(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            runner: Arc::new(HostRunner::new()),
        }
    }

    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let parsed: GitHubSettings = settings.parse()?;
        let mut label_mapping = default_label_mapping();
        label_mapping.extend(parsed.label_mapping);

        Ok(Self {
            repos: parsed.repos,
            label_mapping,
            gh_path: parsed.gh_path,
            command_timeout: Duration::from_secs(parsed.command_timeout_secs),
            runner: Arc::new(HostRunner::new()),
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn repos(&self) -> &[RepoSpec] {
        &self.repos
    }

    pub fn label_mapping(&self) -> &BTreeMap<String, String> {
        &self.label_mapping
    }

    pub fn external_id(owner: &str, repo: &str, number: u64) -> String {
        format!("{}:{}/{}#{}", Self::NAME, owner, repo, number)
    }

    /// Split `github:<owner>/<repo>#<number>` into its parts.
    pub fn parse_external_id(external_id: &str) -> Result<(String, String, u64), AdapterError> {
        let pattern = Regex::new(r"^github:([^/]+)/([^#]+)#(\d+)$")
            .map_err(|e| AdapterError::Parse(e.to_string()))?;
        let invalid = || AdapterError::InvalidReference(external_id.to_string());

        let caps = pattern.captures(external_id).ok_or_else(invalid)?;
        let number = caps[3].parse::<u64>().map_err(|_| invalid())?;
        Ok((caps[1].to_string(), caps[2].to_string(), number))
    }

    /// Labels for a local task: mapped tags plus its priority label.
    pub fn labels_for(&self, task: &LocalTask) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for tag in &task.tags {
            let wrapped = format!(":{}:", tag.trim_matches(':'));
            let mapped = self
                .label_mapping
                .get(tag)
                .or_else(|| self.label_mapping.get(&wrapped));
            if let Some(label) = mapped
                && !labels.contains(label)
            {
                labels.push(label.clone());
            }
        }
        if let Some(priority) = task.priority {
            let label = self.map_priority_to_remote(priority);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }

    /// Issue body with the deadline carried as a bold prefix.
    ///
    /// Any prefix already present in the local body is replaced, not stacked.
    pub fn body_for(task: &LocalTask) -> String {
        let (_, body) = split_deadline(&task.body);
        match task.deadline {
            Some(deadline) => format!("**Deadline:** {}\n\n{}", deadline.format("%Y-%m-%d"), body),
            None => body.to_string(),
        }
    }

    /// Priority labels other than the one `task` carries. Empty without a priority.
    fn stale_priority_labels(&self, task: &LocalTask) -> Vec<String> {
        let Some(priority) = task.priority else {
            return Vec::new();
        };
        let current = self.map_priority_to_remote(priority);
        Priority::ALL
            .into_iter()
            .map(|p| self.map_priority_to_remote(p))
            .filter(|label| *label != current)
            .collect()
    }

    async fn run_gh(&self, args: Vec<String>) -> Result<String, AdapterError> {
        let cmd = CommandSpec::new(&self.gh_path, args).with_timeout(self.command_timeout);
        let output = self.runner.run(cmd).await?;
        if !output.success() {
            return Err(AdapterError::CommandFailed {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    pub(crate) fn issue_to_remote(issue: GhIssue, repo: &RepoSpec) -> RemoteTask {
        let mut task = RemoteTask::new(
            format!("{}#{}", repo.slug(), issue.number),
            issue.title,
            issue.state.to_lowercase(),
        );
        task.url = Some(issue.url).filter(|u| !u.is_empty());
        task.created_at = issue.created_at;
        task.updated_at = issue.updated_at;
        let body = issue.body.unwrap_or_default();
        let (deadline, text) = split_deadline(&body);
        task.due_date = deadline.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
        task.body = text.to_string();
        task.labels = issue.labels.into_iter().map(|l| l.name).collect();
        task.assignee = issue.assignees.into_iter().next().map(|u| u.login);
        task.payload = serde_json::json!({
            "owner": repo.owner,
            "repo": repo.repo,
            "number": issue.number,
        });
        task
    }

    async fn list_issues(&self, repo: &RepoSpec, state: &str) -> Result<Vec<RemoteTask>, AdapterError> {
        let stdout = self
            .run_gh(args([
                "issue", "list", "-R", &repo.slug(), "--json", ISSUE_FIELDS, "--limit", PULL_LIMIT,
                "--state", state,
            ]))
            .await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let issues: Vec<GhIssue> = serde_json::from_str(&stdout)?;
        Ok(issues
            .into_iter()
            .map(|issue| Self::issue_to_remote(issue, repo))
            .collect())
    }

    pub async fn get_issue(&self, repo: &RepoSpec, number: u64) -> Option<RemoteTask> {
        let stdout = self
            .run_gh(args([
                "issue", "view", &number.to_string(), "-R", &repo.slug(), "--json", ISSUE_FIELDS,
            ]))
            .await
            .map_err(|e| warn!("gh issue view {}#{} failed: {}", repo.slug(), number, e))
            .ok()?;
        let issue: GhIssue = serde_json::from_str(&stdout)
            .map_err(|e| warn!("Unparseable issue {}#{}: {}", repo.slug(), number, e))
            .ok()?;
        Some(Self::issue_to_remote(issue, repo))
    }

    /// Open issues that have at least one comment, across all repos.
    pub async fn open_comments_count(&self) -> usize {
        let mut total = 0;
        for repo in &self.repos {
            let result = self
                .run_gh(args([
                    "issue", "list", "-R", &repo.slug(), "--json", "number,comments", "--state",
                    "open",
                ]))
                .await;
            let Ok(stdout) = result else { continue };
            let Ok(issues) = serde_json::from_str::<Vec<serde_json::Value>>(&stdout) else {
                continue;
            };
            total += issues
                .iter()
                .filter(|issue| match issue.get("comments") {
                    Some(serde_json::Value::Array(items)) => !items.is_empty(),
                    Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0) > 0,
                    _ => false,
                })
                .count();
        }
        total
    }

    async fn set_issue_state(&self, remote: &RemoteRef, verb: &str) -> bool {
        let (owner, repo, number) = match Self::parse_external_id(&remote.external_id) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Cannot {} {}: {}", verb, remote, e);
                return false;
            }
        };
        match self
            .run_gh(args([
                "issue", verb, &number.to_string(), "-R", &format!("{}/{}", owner, repo),
            ]))
            .await
        {
            Ok(_) => {
                info!("gh issue {} {}: ok", verb, remote);
                true
            }
            Err(e) => {
                warn!("gh issue {} {} failed: {}", verb, remote, e);
                false
            }
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Split a leading `**Deadline:** YYYY-MM-DD` paragraph off an issue body.
///
/// Repeated prefixes collapse; the first date is kept.
fn split_deadline(body: &str) -> (Option<NaiveDate>, &str) {
    let Ok(pattern) = Regex::new(r"^\*\*Deadline:\*\* (\d{4}-\d{2}-\d{2})(?:\r?\n\r?\n|\s*$)") else {
        return (None, body);
    };
    let mut deadline = None;
    let mut rest = body;
    while let Some(caps) = pattern.captures(rest) {
        let Ok(date) = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") else {
            break;
        };
        deadline.get_or_insert(date);
        rest = &rest[caps[0].len()..];
    }
    (deadline, rest)
}

fn issue_number_from_url(url: &str) -> Option<u64> {
    let pattern = Regex::new(r"/issues/(\d+)").ok()?;
    pattern.captures(url)?[1].parse().ok()
}

#[async_trait]
impl SyncAdapter for GitHubAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_configured(&self) -> bool {
        !self.repos.is_empty()
    }

    async fn test_connection(&self) -> (bool, String) {
        if !self.runner.is_available(&self.gh_path) {
            return (false, "GitHub CLI (gh) not installed".to_string());
        }
        let cmd = CommandSpec::new(&self.gh_path, ["auth", "status"]).with_timeout(AUTH_CHECK_TIMEOUT);
        match self.runner.run(cmd).await {
            Ok(output) if output.success() => (true, "GitHub CLI authenticated".to_string()),
            Ok(output) => (
                false,
                format!("GitHub CLI not authenticated: {}", output.stderr.trim()),
            ),
            Err(AdapterError::Timeout(_)) => (false, "GitHub CLI timeout".to_string()),
            Err(AdapterError::CliMissing(_)) => (false, "GitHub CLI (gh) not installed".to_string()),
            Err(e) => (false, e.to_string()),
        }
    }

    async fn pull_changes(&self, since: Option<DateTime<Utc>>) -> PullOutcome {
        let start = Instant::now();
        let mut outcome = PullOutcome::default();

        for repo in &self.repos {
            for (state, kind) in [("open", ChangeKind::Updated), ("closed", ChangeKind::Closed)] {
                let issues = match self.list_issues(repo, state).await {
                    Ok(issues) => issues,
                    Err(e) => {
                        warn!("Failed to list {} issues in {}: {}", state, repo.slug(), e);
                        outcome.add_error(format!("{} ({} issues): {}", repo.slug(), state, e));
                        continue;
                    }
                };

                for issue in issues {
                    let updated = issue.updated_at;
                    if let (Some(since), Some(updated)) = (since, updated)
                        && updated <= since
                    {
                        continue;
                    }
                    let remote = RemoteRef::new(Self::NAME, &issue.id, issue.url.clone());
                    let mut change = Change::new(kind).with_ref(remote);
                    if let Some(updated) = updated {
                        change.timestamp = updated;
                    }
                    if kind == ChangeKind::Closed {
                        change.new_state = Some("closed".to_string());
                    }
                    outcome.changes.push(change.with_remote(issue));
                }
            }
        }

        info!(
            "Pulled {} GitHub changes from {} repos in {:.2}s",
            outcome.changes.len(),
            self.repos.len(),
            start.elapsed().as_secs_f64()
        );
        outcome
    }

    async fn create_task(&self, task: &LocalTask) -> Option<RemoteRef> {
        let Some(repo) = self.repos.first() else {
            warn!("No GitHub repository configured; cannot create '{}'", task.title);
            return None;
        };

        let body = Self::body_for(task);
        let body = if body.trim().is_empty() {
            DEFAULT_ISSUE_BODY.to_string()
        } else {
            body
        };
        let mut cmd = args(["issue", "create", "-R", &repo.slug(), "--title", &task.title, "--body", &body]);
        let labels = self.labels_for(task);
        if !labels.is_empty() {
            cmd.push("--label".to_string());
            cmd.push(labels.join(","));
        }

        let stdout = self
            .run_gh(cmd)
            .await
            .map_err(|e| warn!("gh issue create for '{}' failed: {}", task.title, e))
            .ok()?;
        let url = stdout.trim().to_string();
        let Some(number) = issue_number_from_url(&url) else {
            warn!("Could not read issue number from gh output: {:?}", url);
            return None;
        };

        info!("Created GitHub issue {}#{} for '{}'", repo.slug(), number, task.title);
        Some(RemoteRef::new(
            Self::NAME,
            &format!("{}#{}", repo.slug(), number),
            Some(url),
        ))
    }

    async fn update_task(&self, remote: &RemoteRef, task: &LocalTask) -> bool {
        let (owner, repo, number) = match Self::parse_external_id(&remote.external_id) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Cannot update {}: {}", remote, e);
                return false;
            }
        };
        let slug = format!("{}/{}", owner, repo);
        let number = number.to_string();

        let mut cmd = args(["issue", "edit", &number, "-R", &slug, "--title", &task.title]);
        let body = Self::body_for(task);
        if !body.is_empty() {
            cmd.push("--body".to_string());
            cmd.push(body);
        }
        if let Err(e) = self.run_gh(cmd).await {
            warn!("gh issue edit {} failed: {}", remote, e);
            return false;
        }

        // Labels go in a second call; `--add-label` never drops existing ones,
        // so the other priority labels are removed explicitly.
        let labels = self.labels_for(task);
        if !labels.is_empty() {
            let mut cmd = args(["issue", "edit", &number, "-R", &slug, "--add-label", &labels.join(",")]);
            let stale = self.stale_priority_labels(task);
            if !stale.is_empty() {
                cmd.push("--remove-label".to_string());
                cmd.push(stale.join(","));
            }
            if let Err(e) = self.run_gh(cmd).await {
                warn!("Failed to label {}: {}", remote, e);
            }
        }

        debug!("Updated GitHub issue {}", remote);
        true
    }

    async fn close_task(&self, remote: &RemoteRef) -> bool {
        self.set_issue_state(remote, "close").await
    }

    async fn reopen_task(&self, remote: &RemoteRef) -> bool {
        self.set_issue_state(remote, "reopen").await
    }

    async fn find_matching_task(&self, task: &LocalTask) -> Option<RemoteRef> {
        let wanted = task.title.to_lowercase();
        let query = format!("\"{}\" in:title", task.title.replace('"', "\\\""));

        for repo in &self.repos {
            let result = self
                .run_gh(args([
                    "issue", "list", "-R", &repo.slug(), "--search", &query, "--json",
                    "number,title,url", "--limit", SEARCH_LIMIT,
                ]))
                .await;
            let stdout = match result {
                Ok(stdout) => stdout,
                Err(e) => {
                    debug!("Issue search in {} failed: {}", repo.slug(), e);
                    continue;
                }
            };
            let Ok(hits) = serde_json::from_str::<Vec<GhSearchHit>>(&stdout) else {
                continue;
            };
            if let Some(hit) = hits.into_iter().find(|h| h.title.to_lowercase() == wanted) {
                let url = Some(hit.url).filter(|u| !u.is_empty());
                return Some(RemoteRef::new(
                    Self::NAME,
                    &format!("{}#{}", repo.slug(), hit.number),
                    url,
                ));
            }
        }
        None
    }
}
