//! Google Calendar events over the v3 REST API.
//!
//! Events inside the look-ahead window are pulled as remote tasks; a
//! `cancelled` event reads as closed. Local tasks need a deadline (or a
//! scheduled date) to become all-day events. Closing a task deletes its
//! event. External ids are `calendar:<calendarId>/<eventId>`.

use super::{AdapterError, AdapterSettings, PullOutcome, SyncAdapter};
use crate::model::{Change, ChangeKind, LocalTask, Priority, RemoteRef, RemoteTask};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const DEFAULT_CALENDAR_ID: &str = "primary";
const DEFAULT_TOKEN_ENV: &str = "GOOGLE_CALENDAR_TOKEN";
const DEFAULT_LOOKAHEAD_DAYS: i64 = 14;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const PULL_LIMIT: &str = "100";
const SEARCH_LIMIT: &str = "10";
const CANCELLED: &str = "cancelled";
const PRIORITY_PROPERTY: &str = "priority";

#[derive(Debug, Clone, Deserialize)]
struct CalendarSettings {
    #[serde(default = "default_calendar_id")]
    calendar_id: String,
    access_token: Option<String>,
    #[serde(default = "default_token_env")]
    access_token_env: String,
    #[serde(default = "default_api_base")]
    api_base: String,
    #[serde(default = "default_lookahead_days")]
    lookahead_days: i64,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
}

fn default_calendar_id() -> String {
    DEFAULT_CALENDAR_ID.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_lookahead_days() -> i64 {
    DEFAULT_LOOKAHEAD_DAYS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Event {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    status: Option<String>,
    html_link: Option<String>,
    created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    start: Option<EventTime>,
    location: Option<String>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    recurring_event_id: Option<String>,
    extended_properties: Option<ExtendedProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date: Option<NaiveDate>,
    date_time: Option<DateTime<FixedOffset>>,
}

impl EventTime {
    /// Calendar day of the start, read in the event's own offset.
    fn day(&self) -> Option<NaiveDate> {
        self.date_time.map(|at| at.date_naive()).or(self.date)
    }
}

/// Only the private (per-calendar) key space is read.
#[derive(Debug, Default, Deserialize)]
struct ExtendedProperties {
    #[serde(default)]
    private: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Attendee {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct CalendarInfo {
    summary: Option<String>,
}

#[derive(Debug)]
pub struct CalendarAdapter {
    calendar_id: String,
    access_token: Option<String>,
    api_base: String,
    lookahead: ChronoDuration,
    client: reqwest::Client,
}

impl CalendarAdapter {
    pub const NAME: &'static str = "calendar";

    pub fn new(calendar_id: impl Into<String>, access_token: Option<String>) -> Result<Self, AdapterError> {
        Self::build(
            calendar_id.into(),
            access_token,
            DEFAULT_API_BASE.to_string(),
            DEFAULT_LOOKAHEAD_DAYS,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )
    }

    /// Token comes from `access_token`, else from the variable named by
    /// `access_token_env`.
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let parsed: CalendarSettings = settings.parse()?;
        let token = parsed
            .access_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(&parsed.access_token_env).ok())
            .filter(|t| !t.trim().is_empty());

        Self::build(
            parsed.calendar_id,
            token,
            parsed.api_base,
            parsed.lookahead_days,
            parsed.request_timeout_secs,
        )
    }

    fn build(
        calendar_id: String,
        access_token: Option<String>,
        api_base: String,
        lookahead_days: i64,
        timeout_secs: u64,
    ) -> Result<Self, AdapterError> {
        Url::parse(&api_base).map_err(|e| AdapterError::InvalidSettings(format!("api_base: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            calendar_id,
            access_token,
            api_base,
            lookahead: ChronoDuration::days(lookahead_days),
            client,
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Adapter-scoped id: `<calendarId>/<eventId>`.
    pub fn scoped_id(&self, event_id: &str) -> String {
        format!("{}/{}", self.calendar_id, event_id)
    }

    /// Event id is the last path segment of the external id.
    pub fn event_id(remote: &RemoteRef) -> Result<&str, AdapterError> {
        remote
            .opaque_id()
            .rsplit_once('/')
            .map(|(_, event)| event)
            .filter(|event| !event.is_empty())
            .ok_or_else(|| AdapterError::InvalidReference(remote.external_id.clone()))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AdapterError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| AdapterError::InvalidSettings(format!("api_base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AdapterError::InvalidSettings(format!("api_base: {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn events_endpoint(&self, event_id: Option<&str>) -> Result<Url, AdapterError> {
        match event_id {
            Some(id) => self.endpoint(&["calendars", &self.calendar_id, "events", id]),
            None => self.endpoint(&["calendars", &self.calendar_id, "events"]),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AdapterError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| AdapterError::NotConfigured("no calendar access token".to_string()))?;

        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Auth(format!("{}: {}", status, body.trim())));
        }
        Ok(response.error_for_status()?)
    }

    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        search: Option<&str>,
        limit: &str,
    ) -> Result<Vec<Event>, AdapterError> {
        let mut query = vec![
            ("timeMin", rfc3339(time_min)),
            ("timeMax", rfc3339(time_max)),
            ("maxResults", limit.to_string()),
            ("singleEvents", "true".to_string()),
        ];
        match search {
            Some(q) => query.push(("q", q.to_string())),
            None => query.push(("orderBy", "startTime".to_string())),
        }

        let url = self.events_endpoint(None)?;
        let response = self.send(self.client.get(url).query(&query)).await?;
        let list: EventList = response.json().await?;
        Ok(list.items)
    }

    pub(crate) fn event_to_remote(&self, event: Event) -> RemoteTask {
        let status = event.status.unwrap_or_else(|| "confirmed".to_string());
        let state = if status == CANCELLED { "closed" } else { "open" };
        let all_day = event
            .start
            .as_ref()
            .is_some_and(|s| s.date_time.is_none() && s.date.is_some());

        let mut task = RemoteTask::new(
            self.scoped_id(&event.id),
            event.summary.unwrap_or_else(|| "Untitled".to_string()),
            state,
        );
        task.url = event.html_link;
        task.created_at = event.created;
        task.updated_at = event.updated;
        task.body = event.description.unwrap_or_default();
        task.due_date = event
            .start
            .as_ref()
            .and_then(EventTime::day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
        if let Some(priority) = event
            .extended_properties
            .as_ref()
            .and_then(|props| props.private.get(PRIORITY_PROPERTY))
            .and_then(|value| Priority::from_label(value))
        {
            task.labels.push(priority.to_label().to_string());
        }
        task.payload = json!({
            "calendar_id": self.calendar_id,
            "status": status,
            "location": event.location,
            "attendees": event.attendees.into_iter().map(|a| a.email).collect::<Vec<_>>(),
            "recurring": event.recurring_event_id.is_some(),
            "all_day": all_day,
            "start": event.start.as_ref().and_then(|s| s.date_time).map(|at| at.to_rfc3339()),
        });
        task
    }

    /// All-day event body for a task; `None` when the task has no date.
    pub fn event_body(task: &LocalTask) -> Option<serde_json::Value> {
        let day = task.deadline.or(task.scheduled)?;
        let next = day.succ_opt()?;
        Some(json!({
            "summary": task.title,
            "description": task.body,
            "start": { "date": day.format("%Y-%m-%d").to_string() },
            "end": { "date": next.format("%Y-%m-%d").to_string() },
            "extendedProperties": priority_properties(task),
        }))
    }
}

/// Priority travels as a private extended property; an empty value clears it.
fn priority_properties(task: &LocalTask) -> serde_json::Value {
    let label = task.priority.map(Priority::to_label).unwrap_or_default();
    json!({ "private": { PRIORITY_PROPERTY: label } })
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl SyncAdapter for CalendarAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    async fn test_connection(&self) -> (bool, String) {
        let url = match self.endpoint(&["calendars", &self.calendar_id]) {
            Ok(url) => url,
            Err(e) => return (false, e.to_string()),
        };
        let info = match self.send(self.client.get(url)).await {
            Ok(response) => response.json::<CalendarInfo>().await,
            Err(e) => return (false, e.to_string()),
        };
        match info {
            Ok(info) => (
                true,
                format!(
                    "Connected to: {}",
                    info.summary.as_deref().unwrap_or(&self.calendar_id)
                ),
            ),
            Err(e) => (false, format!("Unexpected calendar response: {}", e)),
        }
    }

    async fn pull_changes(&self, since: Option<DateTime<Utc>>) -> PullOutcome {
        let start = Instant::now();
        let now = Utc::now();

        let events = match self.list_events(now, now + self.lookahead, None, PULL_LIMIT).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Error pulling calendar events: {}", e);
                return PullOutcome::failed(format!("calendar {}: {}", self.calendar_id, e));
            }
        };

        let mut changes = Vec::new();
        for event in events {
            let task = self.event_to_remote(event);
            if let (Some(since), Some(updated)) = (since, task.updated_at)
                && updated <= since
            {
                continue;
            }
            let kind = if task.is_closed() {
                ChangeKind::Closed
            } else {
                ChangeKind::Updated
            };
            let mut change = Change::new(kind).with_ref(RemoteRef::new(Self::NAME, &task.id, task.url.clone()));
            if let Some(updated) = task.updated_at {
                change.timestamp = updated;
            }
            changes.push(change.with_remote(task));
        }

        info!(
            "Pulled {} calendar events in {:.2}s",
            changes.len(),
            start.elapsed().as_secs_f64()
        );
        PullOutcome::new(changes)
    }

    async fn create_task(&self, task: &LocalTask) -> Option<RemoteRef> {
        let Some(body) = Self::event_body(task) else {
            debug!("'{}' has no date; not creating a calendar event", task.title);
            return None;
        };
        let result = async {
            let url = self.events_endpoint(None)?;
            let response = self.send(self.client.post(url).json(&body)).await?;
            let event: Event = response.json().await?;
            Ok::<_, AdapterError>(event)
        }
        .await;

        match result {
            Ok(event) => {
                info!("Created calendar event {} for '{}'", event.id, task.title);
                Some(RemoteRef::new(
                    Self::NAME,
                    &self.scoped_id(&event.id),
                    event.html_link,
                ))
            }
            Err(e) => {
                warn!("Error creating calendar event: {}", e);
                None
            }
        }
    }

    async fn update_task(&self, remote: &RemoteRef, task: &LocalTask) -> bool {
        let body = Self::event_body(task).unwrap_or_else(|| {
            json!({
                "summary": task.title,
                "description": task.body,
                "extendedProperties": priority_properties(task),
            })
        });
        let result = async {
            let url = self.events_endpoint(Some(Self::event_id(remote)?))?;
            self.send(self.client.patch(url).json(&body)).await
        }
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Error updating calendar event {}: {}", remote, e);
                false
            }
        }
    }

    async fn close_task(&self, remote: &RemoteRef) -> bool {
        let result = async {
            let url = self.events_endpoint(Some(Self::event_id(remote)?))?;
            self.send(self.client.delete(url)).await
        }
        .await;

        match result {
            Ok(_) => {
                info!("Deleted calendar event {}", remote);
                true
            }
            Err(e) => {
                warn!("Error deleting calendar event {}: {}", remote, e);
                false
            }
        }
    }

    async fn find_matching_task(&self, task: &LocalTask) -> Option<RemoteRef> {
        let day = task.deadline.or(task.scheduled)?;
        let midnight = day.and_hms_opt(0, 0, 0)?.and_utc();
        let wanted = task.title.to_lowercase();

        let events = self
            .list_events(
                midnight - ChronoDuration::days(1),
                midnight + ChronoDuration::days(2),
                Some(&task.title),
                SEARCH_LIMIT,
            )
            .await
            .map_err(|e| warn!("Error searching calendar: {}", e))
            .ok()?;

        events
            .into_iter()
            .find(|event| event.summary.as_deref().map(str::to_lowercase) == Some(wanted.clone()))
            .map(|event| {
                RemoteRef::new(
                    Self::NAME,
                    &self.scoped_id(&event.id),
                    event.html_link,
                )
            })
    }
}
