//! # External Service Adapters
//!
//! Every external tracking service is reached through the [`SyncAdapter`]
//! trait. The orchestrator only ever sees `Arc<dyn SyncAdapter>` values held
//! in an explicit [`AdapterRegistry`]; there is no process-wide registration.
//!
//! ## Built-in adapters
//!
//! - **[`GitHubAdapter`]**: issues in one or more repositories, driven
//!   through the `gh` command-line tool via a [`CommandRunner`].
//! - **[`CalendarAdapter`]**: Google Calendar events over the v3 REST API
//!   with a bearer access token.
//!
//! ## Failure semantics
//!
//! Transport failures never escape an adapter. `pull_changes` returns the
//! partial result together with error strings in a [`PullOutcome`]; the
//! single-item operations report `false` / `None`; `push_changes` counts
//! failures per item in its [`SyncOutcome`](crate::model::SyncOutcome).
//! [`AdapterError`] is used inside adapters and for construction.

pub mod calendar;
pub mod command;
pub mod contract;
pub mod github;
pub mod registry;


pub use calendar::CalendarAdapter;
pub use command::{CommandOutput, CommandRunner, CommandSpec, HostRunner};
pub use contract::*;
pub use github::GitHubAdapter;
pub use registry::{AdapterFactory, AdapterRegistry, AdapterSettings};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Command-line tool not found: {0}")]
    CliMissing(String),

    #[error("Command failed ({code}): {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid external reference: {0}")]
    InvalidReference(String),

    #[error("Adapter not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid adapter settings: {0}")]
    InvalidSettings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Parse(e.to_string())
    }
}
