//! # Sync Orchestration
//!
//! [`SyncEngine`] ties the adapters, the conflict pipeline, the router and
//! the durable stores into one run:
//!
//! ```text
//!  adapters ──pull──▶ pair by external id ──▶ detect ──▶ resolve
//!                          │                               │
//!                          ▼                               ├─▶ outline writes
//!                    route new items                       ├─▶ review queue
//!                          │                               ▼
//!                          └──────────▶ outline ◀── push ◀─ adapters
//! ```
//!
//! Adapter calls run concurrently, each behind the configured timeout and in
//! its own task, so a slow, failing or panicking adapter only costs its own
//! results. Queue and history writes happen one record at a time from the
//! engine; no store lock is held across remote I/O.

pub mod config;
pub mod engine;
pub mod report;


pub use config::{ConfigError, SyncConfig};
pub use engine::{CleanupSummary, SyncEngine};
pub use report::{AdapterDiagnostic, AdapterPull, Diagnostic, PullReport, PushReport, SyncReport};

use crate::adapter::AdapterError;
use crate::outline::OutlineError;
use crate::router::RouterError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync is disabled in configuration")]
    Disabled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Outline error: {0}")]
    Outline(#[from] OutlineError),

    #[error("Routing error: {0}")]
    Router(#[from] RouterError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}
