//! # tasksync
//!
//! Bidirectional synchronization between a plain-text outline of tasks and
//! external tracking services (GitHub issues, Google Calendar events), with
//! field-level conflict detection, configurable resolution policies and a
//! durable queue of conflicts awaiting human review.
//!
//! ## Architecture Overview
//!
//! - **[`adapter`]**: The [`SyncAdapter`] contract and the built-in adapters
//! - **[`conflict`]**: Detection, resolution and the review queue
//! - **[`router`]**: Placement of newly discovered remote items in the outline
//! - **[`history`]**: Append-only run log plus per-adapter watermarks
//! - **[`outline`]**: The local, authoritative task store
//! - **[`sync`]**: The orchestrating [`SyncEngine`] and its configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tasksync::{AdapterRegistry, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::from_toml_file("tasksync.toml")?;
//!     let engine = SyncEngine::new(config, &AdapterRegistry::builtin())?;
//!
//!     let report = engine.sync().await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

/// External service adapters.
///
/// One [`SyncAdapter`] implementation per external system, constructed
/// through an explicit [`AdapterRegistry`].
pub mod adapter;

/// Conflict detection, resolution policy and the durable review queue.
pub mod conflict;

/// Environment constants and path utilities.
///
/// Centralizes all hardcoded paths and file names used throughout
/// the application for easier maintenance and consistency.
pub mod env;

/// Append-only sync history and watermark state.
pub mod history;

/// Core records shared by every component.
pub mod model;

/// Local outline store.
pub mod outline;

/// Routing rules for remote items seen for the first time.
pub mod router;

pub mod store;

/// Sync orchestration.
pub mod sync;

// CLI module for command-line interface
pub mod cli;

pub use adapter::{AdapterError, AdapterRegistry, AdapterSettings, SyncAdapter};
pub use conflict::{
    Conflict, ConflictCategory, ConflictDetector, ConflictQueue, ConflictResolver, Resolution,
    ResolutionStrategy,
};
pub use history::SyncHistory;
pub use model::{Change, ChangeKind, LocalTask, RemoteRef, RemoteTask, SyncOutcome, TaskState};
pub use outline::{JsonOutlineStore, OutlineStore};
pub use router::TaskRouter;
pub use sync::{SyncConfig, SyncEngine, SyncError, SyncReport};
