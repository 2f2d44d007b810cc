//! CLI-specific functionality for tasksync
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ConflictCommand};
pub use config::ConfigDiscovery;
