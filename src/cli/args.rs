//! Command line argument parsing
//!
//! Subcommands:
//! - `sync`: Run one full bidirectional sync
//! - `pull`: Pull from every adapter and report, without touching the outline
//! - `diagnostic`: Adapter connectivity plus history and queue statistics
//! - `conflicts`: Inspect and resolve the review queue
//! - `history`: Recent pull/push runs
//! - `show-config`: Show configuration discovery information

use crate::conflict::ResolutionStrategy;
use crate::model::SyncDirection;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tasksync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bidirectional sync between outline tasks and external trackers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one full sync: pull, resolve, route, push
    Sync,
    /// Pull from every adapter and print what changed
    Pull {
        /// Only items updated after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Check adapter connectivity and store health
    Diagnostic,
    /// Manage conflicts waiting for review
    Conflicts {
        #[command(subcommand)]
        action: ConflictCommand,
    },
    /// Show recent sync history
    History {
        /// Look-back window in days
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Only runs against this adapter
        #[arg(long)]
        adapter: Option<String>,
        /// Only `pull` or `push` runs
        #[arg(long)]
        direction: Option<SyncDirection>,
        /// Maximum records to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show configuration discovery information
    ShowConfig,
}

#[derive(Debug, Subcommand)]
pub enum ConflictCommand {
    /// List unresolved conflicts, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Queue statistics
    Stats,
    /// Mark a conflict resolved
    Resolve {
        /// Conflict id as shown by `conflicts list`
        id: i64,
        /// local_wins, remote_wins, merge or ask
        #[arg(long)]
        strategy: ResolutionStrategy,
        /// Operator recorded as the resolver
        #[arg(long, default_value = "human")]
        by: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Purge resolved conflicts older than the retention window
    Cleanup {
        /// Defaults to `conflict_retention_days` from the configuration
        #[arg(long)]
        days: Option<u32>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "tasksync=debug"
        } else {
            "tasksync=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_arguments() {
        let args = Args::try_parse_from([
            "tasksync", "conflicts", "resolve", "12", "--strategy", "org_wins", "--by", "alex",
        ])
        .unwrap();

        match args.command {
            Some(Commands::Conflicts {
                action:
                    ConflictCommand::Resolve {
                        id,
                        strategy,
                        by,
                        notes,
                    },
            }) => {
                assert_eq!(id, 12);
                assert_eq!(strategy, ResolutionStrategy::LocalWins);
                assert_eq!(by, "alex");
                assert!(notes.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["tasksync", "sync", "-v", "-c", "/tmp/t.toml"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/t.toml")));
        assert_eq!(args.log_filter(), "tasksync=debug");
    }

    #[test]
    fn test_history_filters() {
        let args = Args::try_parse_from([
            "tasksync", "history", "--days", "3", "--direction", "push",
        ])
        .unwrap();
        match args.command {
            Some(Commands::History {
                days, direction, limit, ..
            }) => {
                assert_eq!(days, 3);
                assert_eq!(direction, Some(SyncDirection::Push));
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let result = Args::try_parse_from([
            "tasksync", "conflicts", "resolve", "1", "--strategy", "coin_flip",
        ]);
        assert!(result.is_err());
    }
}
