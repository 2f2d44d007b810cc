use anyhow::{Context, Result, bail};
use std::path::Path;
use tasksync::adapter::AdapterRegistry;
use tasksync::cli::{Args, Commands, ConfigDiscovery, ConflictCommand};
use tasksync::conflict::ConflictQueue;
use tasksync::history::SyncHistory;
use tasksync::model::SyncDirection;
use tasksync::sync::{SyncConfig, SyncEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = args.command else {
        return Ok(());
    };

    if let Commands::ShowConfig = command {
        ConfigDiscovery::show_discovery_info();
        let config = load_config(args.config.as_deref())?;
        println!();
        println!("Effective configuration:");
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;
    match command {
        Commands::Sync => run_sync(config).await,
        Commands::Pull { since } => run_pull(config, since).await,
        Commands::Diagnostic => run_diagnostic(config).await,
        Commands::Conflicts { action } => run_conflicts(&config, action),
        Commands::History {
            days,
            adapter,
            direction,
            limit,
        } => run_history(&config, days, adapter.as_deref(), direction, limit),
        Commands::ShowConfig => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            ConfigDiscovery::load(path)
        }
        None => ConfigDiscovery::discover_config(),
    };
    config.context("Failed to load configuration")
}

fn build_engine(config: SyncConfig) -> Result<SyncEngine> {
    let engine = SyncEngine::new(config, &AdapterRegistry::builtin())
        .context("Failed to initialize sync engine")?;
    if engine.adapter_names().is_empty() {
        warn!("No adapters enabled; check the [adapters] section of your configuration");
    }
    Ok(engine)
}

async fn run_sync(config: SyncConfig) -> Result<()> {
    let engine = build_engine(config)?;
    let report = engine.sync().await?;
    print!("{}", report);

    if let Err(e) = engine.cleanup() {
        warn!("Retention cleanup failed: {}", e);
    }
    if !report.persistence_errors.is_empty() {
        bail!(
            "{} conflict/history records could not be saved",
            report.persistence_errors.len()
        );
    }
    Ok(())
}

async fn run_pull(config: SyncConfig, since: Option<chrono::DateTime<chrono::Utc>>) -> Result<()> {
    let engine = build_engine(config)?;
    let report = engine.pull_all(since).await;

    for (name, pull) in &report.adapters {
        println!("{}: {} items in {} ms", name, pull.items, pull.duration_ms);
        for error in &pull.errors {
            println!("  error: {}", error);
        }
    }
    for change in &report.changes {
        let remote = change.remote.as_ref();
        println!(
            "  {:<13} {:<28} {}",
            change.kind.to_string(),
            change
                .remote_ref
                .as_ref()
                .map(|r| r.external_id.as_str())
                .unwrap_or("-"),
            remote.map(|r| r.title.as_str()).unwrap_or("")
        );
    }
    Ok(())
}

async fn run_diagnostic(config: SyncConfig) -> Result<()> {
    let engine = build_engine(config)?;
    let diagnostic = engine.diagnostic().await?;
    print!("{}", diagnostic);
    if !diagnostic.history.recent_errors.is_empty() {
        println!("Recent errors:");
        for error in &diagnostic.history.recent_errors {
            println!("  {}", error);
        }
    }
    Ok(())
}

fn run_conflicts(config: &SyncConfig, action: ConflictCommand) -> Result<()> {
    let queue = ConflictQueue::open(&config.database_path())
        .with_context(|| format!("Failed to open {:?}", config.database_path()))?;

    match action {
        ConflictCommand::List { limit } => {
            let conflicts = queue.get_unresolved(limit)?;
            if conflicts.is_empty() {
                println!("No conflicts waiting for review");
            }
            for conflict in conflicts {
                println!(
                    "#{} [{}] {}",
                    conflict.id.unwrap_or_default(),
                    conflict.detected_at.format("%Y-%m-%d %H:%M"),
                    conflict.summary()
                );
                for field in &conflict.fields {
                    println!(
                        "    {}: local={} remote={}",
                        field.field_name, field.local_value, field.remote_value
                    );
                }
                if let Some(notes) = &conflict.notes {
                    println!("    note: {}", notes);
                }
            }
        }
        ConflictCommand::Stats => {
            let stats = queue.get_stats()?;
            println!("Unresolved: {}", stats.unresolved_count);
            println!("Resolved today: {}", stats.resolved_today);
            for (category, count) in &stats.counts_by_category {
                println!("  {}: {}", category, count);
            }
            if let Some(oldest) = stats.oldest_unresolved {
                println!("Oldest unresolved: {}", oldest.format("%Y-%m-%d %H:%M"));
            }
        }
        ConflictCommand::Resolve {
            id,
            strategy,
            by,
            notes,
        } => {
            if !queue.resolve(id, strategy, &by, &notes)? {
                bail!("No conflict with id {}", id);
            }
            println!("Conflict #{} resolved with {}", id, strategy);
        }
        ConflictCommand::Cleanup { days } => {
            let days = days.unwrap_or(config.conflict_retention_days);
            let removed = queue.cleanup(days)?;
            println!("Removed {} resolved conflicts older than {} days", removed, days);
        }
    }
    Ok(())
}

fn run_history(
    config: &SyncConfig,
    days: u32,
    adapter: Option<&str>,
    direction: Option<SyncDirection>,
    limit: usize,
) -> Result<()> {
    let history = SyncHistory::open(&config.database_path())
        .with_context(|| format!("Failed to open {:?}", config.database_path()))?;

    let records = history.get_history(days, adapter, direction, limit)?;
    if records.is_empty() {
        println!("No sync runs in the last {} days", days);
    }
    for record in records {
        println!(
            "{} {:<4} {:<10} processed={} created={} updated={} failed={} ({} ms)",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.direction.as_str(),
            record.adapter,
            record.items_processed,
            record.items_created,
            record.items_updated,
            record.items_failed,
            record.duration_ms
        );
        for error in &record.errors {
            println!("    {}", error);
        }
    }
    Ok(())
}
