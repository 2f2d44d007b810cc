//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./tasksync.toml or ./.tasksync/config.toml
//! 2. User config: ~/.tasksync/config.toml
//! 3. System config: /etc/tasksync/config.toml
//! 4. Built-in defaults
//!
//! An override file next to the chosen one (`config.local.toml`, or
//! `tasksync.local.toml` for `tasksync.toml`) is merged over it table by
//! table, so tokens can stay out of a shared file. `TASKSYNC_DATA_DIR`
//! replaces `data_dir` last.

use crate::env;
use crate::sync::{ConfigError, SyncConfig};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, info};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<SyncConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return Self::load(&config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(Self::apply_env(SyncConfig::default()))
    }

    /// Load an explicit file, its override file, and environment overrides.
    pub fn load(path: &Path) -> Result<SyncConfig, ConfigError> {
        let mut table = read_table(path)?;

        let override_path = env::override_file_path(path);
        if override_path.is_file() {
            info!("Merging configuration overrides from: {:?}", override_path);
            merge_tables(&mut table, read_table(&override_path)?);
        }

        let config: SyncConfig = Value::Table(table).try_into()?;
        let config = Self::apply_env(config);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(mut config: SyncConfig) -> SyncConfig {
        if let Ok(data_dir) = std_env::var(env::DATA_DIR_ENV)
            && !data_dir.trim().is_empty()
        {
            debug!("{} overrides data_dir: {}", env::DATA_DIR_ENV, data_dir);
            config.data_dir = PathBuf::from(data_dir);
        }
        config
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = Self::get_config_candidates();

        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::STANDALONE_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/tasksync/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(
                PathBuf::from(program_data)
                    .join("tasksync")
                    .join(env::CONFIG_FILE_NAME),
            );
        }

        candidates
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => {
                println!("Active configuration: {:?}", found);
                let override_path = env::override_file_path(&found);
                if override_path.is_file() {
                    println!("Overrides merged from: {:?}", override_path);
                }
            }
            None => println!("Active configuration: Built-in defaults"),
        }
        if let Ok(data_dir) = std_env::var(env::DATA_DIR_ENV) {
            println!("{} = {}", env::DATA_DIR_ENV, data_dir);
        }
    }
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Nested tables merge key by key; any other value in `overlay` replaces.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const BASE: &str = r#"
data_dir = "/srv/tasks"
default_adapter = "github"

[adapters.github]
repos = [{ owner = "acme", repo = "tracker" }]

[adapters.calendar]
enabled = false
calendar_id = "team@example.com"
"#;

    #[test]
    fn test_config_candidates() {
        let candidates = ConfigDiscovery::get_config_candidates();

        assert!(!candidates.is_empty());
        assert!(candidates[0].file_name().unwrap() == "tasksync.toml");
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: Table = toml::from_str(BASE).unwrap();
        let overlay: Table = toml::from_str(
            r#"
[adapters.calendar]
enabled = true
access_token = "secret"
"#,
        )
        .unwrap();

        merge_tables(&mut base, overlay);
        let calendar = base["adapters"]["calendar"].as_table().unwrap();
        assert_eq!(calendar["enabled"].as_bool(), Some(true));
        assert_eq!(calendar["access_token"].as_str(), Some("secret"));
        assert_eq!(calendar["calendar_id"].as_str(), Some("team@example.com"));
        assert!(base["adapters"].get("github").is_some());
    }

    #[test]
    #[serial]
    fn test_load_merges_override_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasksync.toml");
        fs::write(&path, BASE).unwrap();
        fs::write(
            temp_dir.path().join("tasksync.local.toml"),
            "[adapters.calendar]\nenabled = true\naccess_token = \"secret\"\n",
        )
        .unwrap();

        let config = ConfigDiscovery::load(&path).unwrap();
        assert_eq!(config.enabled_adapters(), vec!["calendar", "github"]);
        assert_eq!(
            config.adapters["calendar"].get_str("access_token"),
            Some("secret")
        );
    }

    #[test]
    #[serial]
    fn test_data_dir_env_override() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasksync.toml");
        fs::write(&path, BASE).unwrap();

        unsafe { std_env::set_var(env::DATA_DIR_ENV, "/tmp/elsewhere") };
        let config = ConfigDiscovery::load(&path);
        unsafe { std_env::remove_var(env::DATA_DIR_ENV) };

        assert_eq!(config.unwrap().data_dir, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_configuration() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasksync.toml");
        fs::write(&path, "default_adapter = \"jira\"\n").unwrap();

        let err = ConfigDiscovery::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let missing = ConfigDiscovery::load(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
