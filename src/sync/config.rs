use crate::adapter::AdapterSettings;
use crate::conflict::{ConflictCategory, ResolutionStrategy};
use crate::env;
use crate::router::{RouterError, RoutingRule, RoutingRuleConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid routing rule: {0}")]
    Routing(#[from] RouterError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Root of the outline spaces; state lives under `<data_dir>/.tasksync`.
    pub data_dir: PathBuf,
    pub database_path: Option<PathBuf>,
    pub outline_path: Option<PathBuf>,
    /// Target for brand-new items that carry no external reference.
    pub default_adapter: Option<String>,
    pub adapter_timeout_secs: u64,
    pub conflict_retention_days: u32,
    pub history_retention_days: u32,
    pub adapters: BTreeMap<String, AdapterSettings>,
    pub routing: Vec<RoutingRuleConfig>,
    pub conflict_resolution: BTreeMap<ConflictCategory, ResolutionStrategy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("."),
            database_path: None,
            outline_path: None,
            default_adapter: None,
            adapter_timeout_secs: DEFAULT_ADAPTER_TIMEOUT_SECS,
            conflict_retention_days: DEFAULT_RETENTION_DAYS,
            history_retention_days: DEFAULT_RETENTION_DAYS,
            adapters: BTreeMap::new(),
            routing: Vec::new(),
            conflict_resolution: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| env::database_file_path(&self.data_dir))
    }

    pub fn outline_path(&self) -> PathBuf {
        self.outline_path
            .clone()
            .unwrap_or_else(|| env::outline_file_path(&self.data_dir))
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Names of adapters with `enabled = true`.
    pub fn enabled_adapters(&self) -> Vec<&str> {
        self.adapters
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Reject settings that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "adapter_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(default) = &self.default_adapter
            && !self.adapters.contains_key(default)
        {
            return Err(ConfigError::Invalid(format!(
                "default_adapter '{}' has no [adapters.{}] section",
                default, default
            )));
        }
        for rule in &self.routing {
            RoutingRule::try_from(rule)?;
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
