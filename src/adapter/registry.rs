use super::{AdapterError, CalendarAdapter, GitHubAdapter, SyncAdapter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-adapter configuration: an `enabled` flag plus an adapter-specific table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: toml::Table::new(),
        }
    }
}

impl AdapterSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize the adapter-specific table into a typed settings struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AdapterError> {
        toml::Value::Table(self.settings.clone())
            .try_into()
            .map_err(|e: toml::de::Error| AdapterError::InvalidSettings(e.to_string()))
    }
}

pub type AdapterFactory = fn(&AdapterSettings) -> Result<Arc<dyn SyncAdapter>, AdapterError>;

fn github_factory(settings: &AdapterSettings) -> Result<Arc<dyn SyncAdapter>, AdapterError> {
    Ok(Arc::new(GitHubAdapter::from_settings(settings)?))
}

fn calendar_factory(settings: &AdapterSettings) -> Result<Arc<dyn SyncAdapter>, AdapterError> {
    Ok(Arc::new(CalendarAdapter::from_settings(settings)?))
}

/// Explicit name → factory map handed to the orchestrator at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `github` and `calendar` adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GitHubAdapter::NAME, github_factory);
        registry.register(CalendarAdapter::NAME, calendar_factory);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(
        &self,
        name: &str,
        settings: &AdapterSettings,
    ) -> Result<Arc<dyn SyncAdapter>, AdapterError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AdapterError::NotConfigured(format!("no adapter named '{}'", name)))?;
        factory(settings)
    }

    /// Construct every enabled, constructible adapter; the rest are skipped.
    pub fn build_enabled(
        &self,
        configured: &BTreeMap<String, AdapterSettings>,
    ) -> BTreeMap<String, Arc<dyn SyncAdapter>> {
        let mut adapters = BTreeMap::new();
        for (name, settings) in configured {
            if !settings.enabled {
                debug!("Adapter {} disabled", name);
                continue;
            }
            match self.create(name, settings) {
                Ok(adapter) => {
                    debug!("Adapter {} ready (configured: {})", name, adapter.is_configured());
                    adapters.insert(name.clone(), adapter);
                }
                Err(e) => warn!("Skipping adapter {}: {}", name, e),
            }
        }
        adapters
    }
}
