//! Engine configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.meshsync/
//!   config.yaml   (optional — defaults apply when absent)
//! ```
//!
//! # API pattern
//!
//! - `load_at(home: &Path)` — explicit home; used in tests with `TempDir`
//! - `load()` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::registry::{CollectionDescriptor, CollectionRegistry};

pub const DEFAULT_DOMAIN_SUFFIX: &str = "cluster.local";
pub const DEFAULT_CLUSTER_ID: &str = "Kubernetes";
pub const DEFAULT_LEDGER_HISTORY: usize = 64;

/// Distribution-tracking (ledger) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub enabled: bool,
    /// Number of previous root states kept for `resource_at_version`.
    pub history_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_limit: DEFAULT_LEDGER_HISTORY,
        }
    }
}

/// Configurable attributes of the synchronization controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub domain_suffix: String,
    pub cluster_id: String,
    pub ledger: LedgerConfig,
    /// Extra collections appended to the built-in mesh collections.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<CollectionDescriptor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            ledger: LedgerConfig::default(),
            collections: vec![],
        }
    }
}

impl EngineConfig {
    pub fn with_domain_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.domain_suffix = suffix.into();
        self
    }

    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.collections.push(descriptor);
        self
    }

    /// Built-in mesh collections followed by the configured extras.
    pub fn registry(&self) -> CollectionRegistry {
        CollectionRegistry::new(
            CollectionRegistry::mesh_defaults()
                .iter()
                .cloned()
                .chain(self.collections.iter().cloned()),
        )
    }
}

/// `<home>/.meshsync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".meshsync").join("config.yaml")
}

/// Load the engine configuration rooted at `home`.
///
/// Returns defaults if the file does not exist, `CoreError::Parse` (with
/// path + line context) if it is malformed.
pub fn load_at(home: &Path) -> Result<EngineConfig, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<EngineConfig, CoreError> {
    load_at(&home()?)
}

/// Atomically save the configuration: `.yaml.tmp` sibling then `rename`.
pub fn save_at(home: &Path, config: &EngineConfig) -> Result<(), CoreError> {
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(config)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_file_missing() {
        let home = TempDir::new().expect("tempdir");
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.domain_suffix, "cluster.local");
        assert!(config.ledger.enabled);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "domain_suffix: mesh.example\nledger:\n  enabled: false\n").unwrap();

        let config = load_at(home.path()).expect("load");
        assert_eq!(config.domain_suffix, "mesh.example");
        assert_eq!(config.cluster_id, DEFAULT_CLUSTER_ID);
        assert!(!config.ledger.enabled);
        assert_eq!(config.ledger.history_limit, DEFAULT_LEDGER_HISTORY);
    }

    #[test]
    fn save_then_load_keeps_extra_collections() {
        let home = TempDir::new().expect("tempdir");
        let config = EngineConfig::default()
            .with_cluster_id("east")
            .with_collection(CollectionDescriptor::new("custom/widgets", "widget"));
        save_at(home.path(), &config).expect("save");

        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
        let registry = loaded.registry();
        assert!(registry.contains_type("widget"));
        assert!(registry.contains_type("gateway"));
        assert!(!config_path_at(home.path()).with_extension("yaml.tmp").exists());
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "ledger: [unclosed").unwrap();

        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}
