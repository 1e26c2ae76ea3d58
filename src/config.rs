//! Runtime configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for the metadata cache and its providers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    /// Vault root directory (used by the local provider).
    pub root: PathBuf,
    /// Vault-relative folder whose files never produce domain events.
    pub template_folder: Option<PathBuf>,
    /// Debounce window for filesystem events.
    pub debounce_ms: u64,
    /// Polling interval when native watching is unavailable.
    pub poll_interval_ms: u64,
    /// Capacity of the raw-change and domain-event broadcast channels.
    pub event_buffer: usize,
    /// Parsed snapshots kept by the local provider.
    pub snapshot_cache_entries: usize,
    /// Frontmatter key holding the file type.
    pub type_field: String,
    /// Frontmatter key holding the status.
    pub status_field: String,
    /// Frontmatter key holding the sub-type.
    pub sub_type_field: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            template_folder: None,
            debounce_ms: 200,
            poll_interval_ms: 1000,
            event_buffer: 256,
            snapshot_cache_entries: 10_000,
            type_field: "type".to_string(),
            status_field: "status".to_string(),
            sub_type_field: "subType".to_string(),
        }
    }
}

impl VaultConfig {
    /// Start a builder rooted at `root`.
    pub fn builder(root: impl Into<PathBuf>) -> VaultConfigBuilder {
        VaultConfigBuilder::new(root)
    }

    /// Load from YAML; missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load from a YAML file on disk.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&raw)?)
    }
}

/// Builder for [`VaultConfig`] with sensible defaults.
pub struct VaultConfigBuilder {
    config: VaultConfig,
}

impl VaultConfigBuilder {
    /// Create a builder with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            config: VaultConfig {
                root: root.into(),
                ..Default::default()
            },
        }
    }

    /// Set the template folder.
    pub fn template_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.template_folder = Some(folder.into());
        self
    }

    /// Set the debounce window in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce_ms = ms;
        self
    }

    /// Set the polling fallback interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the broadcast channel capacity.
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.event_buffer = size;
        self
    }

    /// Set how many parsed snapshots the local provider keeps.
    pub fn snapshot_cache_entries(mut self, max: usize) -> Self {
        self.config.snapshot_cache_entries = max;
        self
    }

    /// Set the status frontmatter key.
    pub fn status_field(mut self, field: impl Into<String>) -> Self {
        self.config.status_field = field.into();
        self
    }

    /// Finish building.
    pub fn build(self) -> VaultConfig {
        self.config
    }
}
