//! In-process vault provider.
//!
//! Holds files and snapshots in memory and emits [`VaultChange`]s when they
//! are mutated through its API. Used by tests and by hosts that already own
//! the parsed vault. Fetch failures and fetch latency can be injected per
//! path.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::vault::error::ProviderError;
use crate::vault::provider::{link_graph_from, resolve_among, FileSystemProvider, LinkGraph, VaultChange};
use crate::vault::types::{FileHandle, MetadataSnapshot};

#[derive(Default)]
struct MemoryVault {
    files: BTreeMap<PathBuf, FileHandle>,
    snapshots: HashMap<PathBuf, MetadataSnapshot>,
    failing: HashSet<PathBuf>,
    delayed: HashMap<PathBuf, Duration>,
}

/// A [`FileSystemProvider`] whose files live in memory.
pub struct MemoryVaultProvider {
    vault: RwLock<MemoryVault>,
    changes: broadcast::Sender<VaultChange>,
}

impl Default for MemoryVaultProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVaultProvider {
    /// Create an empty vault with the default change buffer.
    pub fn new() -> Self {
        Self::with_buffer(256)
    }

    /// Create an empty vault with a change buffer of `buffer_size`.
    pub fn with_buffer(buffer_size: usize) -> Self {
        let (changes, _) = broadcast::channel(buffer_size);
        Self {
            vault: RwLock::new(MemoryVault::default()),
            changes,
        }
    }

    /// Add or replace a file without emitting a notification.
    pub fn seed(&self, path: impl Into<PathBuf>, snapshot: MetadataSnapshot) -> FileHandle {
        let file = FileHandle::new(path);
        let mut vault = self.vault.write();
        vault.files.insert(file.path().to_path_buf(), file.clone());
        vault.snapshots.insert(file.path().to_path_buf(), snapshot);
        file
    }

    /// List a file that has no extractable snapshot.
    pub fn seed_without_snapshot(&self, path: impl Into<PathBuf>) -> FileHandle {
        let file = FileHandle::new(path);
        let mut vault = self.vault.write();
        vault.files.insert(file.path().to_path_buf(), file.clone());
        vault.snapshots.remove(file.path());
        file
    }

    /// Make every snapshot fetch for `path` fail.
    pub fn fail_fetches(&self, path: impl Into<PathBuf>) {
        self.vault.write().failing.insert(path.into());
    }

    /// Delay the next snapshot fetch for `path`. The snapshot is read before
    /// the delay, so the caller receives what was current when it asked.
    pub fn delay_next_fetch(&self, path: impl Into<PathBuf>, delay: Duration) {
        self.vault.write().delayed.insert(path.into(), delay);
    }

    /// Add a file and emit `Created`.
    pub fn create(&self, path: impl Into<PathBuf>, snapshot: MetadataSnapshot) -> FileHandle {
        let file = self.seed(path, snapshot);
        self.emit(VaultChange::Created(file.clone()));
        file
    }

    /// Replace a file's snapshot and emit `Changed`.
    pub fn modify(&self, path: impl Into<PathBuf>, snapshot: MetadataSnapshot) -> FileHandle {
        let file = self.seed(path, snapshot.clone());
        self.emit(VaultChange::Changed {
            file: file.clone(),
            snapshot,
        });
        file
    }

    /// Remove a file and emit `Deleted`.
    pub fn delete(&self, path: &Path) -> Option<FileHandle> {
        let file = {
            let mut vault = self.vault.write();
            vault.snapshots.remove(path);
            vault.files.remove(path)
        }?;
        self.emit(VaultChange::Deleted(file.clone()));
        Some(file)
    }

    /// Move a file and emit `Renamed`.
    pub fn rename(&self, old_path: &Path, new_path: impl Into<PathBuf>) -> Option<FileHandle> {
        let file = FileHandle::new(new_path);
        {
            let mut vault = self.vault.write();
            vault.files.remove(old_path)?;
            let snapshot = vault.snapshots.remove(old_path).unwrap_or_default();
            vault.files.insert(file.path().to_path_buf(), file.clone());
            vault.snapshots.insert(file.path().to_path_buf(), snapshot);
        }
        self.emit(VaultChange::Renamed {
            file: file.clone(),
            old_path: old_path.to_path_buf(),
        });
        Some(file)
    }

    fn emit(&self, change: VaultChange) {
        if self.changes.send(change).is_err() {
            tracing::trace!("No subscribers for vault change");
        }
    }
}

#[async_trait]
impl FileSystemProvider for MemoryVaultProvider {
    async fn list_all_files(&self) -> Vec<FileHandle> {
        self.vault.read().files.values().cloned().collect()
    }

    async fn get_snapshot(
        &self,
        file: &FileHandle,
    ) -> Result<Option<MetadataSnapshot>, ProviderError> {
        let (snapshot, delay) = {
            let mut vault = self.vault.write();
            if vault.failing.contains(file.path()) {
                return Err(ProviderError::Io {
                    path: file.path().to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
                });
            }
            let delay = vault.delayed.remove(file.path());
            (vault.snapshots.get(file.path()).cloned(), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn resolve_link(&self, link_text: &str, source_path: &Path) -> Option<FileHandle> {
        resolve_among(&self.vault.read().files, link_text, source_path)
    }

    async fn resolved_link_graph(&self) -> LinkGraph {
        let vault = self.vault.read();
        link_graph_from(
            &vault.files,
            vault
                .snapshots
                .iter()
                .map(|(path, snapshot)| (path.as_path(), snapshot)),
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultChange> {
        self.changes.subscribe()
    }
}
