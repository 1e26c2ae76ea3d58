//! Directory-backed vault provider.
//!
//! Indexes every markdown file under a root directory (hidden directories
//! are skipped), parses snapshots on demand through a bounded
//! [`SnapshotCache`], and turns debounced watcher batches into
//! [`VaultChange`] notifications. Paths handed out are relative to the root.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::config::VaultConfig;
use crate::vault::error::ProviderError;
use crate::vault::parser::parse_snapshot;
use crate::vault::provider::{link_graph_from, resolve_among, FileSystemProvider, LinkGraph, VaultChange};
use crate::vault::snapshot_cache::{FileStamp, SnapshotCache};
use crate::vault::types::{FileHandle, MetadataSnapshot};
use crate::vault::watcher::{FileChangeEvent, FileChangeKind};

/// A [`FileSystemProvider`] over a directory of markdown files.
pub struct LocalVaultProvider {
    root: PathBuf,
    files: RwLock<BTreeMap<PathBuf, FileHandle>>,
    cache: Mutex<SnapshotCache>,
    changes: broadcast::Sender<VaultChange>,
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
}

fn io_error(path: &Path, source: std::io::Error) -> ProviderError {
    ProviderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl LocalVaultProvider {
    /// Open the vault at `config.root` and index its files.
    pub async fn open(config: &VaultConfig) -> Result<Self, ProviderError> {
        let root = tokio::fs::canonicalize(&config.root)
            .await
            .map_err(|e| io_error(&config.root, e))?;
        let (changes, _) = broadcast::channel(config.event_buffer.max(1));
        let provider = Self {
            root,
            files: RwLock::new(BTreeMap::new()),
            cache: Mutex::new(SnapshotCache::new(config.snapshot_cache_entries)),
            changes,
        };
        provider.rescan().await?;
        Ok(provider)
    }

    /// The canonical vault root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-index the root directory. Returns the number of files found.
    pub async fn rescan(&self) -> Result<usize, ProviderError> {
        let found = Self::scan_directory(&self.root, &self.root).await?;
        let count = found.len();
        *self.files.write() = found
            .into_iter()
            .map(|path| (path.clone(), FileHandle::new(path)))
            .collect();
        tracing::debug!(root = %self.root.display(), files = count, "Vault scanned");
        Ok(count)
    }

    /// Markdown files under `dir`, relative to `root`.
    async fn scan_directory(root: &Path, dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        let mut paths = Vec::new();
        let mut stack = vec![dir.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == root => return Err(io_error(&dir, e)),
                Err(e) => {
                    tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let path = entry.path();
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        tracing::warn!("Failed to stat {}: {}", path.display(), e);
                        continue;
                    }
                };
                if file_type.is_dir() {
                    stack.push(path);
                } else if is_markdown(&path) {
                    if let Ok(relative) = path.strip_prefix(root) {
                        paths.push(relative.to_path_buf());
                    }
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Vault-relative form of an absolute watcher path, unless it is outside
    /// the root or hidden.
    fn relative(&self, absolute: &Path) -> Option<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() || is_hidden(relative) {
            return None;
        }
        Some(relative.to_path_buf())
    }

    /// Known files at or under `relative`.
    fn files_under(&self, relative: &Path) -> Vec<FileHandle> {
        self.files
            .read()
            .values()
            .filter(|file| file.path().starts_with(relative))
            .cloned()
            .collect()
    }

    fn emit(&self, change: VaultChange) {
        tracing::trace!(path = %change.path().display(), "Vault change");
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Translate a debounced watcher batch into vault changes and publish
    /// them. Returns the number of changes emitted.
    pub async fn apply_batch(&self, events: Vec<FileChangeEvent>) -> usize {
        let mut emitted = 0;
        for event in events {
            emitted += match event.kind {
                FileChangeKind::Create => self.on_created(&event.path).await,
                FileChangeKind::Modify => self.on_modified(&event.path).await,
                FileChangeKind::Remove => self.on_removed(&event.path),
                FileChangeKind::Rename => match event.from.as_deref() {
                    Some(from) => self.on_renamed(from, &event.path).await,
                    None => self.on_created(&event.path).await,
                },
            };
        }
        emitted
    }

    async fn on_created(&self, absolute: &Path) -> usize {
        let Some(relative) = self.relative(absolute) else {
            return 0;
        };
        if absolute.is_dir() {
            // A directory moved in from outside: announce its files.
            let found = match Self::scan_directory(&self.root, absolute).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!("{}", e);
                    return 0;
                }
            };
            let mut emitted = 0;
            for path in found {
                emitted += self.register_created(path);
            }
            return emitted;
        }
        if !is_markdown(&relative) {
            return 0;
        }
        if self.files.read().contains_key(&relative) {
            // Replaced in place, as editors do when saving through a
            // temporary file renamed over the original.
            return self.on_modified(absolute).await;
        }
        self.register_created(relative)
    }

    fn register_created(&self, relative: PathBuf) -> usize {
        let file = FileHandle::new(relative);
        let previous = self
            .files
            .write()
            .insert(file.path().to_path_buf(), file.clone());
        if previous.is_some() {
            return 0;
        }
        self.emit(VaultChange::Created(file));
        1
    }

    async fn on_modified(&self, absolute: &Path) -> usize {
        let Some(relative) = self.relative(absolute) else {
            return 0;
        };
        if !is_markdown(&relative) || absolute.is_dir() {
            return 0;
        }
        let file = FileHandle::new(relative);
        self.cache.lock().remove(file.path());
        match self.get_snapshot(&file).await {
            Ok(Some(snapshot)) => {
                self.files
                    .write()
                    .insert(file.path().to_path_buf(), file.clone());
                self.emit(VaultChange::Changed { file, snapshot });
                1
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("{}", e);
                0
            }
        }
    }

    fn on_removed(&self, absolute: &Path) -> usize {
        let Some(relative) = self.relative(absolute) else {
            return 0;
        };
        let removed = self.files_under(&relative);
        for file in &removed {
            self.files.write().remove(file.path());
            self.cache.lock().remove(file.path());
            self.emit(VaultChange::Deleted(file.clone()));
        }
        removed.len()
    }

    async fn on_renamed(&self, from: &Path, to: &Path) -> usize {
        let (Some(old), Some(new)) = (self.relative(from), self.relative(to)) else {
            // Moved into or out of the visible vault.
            return self.on_removed(from) + self.on_created(to).await;
        };

        let moved = self.files_under(&old);
        if moved.is_empty() {
            return self.on_created(to).await;
        }

        let mut emitted = 0;
        for file in moved {
            let suffix = file.path().strip_prefix(&old).unwrap_or(Path::new(""));
            let target = if suffix.as_os_str().is_empty() {
                new.clone()
            } else {
                new.join(suffix)
            };
            self.files.write().remove(file.path());
            if !is_markdown(&target) {
                self.cache.lock().remove(file.path());
                self.emit(VaultChange::Deleted(file));
                emitted += 1;
                continue;
            }
            let renamed = FileHandle::new(target);
            self.cache.lock().rename(file.path(), renamed.path());
            self.files
                .write()
                .insert(renamed.path().to_path_buf(), renamed.clone());
            self.emit(VaultChange::Renamed {
                file: renamed,
                old_path: file.path().to_path_buf(),
            });
            emitted += 1;
        }
        emitted
    }
}

#[async_trait]
impl FileSystemProvider for LocalVaultProvider {
    async fn list_all_files(&self) -> Vec<FileHandle> {
        self.files.read().values().cloned().collect()
    }

    async fn get_snapshot(
        &self,
        file: &FileHandle,
    ) -> Result<Option<MetadataSnapshot>, ProviderError> {
        let absolute = self.root.join(file.path());
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&absolute, e)),
        };
        let stamp = FileStamp::from_metadata(&metadata);
        if let Some(snapshot) = self.cache.lock().get(file.path(), stamp) {
            return Ok(Some(snapshot));
        }

        let content = match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&absolute, e)),
        };
        let snapshot = parse_snapshot(&content).map_err(|source| ProviderError::Frontmatter {
            path: file.path().to_path_buf(),
            source,
        })?;
        self.cache.lock().insert(file.path(), stamp, snapshot.clone());
        Ok(Some(snapshot))
    }

    async fn resolve_link(&self, link_text: &str, source_path: &Path) -> Option<FileHandle> {
        resolve_among(&self.files.read(), link_text, source_path)
    }

    async fn resolved_link_graph(&self) -> LinkGraph {
        let files = self.files.read().clone();
        let mut snapshots = Vec::with_capacity(files.len());
        for file in files.values() {
            match self.get_snapshot(file).await {
                Ok(Some(snapshot)) => snapshots.push((file.path().to_path_buf(), snapshot)),
                Ok(None) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
        link_graph_from(
            &files,
            snapshots
                .iter()
                .map(|(path, snapshot)| (path.as_path(), snapshot)),
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultChange> {
        self.changes.subscribe()
    }
}
