//! The file source seam: enumeration, snapshot extraction, link resolution
//! and raw change notifications.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tokio::sync::broadcast;

use crate::vault::error::ProviderError;
use crate::vault::types::{name_of, FileHandle, MetadataSnapshot};

/// Outgoing resolved links per source path, counted per target path.
pub type LinkGraph = HashMap<PathBuf, HashMap<PathBuf, usize>>;

/// Raw change notification emitted by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum VaultChange {
    /// A file appeared.
    Created(FileHandle),
    /// A file was removed.
    Deleted(FileHandle),
    /// A file moved from `old_path` to `file`.
    Renamed {
        /// The file at its new path.
        file: FileHandle,
        /// Where it was.
        old_path: PathBuf,
    },
    /// A file's content changed.
    Changed {
        /// The changed file.
        file: FileHandle,
        /// Its new metadata.
        snapshot: MetadataSnapshot,
    },
}

impl VaultChange {
    /// Current path of the file the change concerns.
    pub fn path(&self) -> &Path {
        match self {
            VaultChange::Created(file)
            | VaultChange::Deleted(file)
            | VaultChange::Renamed { file, .. }
            | VaultChange::Changed { file, .. } => file.path(),
        }
    }
}

/// Authoritative source of files and their metadata.
#[async_trait]
pub trait FileSystemProvider: Send + Sync + 'static {
    /// Every document currently in the vault.
    async fn list_all_files(&self) -> Vec<FileHandle>;

    /// Extract a snapshot. `Ok(None)` means the file has no extractable
    /// metadata (for example it vanished between listing and reading).
    async fn get_snapshot(
        &self,
        file: &FileHandle,
    ) -> Result<Option<MetadataSnapshot>, ProviderError>;

    /// Resolve link text written in `source_path` to a file.
    async fn resolve_link(&self, link_text: &str, source_path: &Path) -> Option<FileHandle>;

    /// Resolved outgoing links for every file.
    async fn resolved_link_graph(&self) -> LinkGraph;

    /// Subscribe to raw change notifications.
    fn subscribe(&self) -> broadcast::Receiver<VaultChange>;
}

/// Strip `#heading`, `^block` and `|alias` suffixes from link text.
pub fn link_path(link_text: &str) -> &str {
    let end = link_text
        .find(&['#', '|', '^'][..])
        .unwrap_or(link_text.len());
    link_text[..end].trim()
}

/// Resolve link text against a set of known files.
///
/// Path-qualified links are tried relative to the source's folder, then from
/// the vault root, then as a path suffix. Bare names match by file name; when
/// several files share the name, the one in the source's folder wins, then
/// the shallowest path.
pub fn resolve_among(
    files: &BTreeMap<PathBuf, FileHandle>,
    link_text: &str,
    source_path: &Path,
) -> Option<FileHandle> {
    let target = link_path(link_text);
    if target.is_empty() {
        return files.get(source_path).cloned();
    }

    let mut target_path = PathBuf::from(target);
    if target_path.extension().is_none() {
        target_path.set_extension("md");
    }
    let source_dir = source_path.parent().unwrap_or(Path::new(""));

    if target.contains('/') {
        let relative = normalize(&source_dir.join(&target_path));
        if let Some(file) = files.get(&relative) {
            return Some(file.clone());
        }
        let absolute = normalize(&target_path);
        if let Some(file) = files.get(&absolute) {
            return Some(file.clone());
        }
        return files
            .values()
            .filter(|file| file.path().ends_with(&absolute))
            .min_by_key(|file| rank(*file, source_dir))
            .cloned();
    }

    let name = name_of(&target_path);
    let extension = target_path.extension().and_then(|ext| ext.to_str());
    files
        .values()
        .filter(|file| file.name() == name && file.extension() == extension)
        .min_by_key(|file| rank(*file, source_dir))
        .cloned()
}

fn rank<'a>(file: &'a FileHandle, source_dir: &Path) -> (bool, usize, &'a Path) {
    let same_folder = file.path().parent() == Some(source_dir);
    (!same_folder, file.path().components().count(), file.path())
}

/// Build the resolved link graph for a set of snapshots.
pub fn link_graph_from<'a>(
    files: &BTreeMap<PathBuf, FileHandle>,
    snapshots: impl IntoIterator<Item = (&'a Path, &'a MetadataSnapshot)>,
) -> LinkGraph {
    let mut graph = LinkGraph::new();
    for (source, snapshot) in snapshots {
        let targets = graph.entry(source.to_path_buf()).or_default();
        for link in &snapshot.links {
            if let Some(target) = resolve_among(files, &link.target, source) {
                *targets.entry(target.path().to_path_buf()).or_default() += 1;
            }
        }
    }
    graph
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
