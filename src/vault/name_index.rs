//! Short-name index over a flat file namespace.
//!
//! Each name maps to exactly one slot: a single file, or the group of files
//! that share the name. Growing a unique slot into a duplicate group (and
//! shrinking it back) is a single write under the index lock, so readers
//! never observe a name that is both unique and duplicated.

use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::vault::provider::{FileSystemProvider, VaultChange};
use crate::vault::types::{name_of, FileHandle};

/// Result of a name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup {
    /// No file has the name.
    Absent,
    /// Exactly one file has the name.
    Unique(FileHandle),
    /// Several files share the name.
    Duplicates(Vec<FileHandle>),
}

impl NameLookup {
    /// The single match, if the name is unambiguous.
    pub fn unique(self) -> Option<FileHandle> {
        match self {
            NameLookup::Unique(file) => Some(file),
            NameLookup::Absent | NameLookup::Duplicates(_) => None,
        }
    }

    /// All matching files.
    pub fn files(self) -> Vec<FileHandle> {
        match self {
            NameLookup::Absent => Vec::new(),
            NameLookup::Unique(file) => vec![file],
            NameLookup::Duplicates(files) => files,
        }
    }

    /// Whether no file has the name.
    pub fn is_absent(&self) -> bool {
        matches!(self, NameLookup::Absent)
    }
}

/// Files sharing one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// The shared name.
    pub name: String,
    /// Every file with that name.
    pub files: Vec<FileHandle>,
}

#[derive(Debug)]
enum NameSlot {
    Unique(FileHandle),
    /// Always holds at least two files.
    Duplicates(Vec<FileHandle>),
}

/// Name -> file index, maintained from the same raw notifications as the
/// metadata store.
pub struct NameIndex {
    slots: RwLock<HashMap<String, NameSlot>>,
    provider: Arc<dyn FileSystemProvider>,
}

impl NameIndex {
    /// Create an empty index over `provider`.
    pub fn new(provider: Arc<dyn FileSystemProvider>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            provider,
        }
    }

    /// Rebuild from the provider's file list.
    pub async fn build(&self) {
        let files = self.provider.list_all_files().await;
        self.slots.write().clear();
        for file in files {
            self.add_entry(file);
        }
        tracing::debug!(names = self.len(), "Name index built");
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no names are indexed.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Look up the files named `name`.
    pub fn find_by_name(&self, name: &str) -> NameLookup {
        match self.slots.read().get(name) {
            None => NameLookup::Absent,
            Some(NameSlot::Unique(file)) => NameLookup::Unique(file.clone()),
            Some(NameSlot::Duplicates(files)) => NameLookup::Duplicates(files.clone()),
        }
    }

    /// Look up the files sharing `path`'s name.
    pub fn find_by_path(&self, path: &Path) -> NameLookup {
        self.find_by_name(&name_of(path))
    }

    /// Link resolution is authoritative in the provider; the index is not
    /// consulted.
    pub async fn find_by_link_text(&self, link_text: &str, source_path: &Path) -> Option<FileHandle> {
        self.provider.resolve_link(link_text, source_path).await
    }

    /// All names currently shared by two or more files.
    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> = self
            .slots
            .read()
            .iter()
            .filter_map(|(name, slot)| match slot {
                NameSlot::Duplicates(files) => Some(DuplicateGroup {
                    name: name.clone(),
                    files: files.clone(),
                }),
                NameSlot::Unique(_) => None,
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    /// Index a file. Adding a path twice is a no-op.
    pub fn add_entry(&self, file: FileHandle) {
        let mut slots = self.slots.write();
        match slots.entry(file.name().to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(NameSlot::Unique(file));
            }
            Entry::Occupied(mut occupied) => {
                let name = occupied.key().clone();
                let slot = occupied.get_mut();
                match slot {
                    NameSlot::Unique(existing) if existing.path() == file.path() => {}
                    NameSlot::Unique(existing) => {
                        tracing::debug!(name = %name, "Name now shared by multiple files");
                        let existing = existing.clone();
                        *slot = NameSlot::Duplicates(vec![existing, file]);
                    }
                    NameSlot::Duplicates(files) => {
                        if !files.iter().any(|f| f.path() == file.path()) {
                            files.push(file);
                        }
                    }
                }
            }
        }
    }

    /// Remove a file. Returns `false` (and logs) if it was not indexed.
    pub fn remove_entry(&self, file: &FileHandle) -> bool {
        let removed = self.take(file);
        if !removed {
            tracing::error!(name = %file.name(), path = %file.path().display(), "Cannot remove unindexed file from name index");
        }
        removed
    }

    fn take(&self, file: &FileHandle) -> bool {
        let mut slots = self.slots.write();
        let name = file.name();
        match slots.get_mut(name) {
            Some(NameSlot::Unique(existing)) if existing.path() == file.path() => {
                slots.remove(name);
                true
            }
            Some(NameSlot::Duplicates(files)) => {
                let before = files.len();
                files.retain(|f| f.path() != file.path());
                let removed = files.len() != before;
                if files.len() == 1 {
                    let last = files.remove(0);
                    slots.insert(name.to_string(), NameSlot::Unique(last));
                }
                removed
            }
            Some(NameSlot::Unique(_)) | None => false,
        }
    }

    fn contains(&self, file: &FileHandle) -> bool {
        match self.slots.read().get(file.name()) {
            Some(NameSlot::Unique(existing)) => existing.path() == file.path(),
            Some(NameSlot::Duplicates(files)) => files.iter().any(|f| f.path() == file.path()),
            None => false,
        }
    }

    /// Move `old_path` to `file`. A rename the index already reflects, as
    /// when a build saw the new path first, is not an error.
    pub fn rename_entry(&self, file: FileHandle, old_path: &Path) -> bool {
        let old = FileHandle::new(old_path);
        let removed = self.take(&old);
        if !removed {
            if self.contains(&file) {
                tracing::debug!(old = %old_path.display(), new = %file.path().display(), "Rename already indexed");
            } else {
                tracing::error!(name = %old.name(), path = %old_path.display(), "Cannot remove unindexed file from name index");
            }
        }
        self.add_entry(file);
        removed
    }

    /// Apply a raw provider notification.
    pub fn apply(&self, change: &VaultChange) {
        match change {
            VaultChange::Created(file) => self.add_entry(file.clone()),
            VaultChange::Deleted(file) => {
                self.remove_entry(file);
            }
            VaultChange::Renamed { file, old_path } => {
                self.rename_entry(file.clone(), old_path);
            }
            // Content changes never move a name, but a first-seen file is indexed.
            VaultChange::Changed { file, .. } => self.add_entry(file.clone()),
        }
    }
}
