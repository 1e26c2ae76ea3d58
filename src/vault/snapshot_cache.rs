//! Bounded LRU cache of parsed snapshots.
//!
//! The local provider re-reads files often (renames re-fetch, self-healing
//! reads, link graph rebuilds). Parsed snapshots are kept here keyed by path
//! and reused while the file's modification time and size are unchanged.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::vault::types::MetadataSnapshot;

/// Disk fingerprint used to decide whether a cached parse is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
    /// Size in bytes.
    pub size: u64,
}

impl FileStamp {
    /// Stamp from filesystem metadata.
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    stamp: FileStamp,
    snapshot: MetadataSnapshot,
}

/// Statistics about cache usage.
#[derive(Debug, Default, Clone)]
pub struct SnapshotCacheStats {
    /// Lookups that returned a snapshot.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries evicted by LRU.
    pub evictions: u64,
    /// Entries dropped because the file changed.
    pub invalidations: u64,
}

/// LRU-bounded map from path to its last parsed snapshot.
pub struct SnapshotCache {
    entries: LruCache<PathBuf, CachedSnapshot>,
    max_entries: usize,
    stats: SnapshotCacheStats,
}

impl SnapshotCache {
    /// Create a cache holding at most `max_entries` snapshots.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            max_entries,
            stats: SnapshotCacheStats::default(),
        }
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of cached snapshots.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Usage counters.
    pub fn stats(&self) -> &SnapshotCacheStats {
        &self.stats
    }

    /// Cached snapshot for `path`, if it was parsed from a file with `stamp`.
    pub fn get(&mut self, path: &Path, stamp: FileStamp) -> Option<MetadataSnapshot> {
        match self.entries.get(path) {
            Some(cached) if cached.stamp == stamp => {
                self.stats.hits += 1;
                Some(cached.snapshot.clone())
            }
            Some(_) => {
                self.entries.pop(path);
                self.stats.invalidations += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Cache `snapshot` for `path` as of `stamp`.
    pub fn insert(&mut self, path: &Path, stamp: FileStamp, snapshot: MetadataSnapshot) {
        let cached = CachedSnapshot { stamp, snapshot };
        if let Some((evicted, _)) = self.entries.push(path.to_path_buf(), cached) {
            if evicted != path {
                self.stats.evictions += 1;
            }
        }
    }

    /// Forget `path`.
    pub fn remove(&mut self, path: &Path) {
        if self.entries.pop(path).is_some() {
            self.stats.invalidations += 1;
        }
    }

    /// Move a cached parse to a new path. Content is unchanged by a rename.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        if let Some(cached) = self.entries.pop(from) {
            self.entries.put(to.to_path_buf(), cached);
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::types::Frontmatter;
    use std::time::Duration;

    fn stamp(secs: u64) -> FileStamp {
        FileStamp {
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
            size: 10,
        }
    }

    fn snapshot(status: &str) -> MetadataSnapshot {
        let mut frontmatter = Frontmatter::new();
        frontmatter.insert("status", status);
        MetadataSnapshot::with_frontmatter(frontmatter)
    }

    #[test]
    fn test_hit_requires_matching_stamp() {
        let mut cache = SnapshotCache::new(10);
        let path = PathBuf::from("a.md");
        cache.insert(&path, stamp(1), snapshot("Open"));

        assert_eq!(cache.get(&path, stamp(1)), Some(snapshot("Open")));
        assert_eq!(cache.get(&path, stamp(2)), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = SnapshotCache::new(3);
        for i in 0..4 {
            cache.insert(&PathBuf::from(format!("n{i}.md")), stamp(i), snapshot("x"));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get(Path::new("n0.md"), stamp(0)).is_none());
    }

    #[test]
    fn test_rename_moves_entry() {
        let mut cache = SnapshotCache::new(10);
        cache.insert(Path::new("old.md"), stamp(1), snapshot("Done"));
        cache.rename(Path::new("old.md"), Path::new("new.md"));

        assert!(cache.get(Path::new("old.md"), stamp(1)).is_none());
        assert_eq!(cache.get(Path::new("new.md"), stamp(1)), Some(snapshot("Done")));
    }
}
