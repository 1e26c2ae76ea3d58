//! Path-keyed metadata store.
//!
//! `MetadataStore` owns the authoritative map from path to [`CacheEntry`] and
//! the build -> incremental update -> diff -> publish pipeline:
//!
//! ```text
//! provider notification
//!        ↓
//! add/delete/update/rename_entry   (serialized per path)
//!        ↓
//! derive_events(old, new)          (update only)
//!        ↓
//! EventBus handlers + broadcast subscribers
//! ```
//!
//! Queries against a store that is not `Ready` log an error and return
//! nothing; [`MetadataStore::lookup`] reports the reason as a typed error.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, OwnedMutexGuard, RwLock};

use crate::config::VaultConfig;
use crate::vault::deriver::{derive_events, rename_events, DerivationRules};
use crate::vault::error::VaultError;
use crate::vault::events::{DomainEvent, DomainEventKind, EventBus, HandlerId};
use crate::vault::provider::FileSystemProvider;
use crate::vault::types::{CacheEntry, FileHandle, FileType, MetadataSnapshot, StoreState, TypeTag};

/// Counters for store activity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries inserted, by build follow-ups or notifications.
    pub adds: u64,
    /// Content updates applied to existing entries.
    pub updates: u64,
    /// Entries removed.
    pub removes: u64,
    /// Renames applied.
    pub renames: u64,
    /// Domain events published.
    pub events_published: u64,
    /// Snapshot fetches that failed.
    pub fetch_failures: u64,
    /// Updates whose type tag was not recognized.
    pub malformed_types: u64,
}

/// FIFO mutex per path. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock();
        if locks.get(&self.path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.path);
        }
    }
}

impl PathLocks {
    async fn lock(&self, path: &Path) -> PathGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(path.to_path_buf()).or_default());
        PathGuard {
            locks: self,
            path: path.to_path_buf(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Lock two paths in a fixed order.
    async fn lock_pair(&self, a: &Path, b: &Path) -> (PathGuard<'_>, Option<PathGuard<'_>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }
}

/// Builder for [`MetadataStore`].
#[derive(Default)]
pub struct MetadataStoreBuilder {
    provider: Option<Arc<dyn FileSystemProvider>>,
    config: VaultConfig,
}

impl MetadataStoreBuilder {
    /// Create a builder with no provider and default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider.
    pub fn provider(mut self, provider: Arc<dyn FileSystemProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: VaultConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the store.
    pub fn build(self) -> Result<MetadataStore, VaultError> {
        let provider = self
            .provider
            .ok_or(VaultError::MissingDependency("file system provider"))?;
        Ok(MetadataStore::new(provider, &self.config))
    }
}

/// The authoritative in-memory metadata cache.
pub struct MetadataStore {
    provider: Arc<dyn FileSystemProvider>,
    rules: DerivationRules,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    /// Lazily rebuilt array view; `None` after any mutation.
    view: Mutex<Option<Arc<[CacheEntry]>>>,
    state: watch::Sender<StoreState>,
    bus: EventBus<DomainEvent>,
    notifier: broadcast::Sender<DomainEvent>,
    path_locks: PathLocks,
    /// Paths mutated while a build runs. They keep their live entry when
    /// the rebuilt map is installed.
    touched: Mutex<Option<HashSet<PathBuf>>>,
    stats: Mutex<StoreStats>,
}

impl MetadataStore {
    /// Create a store over `provider`.
    pub fn new(provider: Arc<dyn FileSystemProvider>, config: &VaultConfig) -> Self {
        let (notifier, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            provider,
            rules: DerivationRules::from(config),
            entries: RwLock::new(HashMap::new()),
            view: Mutex::new(None),
            state: watch::Sender::new(StoreState::Uninitialized),
            bus: EventBus::new(),
            notifier,
            path_locks: PathLocks::default(),
            touched: Mutex::new(None),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// Start a builder.
    pub fn builder() -> MetadataStoreBuilder {
        MetadataStoreBuilder::new()
    }

    /// The provider backing this store.
    pub fn provider(&self) -> &Arc<dyn FileSystemProvider> {
        &self.provider
    }

    /// The event derivation rules in effect.
    pub fn rules(&self) -> &DerivationRules {
        &self.rules
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        *self.state.borrow()
    }

    /// Whether the store is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.state() == StoreState::Ready
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no entries are cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // ---------------------------------------------------------------------
    // Build and readiness
    // ---------------------------------------------------------------------

    /// Scan every file the provider knows and rebuild the map.
    ///
    /// Files whose snapshot is missing or fails to load are skipped with a
    /// warning. Can be called again to refresh; the store is `Building` for
    /// the duration.
    pub async fn build_cache(&self) {
        self.touched.lock().get_or_insert_with(HashSet::new);
        self.state.send_replace(StoreState::Building);
        tracing::debug!("Building metadata cache");

        let files = self.provider.list_all_files().await;
        let mut fresh = HashMap::with_capacity(files.len());
        let mut skipped = 0usize;
        for file in files {
            match self.provider.get_snapshot(&file).await {
                Ok(Some(metadata)) => {
                    fresh.insert(file.path().to_path_buf(), CacheEntry { file, metadata });
                }
                Ok(None) => {
                    skipped += 1;
                    tracing::warn!(path = %file.path().display(), "No metadata for file, skipping");
                }
                Err(e) => {
                    skipped += 1;
                    self.stats.lock().fetch_failures += 1;
                    tracing::warn!(path = %file.path().display(), "Failed to fetch metadata, skipping: {}", e);
                }
            }
            // Yield to prevent blocking too long
            tokio::task::yield_now().await;
        }

        let (count, kept) = {
            let mut entries = self.entries.write().await;
            let touched = self.touched.lock().take().unwrap_or_default();
            let kept = touched.len();
            for path in touched {
                match entries.remove(&path) {
                    Some(entry) => fresh.insert(path, entry),
                    None => fresh.remove(&path),
                };
            }
            let count = fresh.len();
            *entries = fresh;
            self.invalidate_view();
            (count, kept)
        };
        self.state.send_replace(StoreState::Ready);
        tracing::info!(entries = count, skipped, kept, "Metadata cache ready");
    }

    /// Resolve once the store is `Ready`.
    ///
    /// Safe to call from any number of tasks, before or during the build.
    pub async fn wait_until_ready(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = state.wait_for(|state| *state == StoreState::Ready).await;
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Typed lookup: `NotReady` or `NotFound` instead of a logged `None`.
    pub async fn lookup(&self, path: &Path) -> Result<CacheEntry, VaultError> {
        if !self.is_ready() {
            return Err(VaultError::NotReady);
        }
        self.entries
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(path.to_path_buf()))
    }

    /// Entry for `file`, fetching and inserting it if the map has none.
    pub async fn get_entry(&self, file: &FileHandle) -> Option<CacheEntry> {
        match self.lookup(file.path()).await {
            Ok(entry) => Some(entry),
            Err(VaultError::NotFound(_)) => {
                tracing::debug!(path = %file.path().display(), "Cache miss, fetching metadata");
                self.add_entry(file).await
            }
            Err(e) => {
                tracing::error!(path = %file.path().display(), "{}", e);
                None
            }
        }
    }

    /// Entry at `path`; no fetch on miss.
    pub async fn get_entry_by_path(&self, path: &Path) -> Option<CacheEntry> {
        match self.lookup(path).await {
            Ok(entry) => Some(entry),
            Err(e @ VaultError::NotFound(_)) => {
                tracing::warn!("{}", e);
                None
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "{}", e);
                None
            }
        }
    }

    /// Entry for the file that `link_text`, written in `source_path`, points to.
    pub async fn get_entry_by_link(&self, link_text: &str, source_path: &Path) -> Option<CacheEntry> {
        match self.provider.resolve_link(link_text, source_path).await {
            Some(file) => self.get_entry_by_path(file.path()).await,
            None => {
                tracing::warn!(link = link_text, source = %source_path.display(), "Unresolved link");
                None
            }
        }
    }

    /// Files whose resolved outgoing links include `file`, sorted by path.
    pub async fn get_backlinks(&self, file: &FileHandle) -> Vec<FileHandle> {
        if !self.is_ready() {
            tracing::error!(path = %file.path().display(), "{}", VaultError::NotReady);
            return Vec::new();
        }
        let graph = self.provider.resolved_link_graph().await;
        let entries = self.entries.read().await;
        let mut backlinks: Vec<FileHandle> = graph
            .iter()
            .filter(|(_, targets)| targets.contains_key(file.path()))
            .filter_map(|(source, _)| entries.get(source).map(|entry| entry.file.clone()))
            .collect();
        backlinks.sort();
        backlinks
    }

    /// All entries, as a shared array rebuilt lazily after mutations.
    ///
    /// A caller holding an earlier array keeps seeing the state at the time
    /// it was built.
    pub async fn entries(&self) -> Arc<[CacheEntry]> {
        if !self.is_ready() {
            tracing::error!("{}", VaultError::NotReady);
            return Arc::from(Vec::new());
        }
        let entries = self.entries.read().await;
        let mut view = self.view.lock();
        if let Some(view) = view.as_ref() {
            return Arc::clone(view);
        }
        let mut all: Vec<CacheEntry> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.file.path().cmp(b.file.path()));
        let fresh: Arc<[CacheEntry]> = Arc::from(all);
        *view = Some(Arc::clone(&fresh));
        fresh
    }

    /// Entries whose snapshot declares `file_type`.
    pub async fn entries_of_type(&self, file_type: FileType) -> Vec<CacheEntry> {
        let type_field = &self.rules.type_field;
        self.entries()
            .await
            .iter()
            .filter(|entry| entry.metadata.type_tag(type_field) == TypeTag::Typed(file_type))
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Register a handler for one domain event kind.
    pub fn on<F>(&self, kind: DomainEventKind, handler: F) -> HandlerId
    where
        F: Fn(&DomainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.register_event(kind, handler)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, kind: DomainEventKind, id: HandlerId) -> bool {
        self.bus.deregister_event(kind, id)
    }

    /// Receive every published domain event.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.notifier.subscribe()
    }

    fn publish(&self, events: &[DomainEvent]) {
        for event in events {
            tracing::debug!(event = %event.kind(), "Publishing domain event");
            self.bus.fire_event(event, None);
            // No receivers is fine.
            let _ = self.notifier.send(event.clone());
        }
        self.stats.lock().events_published += events.len() as u64;
    }

    // ---------------------------------------------------------------------
    // Incremental maintenance
    // ---------------------------------------------------------------------

    fn invalidate_view(&self) {
        self.view.lock().take();
    }

    /// Record a mutation of `path`. Call with the entries lock held.
    fn touch(&self, path: &Path) {
        if let Some(touched) = self.touched.lock().as_mut() {
            touched.insert(path.to_path_buf());
        }
    }

    async fn fetch(&self, file: &FileHandle) -> Option<MetadataSnapshot> {
        match self.provider.get_snapshot(file).await {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                tracing::warn!(path = %file.path().display(), "No metadata for file, skipping");
                None
            }
            Err(e) => {
                self.stats.lock().fetch_failures += 1;
                let e = VaultError::Fetch {
                    path: file.path().to_path_buf(),
                    source: e,
                };
                tracing::warn!("{}", e);
                None
            }
        }
    }

    async fn insert(&self, file: &FileHandle, metadata: MetadataSnapshot) -> CacheEntry {
        let entry = CacheEntry {
            file: file.clone(),
            metadata,
        };
        let mut entries = self.entries.write().await;
        entries.insert(file.path().to_path_buf(), entry.clone());
        self.touch(file.path());
        self.invalidate_view();
        entry
    }

    /// Fetch `file`'s snapshot and insert or overwrite its entry.
    pub async fn add_entry(&self, file: &FileHandle) -> Option<CacheEntry> {
        let _guard = self.path_locks.lock(file.path()).await;
        let metadata = self.fetch(file).await?;
        let entry = self.insert(file, metadata).await;
        self.stats.lock().adds += 1;
        tracing::trace!(path = %file.path().display(), "Entry added");
        Some(entry)
    }

    /// Remove the entry for `file`. Returns `false` if there was none.
    pub async fn delete_entry(&self, file: &FileHandle) -> bool {
        let _guard = self.path_locks.lock(file.path()).await;
        let removed = {
            let mut entries = self.entries.write().await;
            let removed = entries.remove(file.path()).is_some();
            self.touch(file.path());
            if removed {
                self.invalidate_view();
            }
            removed
        };
        if removed {
            self.stats.lock().removes += 1;
        } else {
            tracing::warn!(path = %file.path().display(), "Delete for unknown entry");
        }
        removed
    }

    /// Replace `file`'s snapshot and publish the events derived from the diff.
    ///
    /// A file with no prior entry gets one, but nothing is derived without a
    /// baseline. Returns the published events.
    pub async fn update_entry(&self, file: &FileHandle, snapshot: MetadataSnapshot) -> Vec<DomainEvent> {
        let _guard = self.path_locks.lock(file.path()).await;
        let previous = {
            let mut entries = self.entries.write().await;
            self.touch(file.path());
            let previous = match entries.get_mut(file.path()) {
                Some(entry) => {
                    entry.file = file.clone();
                    Some(std::mem::replace(&mut entry.metadata, snapshot.clone()))
                }
                None => {
                    entries.insert(
                        file.path().to_path_buf(),
                        CacheEntry {
                            file: file.clone(),
                            metadata: snapshot.clone(),
                        },
                    );
                    None
                }
            };
            self.invalidate_view();
            previous
        };

        let Some(previous) = previous else {
            self.stats.lock().adds += 1;
            tracing::debug!(path = %file.path().display(), "No baseline for changed file, stored without deriving events");
            return Vec::new();
        };
        self.stats.lock().updates += 1;

        match derive_events(&self.rules, &previous, &snapshot, file) {
            Ok(events) => {
                self.publish(&events);
                events
            }
            Err(e) => {
                self.stats.lock().malformed_types += 1;
                tracing::error!("{}", e);
                Vec::new()
            }
        }
    }

    /// Move the entry at `old_path` to `file`, re-fetching its snapshot, and
    /// publish `file-renamed` unless the new path is a template.
    pub async fn rename_entry(&self, file: &FileHandle, old_path: &Path) -> Option<CacheEntry> {
        let _guards = self.path_locks.lock_pair(file.path(), old_path).await;
        {
            let mut entries = self.entries.write().await;
            self.touch(old_path);
            self.touch(file.path());
            if entries.remove(old_path).is_none() {
                tracing::warn!(old = %old_path.display(), new = %file.path().display(), "Rename of unknown entry");
            }
            self.invalidate_view();
        }

        let entry = match self.fetch(file).await {
            Some(metadata) => Some(self.insert(file, metadata).await),
            None => None,
        };
        self.stats.lock().renames += 1;

        let events = rename_events(&self.rules, file, old_path);
        self.publish(&events);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::memory::MemoryVaultProvider;
    use crate::vault::types::{Frontmatter, LinkRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn snapshot(yaml: &str) -> MetadataSnapshot {
        MetadataSnapshot::with_frontmatter(Frontmatter::from_yaml(yaml).unwrap())
    }

    fn store_with(provider: &Arc<MemoryVaultProvider>, config: VaultConfig) -> MetadataStore {
        MetadataStore::new(provider.clone(), &config)
    }

    fn kinds(events: &[DomainEvent]) -> Vec<DomainEventKind> {
        events.iter().map(DomainEvent::kind).collect()
    }

    #[tokio::test]
    async fn test_build_skips_missing_and_failing_snapshots() {
        let provider = Arc::new(MemoryVaultProvider::new());
        provider.seed("a.md", snapshot("type: Task"));
        provider.seed("dir/b.md", snapshot("type: Note"));
        provider.seed_without_snapshot("empty.md");
        provider.seed("broken.md", snapshot(""));
        provider.fail_fetches("broken.md");

        let store = store_with(&provider, VaultConfig::default());
        assert_eq!(store.state(), StoreState::Uninitialized);
        store.build_cache().await;

        assert!(store.is_ready());
        assert!(store.get_entry_by_path(Path::new("a.md")).await.is_some());
        assert!(store.get_entry_by_path(Path::new("dir/b.md")).await.is_some());
        assert!(store.get_entry_by_path(Path::new("empty.md")).await.is_none());
        assert_eq!(store.len().await, 2);
        assert_eq!(store.stats().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_wait_until_ready_before_build_starts() {
        let provider = Arc::new(MemoryVaultProvider::new());
        provider.seed("a.md", snapshot("type: Task"));
        let store = Arc::new(store_with(&provider, VaultConfig::default()));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.wait_until_ready().await;
                    store.len().await
                })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        store.build_cache().await;
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 1);
        }
    }

    async fn until_building(store: &MetadataStore) {
        while store.state() != StoreState::Building {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_wait_until_ready_pending_while_building() {
        let provider = Arc::new(MemoryVaultProvider::new());
        provider.seed("a.md", snapshot("type: Task"));
        provider.delay_next_fetch("a.md", Duration::from_millis(50));
        let store = Arc::new(store_with(&provider, VaultConfig::default()));

        let build = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.build_cache().await })
        };
        until_building(&store).await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.wait_until_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.state(), StoreState::Building);
        assert!(!waiter.is_finished());

        build.await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(store.is_ready());
    }

    #[tokio::test]
    async fn test_rebuild_keeps_mutations_made_while_building() {
        let provider = Arc::new(MemoryVaultProvider::new());
        provider.seed("a.md", snapshot("type: Task"));
        let gone = provider.seed("c.md", snapshot("type: Note"));
        let store = Arc::new(store_with(&provider, VaultConfig::default()));
        store.build_cache().await;

        provider.delay_next_fetch("a.md", Duration::from_millis(50));
        let rebuild = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.build_cache().await })
        };
        until_building(&store).await;

        let added = provider.seed("b.md", snapshot("type: Note"));
        assert!(store.add_entry(&added).await.is_some());
        assert!(store.delete_entry(&gone).await);
        rebuild.await.unwrap();

        assert!(store.get_entry_by_path(Path::new("a.md")).await.is_some());
        assert!(store.get_entry_by_path(added.path()).await.is_some());
        assert!(store.get_entry_by_path(gone.path()).await.is_none());
        assert_eq!(store.len().await, 2);

        // Later rebuilds no longer pin those paths.
        store.build_cache().await;
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_queries_before_ready_signal_not_ready() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("a.md", snapshot("type: Task"));
        let store = store_with(&provider, VaultConfig::default());

        assert!(matches!(store.lookup(file.path()).await, Err(VaultError::NotReady)));
        assert!(store.get_entry(&file).await.is_none());
        assert!(store.entries().await.is_empty());
        assert!(store.get_backlinks(&file).await.is_empty());
        assert!(logs_contain("Metadata store is not ready"));
    }

    #[tokio::test]
    async fn test_status_change_emits_status_and_task_events_once() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("t.md", snapshot("type: Task\nstatus: Active"));
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let status_calls = Arc::new(AtomicUsize::new(0));
        let task_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&status_calls);
        store.on(DomainEventKind::StatusChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = Arc::clone(&task_calls);
        store.on(DomainEventKind::TaskFileChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let events = store
            .update_entry(&file, snapshot("type: Task\nstatus: Done"))
            .await;

        assert_eq!(
            kinds(&events),
            vec![DomainEventKind::StatusChanged, DomainEventKind::TaskFileChanged]
        );
        assert_eq!(status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(task_calls.load(Ordering::SeqCst), 1);
        let entry = store.get_entry_by_path(file.path()).await.unwrap();
        assert_eq!(entry.metadata.frontmatter.get_str("status"), Some("Done"));
    }

    #[tokio::test]
    async fn test_identical_snapshot_emits_no_status_change() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("t.md", snapshot("type: Task\nstatus: Active"));
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let events = store
            .update_entry(&file, snapshot("type: Task\nstatus: Active"))
            .await;
        assert_eq!(kinds(&events), vec![DomainEventKind::TaskFileChanged]);
    }

    #[tokio::test]
    async fn test_template_folder_changes_are_silent_but_cached() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("Templates/task.md", snapshot("type: Task\nstatus: Active"));
        let config = VaultConfig::builder(".").template_folder("Templates").build();
        let store = store_with(&provider, config);
        store.build_cache().await;
        let mut rx = store.subscribe();

        let edited = snapshot("type: Task\nstatus: Done\nsubType: Kanban");
        provider.seed(file.path(), edited.clone());
        let events = store.update_entry(&file, edited).await;
        assert!(events.is_empty());
        assert!(rx.try_recv().is_err());

        let renamed = FileHandle::new("Templates/other.md");
        provider.rename(file.path(), renamed.path());
        store.rename_entry(&renamed, file.path()).await;
        assert!(rx.try_recv().is_err());

        let entry = store.get_entry_by_path(renamed.path()).await.unwrap();
        assert_eq!(entry.metadata.frontmatter.get_str("status"), Some("Done"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_malformed_type_logged_and_entry_kept() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("x.md", snapshot("type: Task"));
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let events = store.update_entry(&file, snapshot("type: Recipe")).await;
        assert!(events.is_empty());
        assert!(logs_contain("Unrecognized file type"));
        assert_eq!(store.stats().malformed_types, 1);
        let entry = store.get_entry_by_path(file.path()).await.unwrap();
        assert_eq!(entry.metadata.frontmatter.get_str("type"), Some("Recipe"));
    }

    #[tokio::test]
    async fn test_first_change_without_baseline_stores_entry_silently() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let file = FileHandle::new("new.md");
        let events = store.update_entry(&file, snapshot("type: Task\nstatus: Open")).await;
        assert!(events.is_empty());
        assert!(store.get_entry_by_path(file.path()).await.is_some());
    }

    #[tokio::test]
    async fn test_rename_moves_entry_and_emits_event() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let old = provider.seed("old.md", snapshot("type: Note"));
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;
        let mut rx = store.subscribe();

        let new = provider.rename(old.path(), "moved/new.md").unwrap();
        let entry = store.rename_entry(&new, old.path()).await;

        assert!(entry.is_some());
        assert!(store.get_entry_by_path(old.path()).await.is_none());
        assert!(store.get_entry_by_path(new.path()).await.is_some());
        assert_eq!(
            rx.try_recv().unwrap(),
            DomainEvent::FileRenamed {
                old_path: PathBuf::from("old.md"),
                new_path: PathBuf::from("moved/new.md"),
            }
        );
    }

    #[tokio::test]
    async fn test_get_entry_self_heals_on_miss() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let file = provider.seed("late.md", snapshot("type: Topic"));
        assert!(store.get_entry_by_path(file.path()).await.is_none());

        let entry = store.get_entry(&file).await.unwrap();
        assert_eq!(entry.file, file);
        assert!(store.get_entry_by_path(file.path()).await.is_some());
    }

    #[tokio::test]
    async fn test_entries_view_is_invalidated_on_mutation() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let a = provider.seed("a.md", snapshot("type: Task"));
        provider.seed("b.md", snapshot("type: Note"));
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let first = store.entries().await;
        let again = store.entries().await;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.len(), 2);

        store.delete_entry(&a).await;
        let after = store.entries().await;
        assert!(!Arc::ptr_eq(&first, &after));
        assert_eq!(after.len(), 1);
        // An earlier array stays as it was.
        assert_eq!(first.len(), 2);
        assert_eq!(store.entries_of_type(FileType::Note).await.len(), 1);
        assert!(store.entries_of_type(FileType::Task).await.is_empty());
    }

    #[tokio::test]
    async fn test_link_and_backlink_queries() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let hub = provider.seed("hub.md", snapshot("type: Topic"));
        provider.seed(
            "notes/a.md",
            MetadataSnapshot {
                links: vec![LinkRef::new("hub", 3)],
                ..Default::default()
            },
        );
        provider.seed(
            "notes/b.md",
            MetadataSnapshot {
                links: vec![LinkRef::new("hub#Goals", 1), LinkRef::new("a", 2)],
                ..Default::default()
            },
        );
        let store = store_with(&provider, VaultConfig::default());
        store.build_cache().await;

        let backlinks = store.get_backlinks(&hub).await;
        assert_eq!(
            backlinks,
            vec![FileHandle::new("notes/a.md"), FileHandle::new("notes/b.md")]
        );

        let entry = store.get_entry_by_link("a", Path::new("notes/b.md")).await.unwrap();
        assert_eq!(entry.file.path(), Path::new("notes/a.md"));
        assert!(store.get_entry_by_link("ghost", Path::new("notes/b.md")).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_adds_for_same_path_apply_in_order() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let file = provider.seed("race.md", snapshot("status: first"));
        let store = Arc::new(store_with(&provider, VaultConfig::default()));
        store.build_cache().await;

        // The first fetch reads "first" and then stalls.
        provider.delay_next_fetch("race.md", Duration::from_millis(50));
        let slow = {
            let store = Arc::clone(&store);
            let file = file.clone();
            tokio::spawn(async move { store.add_entry(&file).await })
        };
        tokio::task::yield_now().await;

        provider.seed("race.md", snapshot("status: second"));
        store.add_entry(&file).await;
        slow.await.unwrap();

        let entry = store.get_entry_by_path(file.path()).await.unwrap();
        assert_eq!(entry.metadata.frontmatter.get_str("status"), Some("second"));
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(
            MetadataStore::builder().build(),
            Err(VaultError::MissingDependency(_))
        ));
        let provider: Arc<dyn FileSystemProvider> = Arc::new(MemoryVaultProvider::new());
        assert!(MetadataStore::builder().provider(provider).build().is_ok());
    }
}
