//! Sync service wiring a provider to the metadata store and name index.
//!
//! `VaultSync` is constructed once per vault and handed to whoever needs the
//! store or the index. `start()` subscribes to the provider, builds both
//! caches in a background task, then applies raw notifications one at a time
//! in arrival order. `stop()` cancels the task and drops the subscription.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::VaultConfig;
use crate::vault::error::VaultError;
use crate::vault::name_index::NameIndex;
use crate::vault::provider::{FileSystemProvider, VaultChange};
use crate::vault::store::MetadataStore;

struct SyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the store and name index for one vault and keeps them in sync.
pub struct VaultSync {
    provider: Arc<dyn FileSystemProvider>,
    store: Arc<MetadataStore>,
    names: Arc<NameIndex>,
    task: Mutex<Option<SyncTask>>,
}

impl VaultSync {
    /// Create the store and name index for `provider`. Nothing runs until `start`.
    pub fn new(provider: Arc<dyn FileSystemProvider>, config: &VaultConfig) -> Self {
        Self {
            store: Arc::new(MetadataStore::new(Arc::clone(&provider), config)),
            names: Arc::new(NameIndex::new(Arc::clone(&provider))),
            provider,
            task: Mutex::new(None),
        }
    }

    /// The metadata store.
    pub fn store(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.store)
    }

    /// The name index.
    pub fn names(&self) -> Arc<NameIndex> {
        Arc::clone(&self.names)
    }

    /// Whether the sync task is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Subscribe to the provider and spawn the build-then-follow task.
    ///
    /// Must be called from within a tokio runtime. Notifications emitted
    /// while the build runs are buffered and applied after it.
    pub fn start(&self) -> Result<(), VaultError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Err(VaultError::AlreadyStarted);
        }

        let changes = self.provider.subscribe();
        let cancel = CancellationToken::new();
        let store = Arc::clone(&self.store);
        let names = Arc::clone(&self.names);
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            names.build().await;
            store.build_cache().await;
            Self::follow(store, names, changes, token).await;
        });

        *task = Some(SyncTask { cancel, handle });
        tracing::debug!("Vault sync started");
        Ok(())
    }

    /// Cancel the sync task and wait for it to finish.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                tracing::error!("Vault sync task failed: {}", e);
            }
        }
        tracing::debug!("Vault sync stopped");
    }

    /// Apply one raw notification to the index and the store.
    pub async fn apply(&self, change: VaultChange) {
        Self::handle_change(&self.store, &self.names, change).await;
    }

    async fn follow(
        store: Arc<MetadataStore>,
        names: Arc<NameIndex>,
        mut changes: broadcast::Receiver<VaultChange>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = changes.recv() => match received {
                    Ok(change) => Self::handle_change(&store, &names, change).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Missed vault changes, rebuilding caches");
                        names.build().await;
                        store.build_cache().await;
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Provider closed its change stream");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_change(store: &MetadataStore, names: &NameIndex, change: VaultChange) {
        tracing::trace!(path = %change.path().display(), "Applying vault change");
        match change {
            VaultChange::Created(file) => {
                names.add_entry(file.clone());
                store.add_entry(&file).await;
            }
            VaultChange::Deleted(file) => {
                names.remove_entry(&file);
                store.delete_entry(&file).await;
            }
            VaultChange::Renamed { file, old_path } => {
                names.rename_entry(file.clone(), &old_path);
                store.rename_entry(&file, &old_path).await;
            }
            VaultChange::Changed { file, snapshot } => {
                names.add_entry(file.clone());
                store.update_entry(&file, snapshot).await;
            }
        }
    }
}

impl Drop for VaultSync {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::events::{DomainEvent, DomainEventKind};
    use crate::vault::memory::MemoryVaultProvider;
    use crate::vault::name_index::NameLookup;
    use crate::vault::types::{FileHandle, Frontmatter, MetadataSnapshot};
    use std::path::Path;
    use std::time::Duration;

    fn snapshot(yaml: &str) -> MetadataSnapshot {
        MetadataSnapshot::with_frontmatter(Frontmatter::from_yaml(yaml).unwrap())
    }

    async fn next_event(rx: &mut broadcast::Receiver<DomainEvent>) -> DomainEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_start_builds_then_follows_changes() {
        let provider = Arc::new(MemoryVaultProvider::new());
        provider.seed("tasks/t.md", snapshot("type: Task\nstatus: Open"));
        let sync = VaultSync::new(provider.clone(), &VaultConfig::default());
        let store = sync.store();
        let mut events = store.subscribe();

        sync.start().unwrap();
        assert!(matches!(sync.start(), Err(VaultError::AlreadyStarted)));
        store.wait_until_ready().await;
        assert!(sync.names().find_by_name("t").unique().is_some());

        provider.modify("tasks/t.md", snapshot("type: Task\nstatus: Closed"));
        assert_eq!(
            next_event(&mut events).await.kind(),
            DomainEventKind::StatusChanged
        );
        assert_eq!(
            next_event(&mut events).await.kind(),
            DomainEventKind::TaskFileChanged
        );

        provider.rename(Path::new("tasks/t.md"), "done/t.md");
        assert_eq!(
            next_event(&mut events).await,
            DomainEvent::FileRenamed {
                old_path: "tasks/t.md".into(),
                new_path: "done/t.md".into(),
            }
        );
        assert_eq!(
            sync.names().find_by_name("t"),
            NameLookup::Unique(FileHandle::new("done/t.md"))
        );

        sync.stop().await;
        assert!(!sync.is_running());
    }

    #[tokio::test]
    async fn test_apply_routes_changes_to_store_and_index() {
        let provider = Arc::new(MemoryVaultProvider::new());
        let sync = VaultSync::new(provider.clone(), &VaultConfig::default());
        sync.names().build().await;
        sync.store().build_cache().await;

        let a = provider.seed("a/x.md", snapshot("type: Note"));
        sync.apply(VaultChange::Created(a.clone())).await;
        let b = provider.seed("b/x.md", snapshot("type: Note"));
        sync.apply(VaultChange::Created(b.clone())).await;
        assert_eq!(sync.names().find_by_name("x").files().len(), 2);
        assert_eq!(sync.store().len().await, 2);

        provider.delete(a.path());
        sync.apply(VaultChange::Deleted(a.clone())).await;
        assert_eq!(sync.names().find_by_name("x"), NameLookup::Unique(b));
        assert!(sync.store().get_entry_by_path(a.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let sync = VaultSync::new(Arc::new(MemoryVaultProvider::new()), &VaultConfig::default());
        sync.stop().await;
        assert!(!sync.is_running());
    }
}
