//! Vault Metadata Cache
//!
//! An in-memory cache of per-file metadata for a vault of markdown notes,
//! kept in sync with filesystem changes and translated into typed domain
//! events that downstream components subscribe to.
//!
//! ## Flow
//!
//! ```text
//! Filesystem Change
//!        ↓
//! DebouncedFileWatcher (coalesces events within the debounce window)
//!        ↓
//! LocalVaultProvider::apply_batch() → VaultChange broadcast
//!        ↓
//! VaultSync (one task, arrival order)
//!        ↓                       ↓
//! NameIndex               MetadataStore → derive_events()
//!                                ↓
//!                  EventBus handlers + DomainEvent broadcast
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vault_metadata_cache::{prelude::*, run_sync_loop};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = VaultConfig::builder("/path/to/vault")
//!         .template_folder("Templates")
//!         .build();
//!     let provider = Arc::new(LocalVaultProvider::open(&config).await?);
//!
//!     let sync = VaultSync::new(provider.clone(), &config);
//!     let store = sync.store();
//!     store.on(DomainEventKind::StatusChanged, |event| {
//!         println!("status changed: {:?}", event.file());
//!         Ok(())
//!     });
//!     sync.start()?;
//!     store.wait_until_ready().await;
//!
//!     let mut watcher = DebouncedFileWatcher::new(config.debounce_ms, config.poll_interval_ms)?;
//!     watcher.watch(provider.root())?;
//!     run_sync_loop(&mut watcher, &provider, 50, CancellationToken::new()).await;
//!
//!     sync.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`config`]: Runtime configuration
//! - [`vault`]: Providers, caches, event derivation and the sync service
//!   - [`vault::watcher`]: Debounced native/polling file watcher
//!   - [`vault::store`]: Metadata store and domain events
//!   - [`vault::name_index`]: Name lookup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod vault;

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::config::{VaultConfig, VaultConfigBuilder};
    pub use crate::vault::{
        CacheEntry, DebouncedFileWatcher, DomainEvent, DomainEventKind, FileHandle,
        FileSystemProvider, FileType, HandlerId, LocalVaultProvider, MemoryVaultProvider,
        MetadataSnapshot, MetadataStore, NameIndex, NameLookup, StoreState, VaultChange,
        VaultError, VaultSync,
    };
}

/// Run the file watcher loop for a local vault.
///
/// Polls the watcher, flushes debounced batches when ready and hands them
/// to the provider, which publishes the resulting vault changes. Returns
/// once `cancel` fires.
///
/// # Arguments
/// * `watcher` - The file watcher to poll, already watching the vault root
/// * `provider` - The provider that translates batches into vault changes
/// * `poll_interval_ms` - How often to poll the watcher (typically 50ms)
pub async fn run_sync_loop(
    watcher: &mut vault::DebouncedFileWatcher,
    provider: &vault::LocalVaultProvider,
    poll_interval_ms: u64,
    cancel: tokio_util::sync::CancellationToken,
) {
    let poll_interval = std::time::Duration::from_millis(poll_interval_ms);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {
                watcher.poll_events();
                let batch = watcher.flush_if_ready();
                if batch.is_empty() {
                    continue;
                }
                let emitted = provider.apply_batch(batch).await;
                tracing::debug!(emitted, "Applied watcher batch");
            }
        }
    }
}
