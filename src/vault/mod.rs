//! Vault metadata management.
//!
//! This module provides:
//! - `provider`: The file-system abstraction plus link resolution helpers
//! - `local` / `memory`: Directory-backed and in-process providers
//! - `store`: The path-keyed metadata cache and its domain events
//! - `name_index`: Name-to-file lookup with duplicate tracking
//! - `sync`: The service that keeps both caches current

pub mod deriver;
pub mod error;
pub mod events;
pub mod local;
pub mod memory;
pub mod name_index;
pub mod parser;
pub mod provider;
pub mod snapshot_cache;
pub mod store;
pub mod sync;
pub mod types;
pub mod watcher;

pub use deriver::{derive_events, rename_events, DerivationRules};
pub use error::{ProviderError, VaultError};
pub use events::{BusEvent, DomainEvent, DomainEventKind, EventBus, HandlerId};
pub use local::LocalVaultProvider;
pub use memory::MemoryVaultProvider;
pub use name_index::{DuplicateGroup, NameIndex, NameLookup};
pub use parser::parse_snapshot;
pub use provider::{FileSystemProvider, LinkGraph, VaultChange};
pub use snapshot_cache::{FileStamp, SnapshotCache, SnapshotCacheStats};
pub use store::{MetadataStore, MetadataStoreBuilder, StoreStats};
pub use sync::VaultSync;
pub use types::{
    CacheEntry, FileHandle, FileType, Frontmatter, Heading, LinkRef, MetadataSnapshot, StoreState,
    SubType, TypeTag,
};
pub use watcher::{DebouncedFileWatcher, FileChangeEvent, FileChangeKind, WatcherError};
