//! Error types for the vault metadata pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`FileSystemProvider`](crate::vault::FileSystemProvider).
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Reading a file or directory failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file's YAML frontmatter could not be parsed.
    #[error("Invalid frontmatter in {path}: {source}")]
    Frontmatter {
        /// Vault-relative path of the file.
        path: PathBuf,
        /// Parser error.
        source: serde_yaml::Error,
    },

    /// The filesystem watcher failed.
    #[error(transparent)]
    Watcher(#[from] crate::vault::watcher::WatcherError),
}

/// Errors raised by the metadata store and sync service.
///
/// Query methods on the store log these and degrade to `None`; only wiring
/// mistakes are returned to the caller.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The store has not finished its initial build.
    #[error("Metadata store is not ready")]
    NotReady,

    /// No entry exists for the path.
    #[error("No cache entry for {0}")]
    NotFound(PathBuf),

    /// The type field holds a value outside the known set.
    #[error("Unrecognized file type {value:?} in {path}")]
    MalformedType {
        /// Vault-relative path of the file.
        path: PathBuf,
        /// The offending value.
        value: String,
    },

    /// The provider could not produce a snapshot.
    #[error("Failed to fetch metadata for {path}: {source}")]
    Fetch {
        /// Vault-relative path of the file.
        path: PathBuf,
        /// Provider failure.
        source: ProviderError,
    },

    /// A required collaborator was not supplied.
    #[error("Missing required dependency: {0}")]
    MissingDependency(&'static str),

    /// The sync service is already running.
    #[error("Vault sync is already running")]
    AlreadyStarted,
}
