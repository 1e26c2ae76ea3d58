//! Debounced file watcher with native/polling fallback.
//!
//! Raw `notify` events are collected into a per-path pending map and
//! coalesced, then released as one ordered batch once the debounce period
//! has elapsed. Renames reported with both paths are kept as a single
//! [`FileChangeKind::Rename`] carrying the old path.

use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur in the file watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The notify backend could not be created.
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    /// A path could not be watched.
    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        /// Path passed to `watch`.
        path: PathBuf,
        /// Backend error.
        source: notify::Error,
    },
}

/// A coalesced file change.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChangeEvent {
    /// Path the change applies to (the new path for renames).
    pub path: PathBuf,
    /// What happened.
    pub kind: FileChangeKind,
    /// Previous path, for renames.
    pub from: Option<PathBuf>,
    /// When the change was last seen.
    pub timestamp: Instant,
}

impl FileChangeEvent {
    /// A change of `kind` at `path`.
    pub fn new(path: PathBuf, kind: FileChangeKind) -> Self {
        Self {
            path,
            kind,
            from: None,
            timestamp: Instant::now(),
        }
    }

    /// A rename from `from` to `to`.
    pub fn rename(from: PathBuf, to: PathBuf) -> Self {
        Self {
            path: to,
            kind: FileChangeKind::Rename,
            from: Some(from),
            timestamp: Instant::now(),
        }
    }
}

/// Simplified event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    /// A file or directory appeared.
    Create,
    /// Content changed.
    Modify,
    /// A file or directory was removed.
    Remove,
    /// A path moved.
    Rename,
}

/// Translate one raw notify event into zero or more change events.
fn translate(event: Event) -> Vec<FileChangeEvent> {
    match event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(|path| FileChangeEvent::new(path, FileChangeKind::Create))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .map(|path| FileChangeEvent::new(path, FileChangeKind::Remove))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            let mut paths = event.paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileChangeEvent::rename(from, to)],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(|path| FileChangeEvent::new(path, FileChangeKind::Remove))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(|path| FileChangeEvent::new(path, FileChangeKind::Create))
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => event
            .paths
            .into_iter()
            .map(|path| {
                // Unknown kinds carry no direction; infer it from the disk.
                let kind = if path.exists() {
                    FileChangeKind::Modify
                } else {
                    FileChangeKind::Remove
                };
                FileChangeEvent::new(path, kind)
            })
            .collect(),
    }
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    event: FileChangeEvent,
}

/// Per-path pending events, coalesced on insert.
#[derive(Debug, Default)]
pub(crate) struct PendingEvents {
    by_path: HashMap<PathBuf, Pending>,
    next_seq: u64,
}

impl PendingEvents {
    /// Rules:
    /// - REMOVE then CREATE = MODIFY (file replaced)
    /// - CREATE then REMOVE = nothing (file never visible)
    /// - CREATE/RENAME then MODIFY = unchanged
    /// - RENAME a->b then RENAME b->c = RENAME a->c
    /// - RENAME a->b then REMOVE b = REMOVE a
    /// - otherwise the latest event wins
    pub(crate) fn record(&mut self, mut event: FileChangeEvent) {
        if let Some(from) = event.from.take() {
            // A paired rename supersedes the halves already seen, and keeps
            // the first source when its own source was just renamed.
            let origin = match self.by_path.remove(&from) {
                Some(prior) if prior.event.kind == FileChangeKind::Rename => {
                    prior.event.from.unwrap_or(from)
                }
                _ => from,
            };
            if origin == event.path {
                event.kind = FileChangeKind::Modify;
            } else {
                event.from = Some(origin);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        match self.by_path.get_mut(&event.path) {
            Some(existing) => match (existing.event.kind, event.kind) {
                (FileChangeKind::Remove, FileChangeKind::Create) => {
                    existing.event.kind = FileChangeKind::Modify;
                    existing.event.timestamp = event.timestamp;
                    existing.seq = seq;
                }
                (FileChangeKind::Create, FileChangeKind::Remove) => {
                    self.by_path.remove(&event.path);
                }
                (FileChangeKind::Create | FileChangeKind::Rename, FileChangeKind::Modify) => {
                    existing.event.timestamp = event.timestamp;
                }
                (FileChangeKind::Rename, FileChangeKind::Remove) => {
                    let origin = existing.event.from.clone();
                    self.by_path.remove(&event.path);
                    if let Some(origin) = origin {
                        let removed = FileChangeEvent::new(origin.clone(), FileChangeKind::Remove);
                        self.by_path.insert(origin, Pending { seq, event: removed });
                    }
                }
                _ => {
                    *existing = Pending { seq, event };
                }
            },
            None => {
                self.by_path.insert(event.path.clone(), Pending { seq, event });
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Drain in arrival order.
    pub(crate) fn drain(&mut self) -> Vec<FileChangeEvent> {
        let mut pending: Vec<Pending> = self.by_path.drain().map(|(_, p)| p).collect();
        pending.sort_by_key(|p| p.seq);
        pending.into_iter().map(|p| p.event).collect()
    }
}

/// A debounced file watcher that prefers native notifications and falls
/// back to polling for paths where they are unavailable (NFS, WSL, etc.).
pub struct DebouncedFileWatcher {
    native_watcher: Option<RecommendedWatcher>,
    poll_watcher: PollWatcher,
    event_rx: Receiver<Result<Event, notify::Error>>,
    polled_paths: Vec<PathBuf>,
    pending: PendingEvents,
    debounce_duration: Duration,
    last_flush: Instant,
}

impl DebouncedFileWatcher {
    /// Creates a new watcher.
    ///
    /// # Arguments
    /// * `debounce_ms` - Minimum time between batches (recommended: 100-300ms)
    /// * `poll_interval_ms` - Interval for the polling fallback
    pub fn new(debounce_ms: u64, poll_interval_ms: u64) -> Result<Self, WatcherError> {
        let (tx, rx) = channel();
        let poll_tx = tx.clone();

        let native_config = Config::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_compare_contents(false);
        let native_watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = tx.send(res);
            },
            native_config,
        )
        .ok();

        let poll_config = Config::default()
            .with_poll_interval(Duration::from_millis(poll_interval_ms))
            .with_compare_contents(false);
        let poll_watcher = PollWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let _ = poll_tx.send(res);
            },
            poll_config,
        )?;

        Ok(Self {
            native_watcher,
            poll_watcher,
            event_rx: rx,
            polled_paths: Vec::new(),
            pending: PendingEvents::default(),
            debounce_duration: Duration::from_millis(debounce_ms),
            last_flush: Instant::now(),
        })
    }

    /// Start watching a path recursively.
    pub fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        if let Some(native) = self.native_watcher.as_mut() {
            match native.watch(path, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::debug!("Using native watcher for {}", path.display());
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Native watcher failed for {}: {}, falling back to polling",
                        path.display(),
                        e
                    );
                }
            }
        }

        tracing::debug!("Using poll watcher for {}", path.display());
        self.poll_watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchPath {
                path: path.to_path_buf(),
                source: e,
            })?;
        self.polled_paths.push(path.to_path_buf());
        Ok(())
    }

    /// Stop watching a path.
    pub fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        let result = if let Some(index) = self.polled_paths.iter().position(|p| p == path) {
            self.polled_paths.remove(index);
            self.poll_watcher.unwatch(path)
        } else if let Some(native) = self.native_watcher.as_mut() {
            native.unwatch(path)
        } else {
            Ok(())
        };
        result.map_err(|e| WatcherError::WatchPath {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Whether `path` is watched through the polling fallback.
    pub fn is_using_polling(&self, path: &Path) -> bool {
        self.polled_paths.iter().any(|p| p == path)
    }

    /// Drain raw events from notify into the pending set.
    pub fn poll_events(&mut self) {
        while let Ok(result) = self.event_rx.try_recv() {
            match result {
                Ok(event) => {
                    for change in translate(event) {
                        self.pending.record(change);
                    }
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            }
        }
    }

    /// Release the pending batch if the debounce period has elapsed.
    ///
    /// Returns an empty batch while still debouncing.
    pub fn flush_if_ready(&mut self) -> Vec<FileChangeEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let now = Instant::now();
        if now.duration_since(self.last_flush) < self.debounce_duration {
            return Vec::new();
        }
        self.last_flush = now;
        self.pending.drain()
    }
}
