//! Typed publish/subscribe bus and the domain events derived from snapshots.
//!
//! `EventBus` is generic over a [`BusEvent`] contract: every event type names
//! itself with a closed set of keys and declares what its handlers return.
//! Handlers are stored per name so dispatch only touches matching handlers.
//! A failing or panicking handler is logged and never aborts its siblings.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::vault::types::FileHandle;

/// Contract between an event type and the bus that carries it.
pub trait BusEvent: Send + Sync + 'static {
    /// Closed set of event names.
    type Name: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Value each handler produces for this event.
    type Output: Send + 'static;

    /// The name handlers are registered under.
    fn name(&self) -> Self::Name;
}

/// A registered event handler.
pub type Handler<E> =
    Arc<dyn Fn(&E) -> anyhow::Result<<E as BusEvent>::Output> + Send + Sync + 'static>;

/// Identifies a registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration<E: BusEvent> {
    id: HandlerId,
    handler: Handler<E>,
}

impl<E: BusEvent> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Map-of-lists event bus.
pub struct EventBus<E: BusEvent> {
    handlers: RwLock<HashMap<E::Name, Vec<Registration<E>>>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event name.
    pub fn register_event<F>(&self, name: E::Name, handler: F) -> HandlerId
    where
        F: Fn(&E) -> anyhow::Result<E::Output> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(name)
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a handler. Returns `false` if it was not registered under `name`.
    pub fn deregister_event(&self, name: E::Name, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|registration| registration.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&name);
        }
        removed
    }

    /// Number of handlers registered for `name`.
    pub fn handler_count(&self, name: E::Name) -> usize {
        self.handlers.read().get(&name).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's name.
    ///
    /// Each successful result is passed to `callback`. Returns the number of
    /// handlers that completed successfully.
    pub fn fire_event(
        &self,
        event: &E,
        mut callback: Option<&mut dyn FnMut(E::Output)>,
    ) -> usize {
        let name = event.name();
        // Snapshot the list so handlers may (de)register while we dispatch.
        let registrations = match self.handlers.read().get(&name) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut succeeded = 0;
        for registration in registrations {
            let handler = &registration.handler;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(output)) => {
                    succeeded += 1;
                    if let Some(callback) = callback.as_mut() {
                        callback(output);
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(event = ?name, handler = registration.id.0, "Event handler failed: {:#}", e);
                }
                Err(_) => {
                    tracing::error!(event = ?name, handler = registration.id.0, "Event handler panicked");
                }
            }
        }
        succeeded
    }
}

/// Names of the domain events published by the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventKind {
    /// A typed file's status field changed.
    StatusChanged,
    /// A topic, project or task file changed.
    TaskFileChanged,
    /// A kanban board file changed.
    KanbanChanged,
    /// A metadata document changed.
    DocumentMetadataChanged,
    /// A file moved to a new path.
    FileRenamed,
}

impl DomainEventKind {
    /// Wire name, e.g. `status-changed`.
    pub fn as_str(self) -> &'static str {
        match self {
            DomainEventKind::StatusChanged => "status-changed",
            DomainEventKind::TaskFileChanged => "task-file-changed",
            DomainEventKind::KanbanChanged => "kanban-changed",
            DomainEventKind::DocumentMetadataChanged => "document-metadata-changed",
            DomainEventKind::FileRenamed => "file-renamed",
        }
    }
}

impl fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A semantically named change, derived from raw file notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A typed file's status field changed.
    StatusChanged(FileHandle),
    /// A topic, project or task file changed.
    TaskFileChanged(FileHandle),
    /// A kanban board file changed.
    KanbanChanged(FileHandle),
    /// A metadata document changed.
    DocumentMetadataChanged(FileHandle),
    /// A file moved from `old_path` to `new_path`.
    FileRenamed {
        /// Path before the move.
        old_path: PathBuf,
        /// Path after the move.
        new_path: PathBuf,
    },
}

impl DomainEvent {
    /// The kind handlers are registered under.
    pub fn kind(&self) -> DomainEventKind {
        match self {
            DomainEvent::StatusChanged(_) => DomainEventKind::StatusChanged,
            DomainEvent::TaskFileChanged(_) => DomainEventKind::TaskFileChanged,
            DomainEvent::KanbanChanged(_) => DomainEventKind::KanbanChanged,
            DomainEvent::DocumentMetadataChanged(_) => DomainEventKind::DocumentMetadataChanged,
            DomainEvent::FileRenamed { .. } => DomainEventKind::FileRenamed,
        }
    }

    /// The file the event concerns, if it carries a handle.
    pub fn file(&self) -> Option<&FileHandle> {
        match self {
            DomainEvent::StatusChanged(file)
            | DomainEvent::TaskFileChanged(file)
            | DomainEvent::KanbanChanged(file)
            | DomainEvent::DocumentMetadataChanged(file) => Some(file),
            DomainEvent::FileRenamed { .. } => None,
        }
    }
}

impl BusEvent for DomainEvent {
    type Name = DomainEventKind;
    type Output = ();

    fn name(&self) -> Self::Name {
        self.kind()
    }
}
