//! Domain event derivation.
//!
//! Compares the previous and new snapshot of a file and decides which domain
//! events to publish, keyed by the file type declared in the new snapshot:
//!
//! | type                   | emits                                                        |
//! |------------------------|--------------------------------------------------------------|
//! | Topic / Project / Task | `status-changed` (if status differs), `task-file-changed`,   |
//! |                        | `kanban-changed` (if subtype is Kanban)                      |
//! | Metadata               | `document-metadata-changed`                                  |
//! | Note                   | nothing                                                      |
//! | missing                | nothing                                                      |
//! | invalid                | nothing, reported as [`VaultError::MalformedType`]           |
//!
//! Files under the template folder never produce events.

use std::path::{Path, PathBuf};

use crate::config::VaultConfig;
use crate::vault::error::VaultError;
use crate::vault::events::DomainEvent;
use crate::vault::types::{FileHandle, FileType, MetadataSnapshot, SubType, TypeTag};

/// Field names and suppression prefix used during derivation.
#[derive(Debug, Clone)]
pub struct DerivationRules {
    /// Vault-relative folder exempt from domain events.
    pub template_folder: Option<PathBuf>,
    /// Frontmatter key holding the file type.
    pub type_field: String,
    /// Frontmatter key holding the status.
    pub status_field: String,
    /// Frontmatter key holding the sub-type.
    pub sub_type_field: String,
}

impl Default for DerivationRules {
    fn default() -> Self {
        Self::from(&VaultConfig::default())
    }
}

impl From<&VaultConfig> for DerivationRules {
    fn from(config: &VaultConfig) -> Self {
        Self {
            template_folder: config.template_folder.clone(),
            type_field: config.type_field.clone(),
            status_field: config.status_field.clone(),
            sub_type_field: config.sub_type_field.clone(),
        }
    }
}

impl DerivationRules {
    /// Whether `path` lies under the template folder (component-wise).
    pub fn is_template(&self, path: &Path) -> bool {
        match &self.template_folder {
            Some(folder) if !folder.as_os_str().is_empty() => path.starts_with(folder),
            _ => false,
        }
    }
}

/// Events for a content change of `file` from `old` to `new`.
pub fn derive_events(
    rules: &DerivationRules,
    old: &MetadataSnapshot,
    new: &MetadataSnapshot,
    file: &FileHandle,
) -> Result<Vec<DomainEvent>, VaultError> {
    if rules.is_template(file.path()) {
        return Ok(Vec::new());
    }

    let file_type = match new.type_tag(&rules.type_field) {
        TypeTag::Typed(file_type) => file_type,
        TypeTag::Missing => return Ok(Vec::new()),
        TypeTag::Invalid(value) => {
            return Err(VaultError::MalformedType {
                path: file.path().to_path_buf(),
                value,
            })
        }
    };

    let events = match file_type {
        FileType::Topic | FileType::Project | FileType::Task => {
            let mut events = Vec::with_capacity(3);
            let old_status = old.frontmatter.get(&rules.status_field);
            let new_status = new.frontmatter.get(&rules.status_field);
            if old_status != new_status {
                events.push(DomainEvent::StatusChanged(file.clone()));
            }
            events.push(DomainEvent::TaskFileChanged(file.clone()));
            if new.sub_type(&rules.sub_type_field) == Some(SubType::Kanban) {
                events.push(DomainEvent::KanbanChanged(file.clone()));
            }
            events
        }
        FileType::Metadata => vec![DomainEvent::DocumentMetadataChanged(file.clone())],
        FileType::Note => Vec::new(),
    };
    Ok(events)
}

/// Events for a rename; suppressed when the new path is a template.
pub fn rename_events(
    rules: &DerivationRules,
    file: &FileHandle,
    old_path: &Path,
) -> Vec<DomainEvent> {
    if rules.is_template(file.path()) {
        return Vec::new();
    }
    vec![DomainEvent::FileRenamed {
        old_path: old_path.to_path_buf(),
        new_path: file.path().to_path_buf(),
    }]
}
