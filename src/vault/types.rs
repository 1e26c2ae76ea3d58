//! Core data model: file handles, metadata snapshots and cache entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identity of a document in the vault.
///
/// The path is vault-relative and unique. The name is the file stem
/// (`notes/todo.md` -> `todo`) and may be shared by several files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle {
    path: PathBuf,
    name: String,
}

impl FileHandle {
    /// Create a handle for a vault-relative path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = name_of(&path);
        Self { path, name }
    }

    /// Vault-relative path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem used for name lookups.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File extension, if any.
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Short name of a path: its file stem, lossily converted.
pub fn name_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Key/value frontmatter block of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frontmatter(BTreeMap<String, serde_yaml::Value>);

impl Frontmatter {
    /// Create an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML mapping. An empty document yields empty frontmatter.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.0.get(key)
    }

    /// Get a field as a string slice, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.as_str())
    }

    /// Set `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: &str) -> Option<serde_yaml::Value> {
        self.0.remove(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the block has no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate keys in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_yaml::Value)> {
        self.0.iter()
    }
}

/// A markdown heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Heading text without the `#` markers.
    pub text: String,
    /// Heading level, 1 to 6.
    pub level: u8,
    /// Zero-based line the heading starts on.
    pub line: usize,
}

/// An outgoing link as written in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    /// Link target text, e.g. `Projects/Alpha` or `Alpha#Goals`.
    pub target: String,
    /// Zero-based line the link starts on.
    pub line: usize,
}

impl LinkRef {
    /// Link to `target` on `line`.
    pub fn new(target: impl Into<String>, line: usize) -> Self {
        Self {
            target: target.into(),
            line,
        }
    }
}

/// Structured metadata extracted from one file's current content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSnapshot {
    /// Parsed YAML frontmatter.
    pub frontmatter: Frontmatter,
    /// Headings in document order.
    pub headings: Vec<Heading>,
    /// Outgoing links in document order.
    pub links: Vec<LinkRef>,
}

impl MetadataSnapshot {
    /// Snapshot with only a frontmatter block.
    pub fn with_frontmatter(frontmatter: Frontmatter) -> Self {
        Self {
            frontmatter,
            ..Default::default()
        }
    }

    /// Classify the snapshot by the reserved type field.
    pub fn type_tag(&self, type_field: &str) -> TypeTag {
        match self.frontmatter.get(type_field) {
            None | Some(serde_yaml::Value::Null) => TypeTag::Missing,
            Some(serde_yaml::Value::String(raw)) => match raw.parse::<FileType>() {
                Ok(file_type) => TypeTag::Typed(file_type),
                Err(_) => TypeTag::Invalid(raw.clone()),
            },
            Some(other) => TypeTag::Invalid(format!("{other:?}")),
        }
    }

    /// Sub-type, when the field names a known one.
    pub fn sub_type(&self, sub_type_field: &str) -> Option<SubType> {
        self.frontmatter
            .get_str(sub_type_field)
            .and_then(|raw| raw.parse().ok())
    }
}

/// Declared document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// A topic page.
    Topic,
    /// A project.
    Project,
    /// A task.
    Task,
    /// A metadata document.
    Metadata,
    /// A plain note.
    Note,
}

impl FileType {
    /// Every file type.
    pub const ALL: [FileType; 5] = [
        FileType::Topic,
        FileType::Project,
        FileType::Task,
        FileType::Metadata,
        FileType::Note,
    ];

    /// The frontmatter spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Topic => "Topic",
            FileType::Project => "Project",
            FileType::Task => "Task",
            FileType::Metadata => "Metadata",
            FileType::Note => "Note",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        FileType::ALL
            .into_iter()
            .find(|file_type| file_type.as_str() == raw)
            .ok_or(())
    }
}

/// Secondary document type for task-like files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubType {
    /// A kanban board.
    Kanban,
}

impl FromStr for SubType {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "Kanban" => Ok(SubType::Kanban),
            _ => Err(()),
        }
    }
}

/// Result of reading the type field of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// A recognized type.
    Typed(FileType),
    /// No type field at all.
    Missing,
    /// A type field whose value is outside the closed set.
    Invalid(String),
}

/// A file together with its latest snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The file.
    pub file: FileHandle,
    /// Its current metadata.
    pub metadata: MetadataSnapshot,
}

/// Lifecycle state of the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreState {
    /// No build has started.
    #[default]
    Uninitialized,
    /// A build is running.
    Building,
    /// The cache is built.
    Ready,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(yaml: &str) -> MetadataSnapshot {
        MetadataSnapshot::with_frontmatter(Frontmatter::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_handle_name_is_file_stem() {
        let file = FileHandle::new("Projects/Alpha/plan.md");
        assert_eq!(file.name(), "plan");
        assert_eq!(file.extension(), Some("md"));
    }

    #[test]
    fn test_type_tag_classification() {
        assert_eq!(snapshot("type: Task").type_tag("type"), TypeTag::Typed(FileType::Task));
        assert_eq!(snapshot("status: Open").type_tag("type"), TypeTag::Missing);
        assert_eq!(
            snapshot("type: Recipe").type_tag("type"),
            TypeTag::Invalid("Recipe".to_string())
        );
        assert!(matches!(snapshot("type: 4").type_tag("type"), TypeTag::Invalid(_)));
    }

    #[test]
    fn test_sub_type_only_recognizes_kanban() {
        assert_eq!(snapshot("subType: Kanban").sub_type("subType"), Some(SubType::Kanban));
        assert_eq!(snapshot("subType: List").sub_type("subType"), None);
    }

    #[test]
    fn test_empty_frontmatter_yaml() {
        assert!(Frontmatter::from_yaml("  \n").unwrap().is_empty());
    }
}
