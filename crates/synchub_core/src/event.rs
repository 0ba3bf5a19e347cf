//! Change records of a user's event log.

use crate::metadata::FileMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use synchub_types::{FilePath, StorageKey, SyncId};

/// Kind of a file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// An entry appeared.
    Created,
    /// An entry's content or metadata changed.
    Modified,
    /// An entry and everything below it went away.
    Deleted,
    /// An entry and everything below it moved.
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        };
        f.write_str(name)
    }
}

/// One change as consumers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// What happened.
    pub kind: ChangeKind,
    /// Source path of a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<FilePath>,
    /// Path the change applies to (target path of a rename).
    pub new_path: FilePath,
    /// Metadata of the entry after the change (before, for deletions).
    pub metadata: FileMetadata,
}

impl FileChange {
    /// A creation at `path`.
    #[must_use]
    pub fn created(path: FilePath, metadata: FileMetadata) -> Self {
        Self {
            kind: ChangeKind::Created,
            old_path: None,
            new_path: path,
            metadata,
        }
    }

    /// A modification at `path`.
    #[must_use]
    pub fn modified(path: FilePath, metadata: FileMetadata) -> Self {
        Self {
            kind: ChangeKind::Modified,
            old_path: None,
            new_path: path,
            metadata,
        }
    }

    /// A deletion of `path` and its subtree.
    #[must_use]
    pub fn deleted(path: FilePath, metadata: FileMetadata) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            old_path: None,
            new_path: path,
            metadata,
        }
    }

    /// A move of `from` and its subtree to `to`.
    #[must_use]
    pub fn renamed(from: FilePath, to: FilePath, metadata: FileMetadata) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            old_path: Some(from),
            new_path: to,
            metadata,
        }
    }

    /// Content key the change refers to, if any.
    #[must_use]
    pub fn storage_key(&self) -> Option<&StorageKey> {
        self.metadata.storage_key.as_ref()
    }

    /// Returns true for `Created` and `Modified`.
    #[must_use]
    pub fn writes_content(&self) -> bool {
        matches!(self.kind, ChangeKind::Created | ChangeKind::Modified)
    }
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(from) => write!(f, "{} {} -> {}", self.kind, from, self.new_path),
            None => write!(f, "{} {}", self.kind, self.new_path),
        }
    }
}

/// An entry of a user's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// Position in the log.
    pub sync_id: SyncId,
    /// The change.
    pub change: FileChange,
    /// Metadata the entry had before a modification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<FileMetadata>,
}

impl UserEvent {
    /// Creates an event without previous metadata.
    #[must_use]
    pub fn new(sync_id: SyncId, change: FileChange) -> Self {
        Self {
            sync_id,
            change,
            previous: None,
        }
    }

    /// Attaches the metadata the entry had before.
    #[must_use]
    pub fn with_previous(mut self, previous: Option<FileMetadata>) -> Self {
        self.previous = previous;
        self
    }

    /// Kind of the change.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        self.change.kind
    }

    /// Path the change applies to.
    #[must_use]
    pub fn path(&self) -> &FilePath {
        &self.change.new_path
    }
}

/// The answer to a change query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Visible changes, in log order.
    pub changes: Vec<FileChange>,
    /// Cursor to pass to the next query.
    pub cursor: SyncId,
}

impl ChangeBatch {
    /// Returns true if the batch has no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn p(s: &str) -> FilePath {
        FilePath::parse(s).unwrap()
    }

    #[test]
    fn display_forms() {
        let md = FileMetadata::folder(Utc::now());
        assert_eq!(
            FileChange::created(p("/docs"), md.clone()).to_string(),
            "created /docs"
        );
        assert_eq!(
            FileChange::renamed(p("/a"), p("/b"), md).to_string(),
            "renamed /a -> /b"
        );
    }

    #[test]
    fn content_writes() {
        let md = FileMetadata::folder(Utc::now());
        assert!(FileChange::created(p("/a"), md.clone()).writes_content());
        assert!(FileChange::modified(p("/a"), md.clone()).writes_content());
        assert!(!FileChange::deleted(p("/a"), md.clone()).writes_content());
        assert!(!FileChange::renamed(p("/a"), p("/b"), md).writes_content());
    }

    #[test]
    fn event_accessors() {
        let md = FileMetadata::folder(Utc::now());
        let event = UserEvent::new(SyncId::new(4), FileChange::deleted(p("/x"), md.clone()))
            .with_previous(Some(md));
        assert_eq!(event.kind(), ChangeKind::Deleted);
        assert_eq!(event.path(), &p("/x"));
        assert!(event.previous.is_some());
    }
}
