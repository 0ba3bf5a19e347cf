//! Operation outcomes and domain conflicts.

use crate::metadata::FileMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use synchub_types::{FilePath, StorageKey};

/// A rejected operation caused by concurrent editing.
///
/// Conflicts are expected under multi-client use and are returned as
/// values; the request layer turns them into client-visible statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conflict {
    /// Something already exists at the path.
    AlreadyExists {
        /// The occupied path.
        path: FilePath,
    },
    /// Nothing exists at the path.
    NotFound {
        /// The missing path.
        path: FilePath,
    },
    /// The parent folder does not exist.
    ParentMissing {
        /// The path whose parent is missing.
        path: FilePath,
    },
    /// The parent is a file.
    NotAFolder {
        /// The parent path.
        path: FilePath,
    },
    /// A folder cannot move into its own subtree.
    InvalidTarget {
        /// Source of the move.
        from: FilePath,
        /// Rejected target.
        to: FilePath,
    },
    /// The caller's base revision is not the current one.
    StaleRevision {
        /// The modified path.
        path: FilePath,
        /// The current revision, if any.
        latest: Option<String>,
    },
    /// A revision string is not 32 hex characters.
    MalformedRevision {
        /// The rejected revision.
        revision: String,
    },
    /// A file cannot become a folder or the other way round.
    TypeMismatch {
        /// The path.
        path: FilePath,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists { path } => write!(f, "{path} already exists"),
            Self::NotFound { path } => write!(f, "{path} not found"),
            Self::ParentMissing { path } => write!(f, "parent of {path} does not exist"),
            Self::NotAFolder { path } => write!(f, "{path} is not a folder"),
            Self::InvalidTarget { from, to } => write!(f, "cannot move {from} into {to}"),
            Self::StaleRevision { path, latest } => match latest {
                Some(latest) => write!(f, "stale revision for {path}, latest is {latest}"),
                None => write!(f, "stale revision for {path}"),
            },
            Self::MalformedRevision { revision } => write!(f, "malformed revision {revision:?}"),
            Self::TypeMismatch { path } => write!(f, "{path} changes between file and folder"),
        }
    }
}

/// Result of an operation that may hit a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    /// The operation took effect.
    Applied(T),
    /// The operation was rejected and nothing changed.
    Conflict(Conflict),
}

impl<T> Outcome<T> {
    /// Returns true if the operation was rejected.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// The applied value, if any.
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Conflict(_) => None,
        }
    }

    /// The conflict, if any.
    #[must_use]
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Applied(_) => None,
            Self::Conflict(conflict) => Some(conflict),
        }
    }

    /// Maps the applied value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Applied(value) => Outcome::Applied(f(value)),
            Self::Conflict(conflict) => Outcome::Conflict(conflict),
        }
    }
}

/// A file entry written to a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Metadata as stored, storage key included.
    pub metadata: FileMetadata,
    /// Whether the content still has to be uploaded.
    pub pending: bool,
    /// Whether this caller is expected to upload it.
    pub new_upload: bool,
}

impl StoredFile {
    /// Key of the blob holding the content.
    #[must_use]
    pub fn storage_key(&self) -> Option<&StorageKey> {
        self.metadata.storage_key.as_ref()
    }
}
