//! File and folder metadata.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synchub_types::{ContentKey, FilePath, Md5Hash, StorageKey, MD5_LEN};

/// Metadata of one tree entry.
///
/// Folders carry no content fields. Files carry their size, their revision
/// (the lowercase hex MD5 of the content) and, once registered with the
/// content store, the key of the blob holding the bytes.
///
/// Metadata is replaced wholesale on update; callers never patch single
/// fields of an entry that is already in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Whether this entry is a folder.
    pub is_folder: bool,
    /// When the entry was created.
    pub creation_time: DateTime<Utc>,
    /// When the entry was last modified.
    pub last_modified_time: DateTime<Utc>,
    /// Content length; `None` for folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Blob holding the content; `None` for folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<StorageKey>,
    /// Hex MD5 of the content; `None` for folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Target of a link entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target_path: Option<FilePath>,
}

impl FileMetadata {
    /// Metadata of a new folder.
    #[must_use]
    pub fn folder(now: DateTime<Utc>) -> Self {
        Self {
            is_folder: true,
            creation_time: now,
            last_modified_time: now,
            size: None,
            storage_key: None,
            revision: None,
            link_target_path: None,
        }
    }

    /// Metadata of a new file with the given content.
    ///
    /// The storage key is assigned when the file is added to a tree.
    #[must_use]
    pub fn file(hash: Md5Hash, size: u64, now: DateTime<Utc>) -> Self {
        Self {
            is_folder: false,
            creation_time: now,
            last_modified_time: now,
            size: Some(size),
            storage_key: None,
            revision: Some(hash.to_hex()),
            link_target_path: None,
        }
    }

    /// Returns a copy pointing at a link target.
    #[must_use]
    pub fn with_link_target(mut self, target: FilePath) -> Self {
        self.link_target_path = Some(target);
        self
    }

    /// Returns a copy with new content, keeping the creation time.
    #[must_use]
    pub fn with_content(&self, hash: Md5Hash, size: u64, now: DateTime<Utc>) -> Self {
        Self {
            last_modified_time: now,
            size: Some(size),
            storage_key: None,
            revision: Some(hash.to_hex()),
            ..self.clone()
        }
    }

    /// Checks the folder/file shape.
    ///
    /// Folders must not carry a size, revision or storage key. Files must
    /// carry a size and a well-formed revision.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] on a malformed shape.
    pub fn validate(&self) -> CoreResult<()> {
        if self.is_folder {
            if self.size.is_some() || self.revision.is_some() || self.storage_key.is_some() {
                return Err(CoreError::invalid_argument(
                    "folder metadata must not carry content fields",
                ));
            }
            return Ok(());
        }
        if self.size.is_none() {
            return Err(CoreError::invalid_argument("file metadata needs a size"));
        }
        match &self.revision {
            Some(revision) if is_well_formed_revision(revision) => Ok(()),
            Some(revision) => Err(CoreError::invalid_argument(format!(
                "file revision {revision:?} is not a {MD5_LEN}-byte hex digest"
            ))),
            None => Err(CoreError::invalid_argument("file metadata needs a revision")),
        }
    }

    /// Content identity of a file.
    ///
    /// # Errors
    ///
    /// Returns an error for folders and malformed files.
    pub fn content_key(&self) -> CoreResult<ContentKey> {
        self.validate()?;
        match (&self.revision, self.size) {
            (Some(revision), Some(size)) => Ok(ContentKey::new(Md5Hash::from_hex(revision)?, size)),
            _ => Err(CoreError::invalid_argument("folders have no content")),
        }
    }

    /// Returns true if this entry is a file stored under `key`.
    #[must_use]
    pub fn references(&self, key: &StorageKey) -> bool {
        self.storage_key.as_ref() == Some(key)
    }
}

/// Returns true if `revision` is exactly 32 hex characters.
#[must_use]
pub fn is_well_formed_revision(revision: &str) -> bool {
    revision.len() == MD5_LEN * 2 && revision.bytes().all(|b| b.is_ascii_hexdigit())
}
