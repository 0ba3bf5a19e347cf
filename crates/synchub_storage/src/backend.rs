//! Blob backend trait definition.

use crate::error::StorageResult;
use std::io::{Read, Write};
use synchub_types::FileId;

/// Where blob bytes live.
///
/// Backends are **opaque byte stores** keyed by [`FileId`]. They know
/// nothing about storage keys, users, or pending state; the content store
/// owns all of that.
///
/// # Invariants
///
/// - Bytes written through `begin_upload` are invisible to `open` until
///   `commit_upload` succeeds
/// - `commit_upload` is atomic: a blob is either fully present or absent
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::FileBlobBackend`] - For persistent storage
/// - [`super::InMemoryBlobBackend`] - For testing
pub trait BlobBackend: Send + Sync {
    /// Starts staging a new blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging area cannot be written.
    fn begin_upload(&self, file_id: FileId) -> StorageResult<Box<dyn Write + Send>>;

    /// Moves a staged blob into permanent storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged blob is missing or cannot be moved.
    fn commit_upload(&self, file_id: FileId) -> StorageResult<()>;

    /// Discards a staged blob. Missing staged data is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged data exists but cannot be removed.
    fn abort_upload(&self, file_id: FileId) -> StorageResult<()>;

    /// Opens a committed blob for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob does not exist.
    fn open(&self, file_id: FileId) -> StorageResult<Box<dyn Read + Send>>;

    /// Deletes a committed blob. Deleting a missing blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob exists but cannot be removed.
    fn delete(&self, file_id: FileId) -> StorageResult<()>;

    /// Returns true if a committed blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, file_id: FileId) -> StorageResult<bool>;

    /// Number of committed blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    fn blob_count(&self) -> StorageResult<usize>;
}
