//! In-memory blob backend for testing.

use crate::backend::BlobBackend;
use crate::error::StorageResult;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use synchub_types::FileId;

type StagedMap = Arc<RwLock<HashMap<FileId, Vec<u8>>>>;

/// An in-memory blob backend.
///
/// Suitable for unit tests and ephemeral stores. Committed blobs are kept
/// as [`Bytes`] so readers share them without copying.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct InMemoryBlobBackend {
    staged: StagedMap,
    blobs: RwLock<HashMap<FileId, Bytes>>,
}

impl InMemoryBlobBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a committed blob.
    #[must_use]
    pub fn data(&self, file_id: FileId) -> Option<Bytes> {
        self.blobs.read().get(&file_id).cloned()
    }

    /// Number of uploads currently staged.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.staged.read().len()
    }
}

struct StagedWriter {
    staged: StagedMap,
    file_id: FileId,
}

impl Write for StagedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut staged = self.staged.write();
        staged.entry(self.file_id).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobBackend for InMemoryBlobBackend {
    fn begin_upload(&self, file_id: FileId) -> StorageResult<Box<dyn Write + Send>> {
        self.staged.write().insert(file_id, Vec::new());
        Ok(Box::new(StagedWriter {
            staged: Arc::clone(&self.staged),
            file_id,
        }))
    }

    fn commit_upload(&self, file_id: FileId) -> StorageResult<()> {
        let data = self.staged.write().remove(&file_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no staged upload for {file_id}"),
            )
        })?;
        self.blobs.write().insert(file_id, Bytes::from(data));
        Ok(())
    }

    fn abort_upload(&self, file_id: FileId) -> StorageResult<()> {
        self.staged.write().remove(&file_id);
        Ok(())
    }

    fn open(&self, file_id: FileId) -> StorageResult<Box<dyn Read + Send>> {
        let data = self.data(file_id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no blob {file_id}"))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn delete(&self, file_id: FileId) -> StorageResult<()> {
        self.blobs.write().remove(&file_id);
        Ok(())
    }

    fn exists(&self, file_id: FileId) -> StorageResult<bool> {
        Ok(self.blobs.read().contains_key(&file_id))
    }

    fn blob_count(&self) -> StorageResult<usize> {
        Ok(self.blobs.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_then_committed() {
        let backend = InMemoryBlobBackend::new();
        let id = FileId::new();

        let mut writer = backend.begin_upload(id).unwrap();
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(backend.staged_count(), 1);
        assert!(!backend.exists(id).unwrap());

        backend.commit_upload(id).unwrap();
        assert_eq!(backend.staged_count(), 0);
        assert_eq!(backend.data(id).unwrap(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn commit_without_stage_fails() {
        let backend = InMemoryBlobBackend::new();
        assert!(backend.commit_upload(FileId::new()).is_err());
    }

    #[test]
    fn abort_and_delete() {
        let backend = InMemoryBlobBackend::new();
        let id = FileId::new();
        drop(backend.begin_upload(id).unwrap());
        backend.abort_upload(id).unwrap();
        assert_eq!(backend.staged_count(), 0);

        drop(backend.begin_upload(id).unwrap());
        backend.commit_upload(id).unwrap();
        assert_eq!(backend.blob_count().unwrap(), 1);
        backend.delete(id).unwrap();
        assert_eq!(backend.blob_count().unwrap(), 0);
        assert!(backend.open(id).is_err());
    }
}
