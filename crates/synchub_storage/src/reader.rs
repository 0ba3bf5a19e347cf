//! Reference-counted blob read streams.

use crate::store::StoreState;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use synchub_types::StorageKey;

/// Keeps a blob's reader count raised until dropped.
pub(crate) struct ReaderGuard {
    state: Arc<StoreState>,
    key: StorageKey,
}

impl ReaderGuard {
    /// Wraps a reader slot that was already counted in the index.
    pub(crate) fn new(state: Arc<StoreState>, key: StorageKey) -> Self {
        Self { state, key }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.state.release_reader(&self.key);
    }
}

/// A read stream over a durable blob.
///
/// While a `BlobReader` is alive the blob's bytes are not deleted, even if
/// every user reference to it goes away. Dropping the reader releases the
/// reference; if it was the last thing keeping an unused blob alive, the
/// blob is deleted then.
pub struct BlobReader {
    inner: Box<dyn Read + Send>,
    size: u64,
    guard: ReaderGuard,
}

impl BlobReader {
    pub(crate) fn new(guard: ReaderGuard, inner: Box<dyn Read + Send>, size: u64) -> Self {
        Self { inner, size, guard }
    }

    /// Size of the blob in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Key of the blob being read.
    #[must_use]
    pub fn storage_key(&self) -> &StorageKey {
        &self.guard.key
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("storage_key", &self.guard.key)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
