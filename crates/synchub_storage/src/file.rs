//! File-based blob backend.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ blobs/        # One file per committed blob, named by FileId
//! └─ tmp/          # In-flight uploads, renamed into blobs/ on commit
//! ```

use crate::backend::BlobBackend;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use synchub_types::FileId;

const LOCK_FILE: &str = "LOCK";

/// A blob backend storing one file per blob.
///
/// Uploads are written to the temp directory and atomically renamed into
/// the blob directory on commit, so a reader never sees a partial blob.
/// The root directory is locked for the lifetime of the backend.
///
/// # Example
///
/// ```no_run
/// use synchub_storage::{FileBlobBackend, StorageConfig};
///
/// let backend = FileBlobBackend::open(&StorageConfig::new("/srv/sync")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlobBackend {
    blob_dir: PathBuf,
    temp_dir: PathBuf,
    sync_on_write: bool,
    _lock_file: File,
}

impl FileBlobBackend {
    /// Opens or creates the directory layout and takes the lock.
    ///
    /// Stale staged uploads from a previous process are removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the root,
    /// or an I/O error if directories cannot be created.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(config.root())?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.root().join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let blob_dir = config.blob_dir();
        let temp_dir = config.temp_dir();
        fs::create_dir_all(&blob_dir)?;
        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir)?;
        }
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            blob_dir,
            temp_dir,
            sync_on_write: config.sync_on_write,
            _lock_file: lock_file,
        })
    }

    /// Path of a committed blob.
    #[must_use]
    pub fn blob_path(&self, file_id: FileId) -> PathBuf {
        self.blob_dir.join(file_id.file_name())
    }

    /// Path of a staged upload.
    #[must_use]
    pub fn temp_path(&self, file_id: FileId) -> PathBuf {
        self.temp_dir.join(file_id.file_name())
    }

    /// Directory of committed blobs.
    #[must_use]
    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl BlobBackend for FileBlobBackend {
    fn begin_upload(&self, file_id: FileId) -> StorageResult<Box<dyn Write + Send>> {
        let file = File::create(self.temp_path(file_id))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn commit_upload(&self, file_id: FileId) -> StorageResult<()> {
        let temp = self.temp_path(file_id);
        if self.sync_on_write {
            File::open(&temp)?.sync_all()?;
        }
        fs::rename(&temp, self.blob_path(file_id))?;
        Ok(())
    }

    fn abort_upload(&self, file_id: FileId) -> StorageResult<()> {
        remove_if_exists(&self.temp_path(file_id))
    }

    fn open(&self, file_id: FileId) -> StorageResult<Box<dyn Read + Send>> {
        let file = File::open(self.blob_path(file_id))?;
        Ok(Box::new(file))
    }

    fn delete(&self, file_id: FileId) -> StorageResult<()> {
        remove_if_exists(&self.blob_path(file_id))
    }

    fn exists(&self, file_id: FileId) -> StorageResult<bool> {
        Ok(self.blob_path(file_id).is_file())
    }

    fn blob_count(&self) -> StorageResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.blob_dir)? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_blob(backend: &FileBlobBackend, data: &[u8]) -> FileId {
        let id = FileId::new();
        let mut writer = backend.begin_upload(id).unwrap();
        writer.write_all(data).unwrap();
        writer.flush().unwrap();
        drop(writer);
        backend.commit_upload(id).unwrap();
        id
    }

    #[test]
    fn creates_layout() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let _backend = FileBlobBackend::open(&config).unwrap();

        assert!(config.blob_dir().is_dir());
        assert!(config.temp_dir().is_dir());
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn staged_upload_is_invisible_until_commit() {
        let dir = tempdir().unwrap();
        let backend = FileBlobBackend::open(&StorageConfig::new(dir.path())).unwrap();

        let id = FileId::new();
        let mut writer = backend.begin_upload(id).unwrap();
        writer.write_all(b"partial").unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert!(backend.temp_path(id).exists());
        assert!(!backend.exists(id).unwrap());
        assert!(backend.open(id).is_err());

        backend.commit_upload(id).unwrap();
        assert!(!backend.temp_path(id).exists());
        assert!(backend.exists(id).unwrap());
    }

    #[test]
    fn read_back_committed_blob() {
        let dir = tempdir().unwrap();
        let backend = FileBlobBackend::open(&StorageConfig::new(dir.path())).unwrap();
        let id = write_blob(&backend, b"hello world");

        let mut data = Vec::new();
        backend.open(id).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(backend.blob_count().unwrap(), 1);
    }

    #[test]
    fn abort_discards_staged_data() {
        let dir = tempdir().unwrap();
        let backend = FileBlobBackend::open(&StorageConfig::new(dir.path())).unwrap();

        let id = FileId::new();
        drop(backend.begin_upload(id).unwrap());
        backend.abort_upload(id).unwrap();
        assert!(!backend.temp_path(id).exists());

        // Aborting twice is fine
        backend.abort_upload(id).unwrap();
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let backend = FileBlobBackend::open(&StorageConfig::new(dir.path())).unwrap();
        let id = write_blob(&backend, b"x");

        backend.delete(id).unwrap();
        assert!(!backend.exists(id).unwrap());
        backend.delete(id).unwrap();
        assert_eq!(backend.blob_count().unwrap(), 0);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let _first = FileBlobBackend::open(&config).unwrap();

        let second = FileBlobBackend::open(&config);
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn reopen_clears_stale_uploads_and_keeps_blobs() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        let (kept, stale) = {
            let backend = FileBlobBackend::open(&config).unwrap();
            let kept = write_blob(&backend, b"kept");
            let stale = FileId::new();
            drop(backend.begin_upload(stale).unwrap());
            (kept, stale)
        };

        let backend = FileBlobBackend::open(&config).unwrap();
        assert!(backend.exists(kept).unwrap());
        assert!(!backend.temp_path(stale).exists());
    }
}
