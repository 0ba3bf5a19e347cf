//! Per-request entry point over the content store and metadata provider.

use crate::config::ProviderConfig;
use crate::error::CoreResult;
use crate::event::ChangeBatch;
use crate::initial::InitialMetadata;
use crate::metadata::FileMetadata;
use crate::outcome::{Conflict, Outcome, StoredFile};
use crate::provider::{MetadataProvider, ProviderStats};
use chrono::Utc;
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use synchub_storage::{
    BlobReader, InitialStorageData, PhysicalStorage, StorageConfig, StoreStats,
};
use synchub_types::{DeviceId, FilePath, Md5Hash, StorageKey, SyncId, UserId};
use tracing::info;

/// Combined counters of store and provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Content store counters.
    pub store: StoreStats,
    /// Metadata provider counters.
    pub provider: ProviderStats,
}

/// A sync backend: one content store and one metadata provider.
///
/// Each method is one client request. Sync ids and timestamps are
/// assigned here, so callers only pass what a client would send.
///
/// ```rust
/// use synchub_core::ServerData;
/// use synchub_types::{ContentKey, DeviceId, FilePath, SyncId, UserId};
///
/// let server = ServerData::in_memory();
/// server.initialize(None, None).unwrap();
///
/// let user = UserId::new("alice");
/// let path = FilePath::parse("/a.txt").unwrap();
/// let content = ContentKey::of_bytes(b"hello");
/// let stored = server
///     .create_file(&user, &DeviceId::new("laptop"), &path, content.hash, content.size)
///     .unwrap()
///     .applied()
///     .unwrap();
///
/// server.upload_bytes(stored.storage_key().unwrap(), b"hello").unwrap();
/// let batch = server.changes_since(&user, SyncId::ZERO).unwrap();
/// assert_eq!(batch.len(), 1);
/// ```
pub struct ServerData {
    storage: Arc<PhysicalStorage>,
    provider: MetadataProvider,
}

impl ServerData {
    /// Creates a server over `storage`. Call [`ServerData::initialize`]
    /// before use.
    #[must_use]
    pub fn new(storage: Arc<PhysicalStorage>, config: ProviderConfig) -> Self {
        Self {
            storage,
            provider: MetadataProvider::new(config),
        }
    }

    /// Creates a server whose blobs live in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(PhysicalStorage::in_memory()), ProviderConfig::default())
    }

    /// Creates a server whose blobs live under `storage.root_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob directory cannot be opened or locked.
    pub fn open(storage: &StorageConfig, config: ProviderConfig) -> CoreResult<Self> {
        Ok(Self::new(Arc::new(PhysicalStorage::open(storage)?), config))
    }

    /// Initializes store and provider from optional preloads.
    ///
    /// # Errors
    ///
    /// Fails if either part is already initialized or a preload is
    /// inconsistent.
    pub fn initialize(
        &self,
        storage: Option<&InitialStorageData>,
        metadata: Option<&InitialMetadata>,
    ) -> CoreResult<()> {
        self.storage.initialize(storage)?;
        self.provider.initialize(Arc::clone(&self.storage), metadata)?;
        info!("server data initialized");
        Ok(())
    }

    /// The content store.
    #[must_use]
    pub fn storage(&self) -> &Arc<PhysicalStorage> {
        &self.storage
    }

    /// The metadata provider.
    #[must_use]
    pub fn provider(&self) -> &MetadataProvider {
        &self.provider
    }

    fn next_sync_id(&self) -> CoreResult<SyncId> {
        self.provider.new_sync_id_before_start()
    }

    /// Creates a folder.
    ///
    /// # Errors
    ///
    /// Returns an error on broken preconditions (see [`MetadataProvider`]).
    pub fn create_folder(&self, user: &UserId, path: &FilePath) -> CoreResult<Outcome<FileMetadata>> {
        let sync_id = self.next_sync_id()?;
        self.provider
            .add_folder_metadata(sync_id, user, path, FileMetadata::folder(Utc::now()))
    }

    /// Announces a new file; upload its bytes if `new_upload` is set.
    ///
    /// # Errors
    ///
    /// Returns an error on broken preconditions (see [`MetadataProvider`]).
    pub fn create_file(
        &self,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        hash: Md5Hash,
        size: u64,
    ) -> CoreResult<Outcome<StoredFile>> {
        let sync_id = self.next_sync_id()?;
        self.provider.add_file_metadata(
            sync_id,
            user,
            device,
            path,
            FileMetadata::file(hash, size, Utc::now()),
        )
    }

    /// Looks up an entry.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization.
    pub fn get(&self, user: &UserId, path: &FilePath) -> CoreResult<Option<FileMetadata>> {
        self.provider.try_get_metadata(user, path)
    }

    /// Lists a folder.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization.
    pub fn list(&self, user: &UserId, path: &FilePath) -> CoreResult<Vec<(FilePath, FileMetadata)>> {
        self.provider.list_children(user, path)
    }

    /// Deletes an entry and its subtree.
    ///
    /// # Errors
    ///
    /// Returns an error on broken preconditions (see [`MetadataProvider`]).
    pub fn delete(&self, user: &UserId, path: &FilePath) -> CoreResult<Outcome<FileMetadata>> {
        let sync_id = self.next_sync_id()?;
        self.provider.recursively_remove_metadata(sync_id, user, path)
    }

    /// Moves an entry and its subtree.
    ///
    /// # Errors
    ///
    /// Returns an error on broken preconditions (see [`MetadataProvider`]).
    pub fn rename(
        &self,
        user: &UserId,
        from: &FilePath,
        to: &FilePath,
    ) -> CoreResult<Outcome<FileMetadata>> {
        let sync_id = self.next_sync_id()?;
        self.provider.recursively_rename_metadata(sync_id, user, from, to)
    }

    /// Replaces a file's content if `base_revision` is still current.
    ///
    /// # Errors
    ///
    /// Returns an error on broken preconditions (see [`MetadataProvider`]).
    pub fn modify(
        &self,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        base_revision: &str,
        hash: Md5Hash,
        size: u64,
    ) -> CoreResult<Outcome<StoredFile>> {
        let now = Utc::now();
        let metadata = match self.provider.try_get_metadata(user, path)? {
            Some(existing) if !existing.is_folder => existing.with_content(hash, size, now),
            _ => FileMetadata::file(hash, size, now),
        };
        let sync_id = self.next_sync_id()?;
        self.provider
            .update_metadata(sync_id, user, device, path, metadata, Some(base_revision))
    }

    /// Uploads the bytes of a pending blob.
    ///
    /// Returns false if the blob was already uploaded.
    ///
    /// # Errors
    ///
    /// Fails for unknown keys, concurrent uploads, mismatching content and
    /// I/O errors.
    pub fn upload<R: Read>(&self, key: &StorageKey, data: R) -> CoreResult<bool> {
        Ok(self.storage.write_file(key, data)?)
    }

    /// Uploads a blob from memory.
    ///
    /// # Errors
    ///
    /// Same as [`ServerData::upload`].
    pub fn upload_bytes(&self, key: &StorageKey, data: &[u8]) -> CoreResult<bool> {
        self.upload(key, data)
    }

    /// Opens the content of a file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`synchub_storage::StorageError::Pending`] (wrapped) while
    /// the content is still uploading; callers should retry later.
    pub fn download(&self, user: &UserId, path: &FilePath) -> CoreResult<Outcome<BlobReader>> {
        let Some(metadata) = self.provider.try_get_metadata(user, path)? else {
            return Ok(Outcome::Conflict(Conflict::NotFound { path: path.clone() }));
        };
        let Some(key) = metadata.storage_key else {
            return Ok(Outcome::Conflict(Conflict::TypeMismatch { path: path.clone() }));
        };
        Ok(Outcome::Applied(self.storage.read_file(&key)?))
    }

    /// Changes of `user` after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization.
    pub fn changes_since(&self, user: &UserId, cursor: SyncId) -> CoreResult<ChangeBatch> {
        self.provider.changes_since_sync_id(cursor, user)
    }

    /// Cancels the uploads a disconnected device still owed.
    ///
    /// # Errors
    ///
    /// See [`MetadataProvider::purge_user_pendings_by_device`].
    pub fn device_disconnected(&self, user: &UserId, device: &DeviceId) -> CoreResult<Vec<StorageKey>> {
        self.provider.purge_user_pendings_by_device(user, device)
    }

    /// Counters of store and provider.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization.
    pub fn stats(&self) -> CoreResult<ServerStats> {
        Ok(ServerStats {
            store: self.storage.stats()?,
            provider: self.provider.stats()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::event::ChangeKind;
    use synchub_storage::StorageError;
    use synchub_types::ContentKey;
    use tempfile::tempdir;

    fn p(s: &str) -> FilePath {
        FilePath::parse(s).unwrap()
    }

    fn server() -> ServerData {
        let server = ServerData::in_memory();
        server.initialize(None, None).unwrap();
        server
    }

    fn create(server: &ServerData, user: &UserId, path: &str, data: &[u8]) -> StoredFile {
        let content = ContentKey::of_bytes(data);
        server
            .create_file(user, &DeviceId::new("laptop"), &p(path), content.hash, content.size)
            .unwrap()
            .applied()
            .unwrap()
    }

    fn read(server: &ServerData, user: &UserId, path: &str) -> String {
        let mut reader = server.download(user, &p(path)).unwrap().applied().unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn create_upload_and_download() {
        let server = server();
        let alice = UserId::new("alice");
        server.create_folder(&alice, &p("/docs")).unwrap().applied().unwrap();
        let stored = create(&server, &alice, "/docs/a.txt", b"hello");

        let pending = server.download(&alice, &p("/docs/a.txt"));
        assert!(matches!(
            pending,
            Err(CoreError::Storage(StorageError::Pending { .. }))
        ));
        assert!(pending.err().is_some_and(|err| err.is_retryable()));

        assert!(server.upload_bytes(stored.storage_key().unwrap(), b"hello").unwrap());
        assert!(!server.upload_bytes(stored.storage_key().unwrap(), b"hello").unwrap());
        assert_eq!(read(&server, &alice, "/docs/a.txt"), "hello");

        let batch = server.changes_since(&alice, SyncId::ZERO).unwrap();
        let kinds: Vec<ChangeKind> = batch.changes.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Created, ChangeKind::Created]);
    }

    #[test]
    fn shared_blob_outlives_one_owner() {
        let server = server();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let a = create(&server, &alice, "/a.txt", b"same bytes");
        let b = create(&server, &bob, "/b.txt", b"same bytes");
        assert_eq!(a.storage_key(), b.storage_key());

        server.upload_bytes(a.storage_key().unwrap(), b"same bytes").unwrap();
        assert_eq!(server.storage().backend().blob_count().unwrap(), 1);

        server.delete(&alice, &p("/a.txt")).unwrap().applied().unwrap();
        assert_eq!(server.storage().backend().blob_count().unwrap(), 1);
        assert_eq!(read(&server, &bob, "/b.txt"), "same bytes");

        server.delete(&bob, &p("/b.txt")).unwrap().applied().unwrap();
        assert_eq!(server.storage().backend().blob_count().unwrap(), 0);
        assert_eq!(server.stats().unwrap().store.blobs, 0);
    }

    #[test]
    fn modify_keeps_creation_time() {
        let server = server();
        let alice = UserId::new("alice");
        let first = create(&server, &alice, "/a.txt", b"one");
        server.upload_bytes(first.storage_key().unwrap(), b"one").unwrap();

        let next = ContentKey::of_bytes(b"two");
        let modified = server
            .modify(
                &alice,
                &DeviceId::new("laptop"),
                &p("/a.txt"),
                &ContentKey::of_bytes(b"one").hash.to_hex(),
                next.hash,
                next.size,
            )
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(modified.metadata.creation_time, first.metadata.creation_time);
        assert!(modified.pending);
    }

    #[test]
    fn download_conflicts() {
        let server = server();
        let alice = UserId::new("alice");
        server.create_folder(&alice, &p("/docs")).unwrap().applied().unwrap();

        assert!(server.download(&alice, &p("/missing")).unwrap().is_conflict());
        assert!(matches!(
            server.download(&alice, &p("/docs")).unwrap().conflict(),
            Some(Conflict::TypeMismatch { .. })
        ));
    }

    #[test]
    fn disconnect_rolls_back_and_reports_keys() {
        let server = server();
        let alice = UserId::new("alice");
        let stored = create(&server, &alice, "/a.txt", b"never uploaded");

        let purged = server
            .device_disconnected(&alice, &DeviceId::new("laptop"))
            .unwrap();
        assert_eq!(purged, vec![stored.storage_key().unwrap().clone()]);
        assert!(server.get(&alice, &p("/a.txt")).unwrap().is_none());
    }

    #[test]
    fn file_backed_server_removes_blobs_from_disk() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let server = ServerData::open(&config, ProviderConfig::default()).unwrap();
        server.initialize(None, None).unwrap();

        let alice = UserId::new("alice");
        let stored = create(&server, &alice, "/a.txt", b"on disk");
        server.upload_bytes(stored.storage_key().unwrap(), b"on disk").unwrap();
        assert_eq!(std::fs::read_dir(config.blob_dir()).unwrap().count(), 1);

        server.delete(&alice, &p("/a.txt")).unwrap().applied().unwrap();
        assert_eq!(std::fs::read_dir(config.blob_dir()).unwrap().count(), 0);
    }

    #[test]
    fn initialize_twice_fails() {
        let server = server();
        assert!(server.initialize(None, None).is_err());
    }
}
