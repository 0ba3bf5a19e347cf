//! The deduplicating content store.

use crate::backend::BlobBackend;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBlobBackend;
use crate::initial::InitialStorageData;
use crate::memory::InMemoryBlobBackend;
use crate::reader::{BlobReader, ReaderGuard};
use crate::record::{BlobInfo, BlobRecord, PathEntry, Revision};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use synchub_types::{ContentKey, DeviceId, FileId, FilePath, Md5Hash, StorageKey, UserId};
use tracing::{debug, info, warn};

/// One-shot callback fired when a blob's upload completes.
pub type CompletionCallback = Box<dyn FnOnce(&StorageKey) + Send>;

/// Result of registering content for a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUsage {
    /// Blob now referenced by the path.
    pub storage_key: StorageKey,
    /// Whether the blob's bytes are still missing.
    pub pending: bool,
    /// Whether the caller is expected to upload the bytes.
    pub new_upload: bool,
}

/// Result of an optimistic content update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageUpdate {
    /// The update was accepted.
    Updated(FileUsage),
    /// The caller's base revision is not the path's head.
    Stale {
        /// The current head, if the path has any history.
        latest: Option<Md5Hash>,
    },
}

impl UsageUpdate {
    /// Returns true if the update was rejected.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Aggregate store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Blobs in the index.
    pub blobs: usize,
    /// Blobs whose bytes are missing.
    pub pending: usize,
    /// Blobs being written right now.
    pub uploading: usize,
    /// Open read streams.
    pub open_readers: usize,
    /// Bytes held by durable blobs.
    pub stored_bytes: u64,
    /// Users with at least one path entry.
    pub users: usize,
}

#[derive(Default)]
struct UserPaths {
    entries: HashMap<FilePath, PathEntry>,
}

#[derive(Default)]
struct BlobIndex {
    by_content: HashMap<ContentKey, StorageKey>,
    records: HashMap<StorageKey, BlobRecord>,
}

/// Shared state of an initialized store.
///
/// Lock order: `users` map → one user's paths → `index` → `listeners` →
/// `graveyard`. No lock is held across backend I/O.
pub(crate) struct StoreState {
    backend: Arc<dyn BlobBackend>,
    verify_content_hash: bool,
    next_key: AtomicU64,
    users: RwLock<HashMap<UserId, Arc<Mutex<UserPaths>>>>,
    index: Mutex<BlobIndex>,
    listeners: Mutex<HashMap<StorageKey, Vec<CompletionCallback>>>,
    graveyard: Mutex<Vec<FileId>>,
}

/// The content store.
///
/// `PhysicalStorage` maps content keys to blobs, tracks which users
/// reference each blob from which paths, and holds the blob bytes in a
/// [`BlobBackend`].
///
/// # Lifecycle
///
/// A store must be initialized exactly once, optionally with preloaded
/// content, before any other call. Uninitialized use fails with
/// [`StorageError::NotInitialized`].
///
/// # Deletion
///
/// Blobs whose last reference goes away are queued and deleted by
/// [`PhysicalStorage::reclaim_orphans`]. Reference-changing methods do not
/// delete on their own, so callers holding their own locks can defer the
/// disk work until those locks are released.
pub struct PhysicalStorage {
    backend: Arc<dyn BlobBackend>,
    verify_content_hash: bool,
    state: OnceLock<Arc<StoreState>>,
}

impl PhysicalStorage {
    /// Creates a store over an existing backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn BlobBackend>, verify_content_hash: bool) -> Self {
        Self {
            backend,
            verify_content_hash,
            state: OnceLock::new(),
        }
    }

    /// Opens a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        let backend = FileBlobBackend::open(config)?;
        Ok(Self::with_backend(
            Arc::new(backend),
            config.verify_content_hash,
        ))
    }

    /// Creates an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(InMemoryBlobBackend::new()), true)
    }

    /// Returns true once `initialize` succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Initializes the store, writing preloaded content as durable blobs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyInitialized`] on a second call, or
    /// an error if preloaded content is malformed or cannot be written.
    pub fn initialize(&self, initial: Option<&InitialStorageData>) -> StorageResult<()> {
        if self.state.get().is_some() {
            return Err(StorageError::AlreadyInitialized);
        }

        let state = StoreState {
            backend: Arc::clone(&self.backend),
            verify_content_hash: self.verify_content_hash,
            next_key: AtomicU64::new(1),
            users: RwLock::new(HashMap::new()),
            index: Mutex::new(BlobIndex::default()),
            listeners: Mutex::new(HashMap::new()),
            graveyard: Mutex::new(Vec::new()),
        };

        let mut preloaded = 0usize;
        if let Some(initial) = initial {
            for blob in &initial.blobs {
                let data = blob.data()?;
                let content = ContentKey::of_bytes(&data);
                if content.is_empty() || state.index.lock().by_content.contains_key(&content) {
                    continue;
                }
                let record = BlobRecord::new(content, false);
                let file_id = record.file_id;
                state.stage_upload(&StorageKey::empty(), file_id, content, &mut &data[..])?;
                let key = state.allocate_key();
                let mut index = state.index.lock();
                index.by_content.insert(content, key.clone());
                index.records.insert(key, record);
                preloaded += 1;
            }
        }

        self.state
            .set(Arc::new(state))
            .map_err(|_| StorageError::AlreadyInitialized)?;
        info!(preloaded, "content store initialized");
        Ok(())
    }

    fn state(&self) -> StorageResult<&Arc<StoreState>> {
        self.state.get().ok_or(StorageError::NotInitialized)
    }

    /// Registers `content` as the content of `user`'s `path`.
    ///
    /// Content already known to the store is shared: the caller gets the
    /// existing key and its pending flag, and `new_upload` is false.
    /// Novel content gets a fresh pending blob (or the empty-file sentinel
    /// for size 0) and the calling device is expected to upload it.
    ///
    /// If the path already referenced other content, that reference is
    /// released now, or kept as a fallback until the new content finishes
    /// uploading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn add_user_file(
        &self,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        hash: Md5Hash,
        size: u64,
    ) -> StorageResult<FileUsage> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let mut paths = shard.lock();
        let mut index = state.index.lock();

        let content = ContentKey::new(hash, size);
        let usage = state.reference(&mut index, content, user, device, path);
        match paths.entries.get_mut(path) {
            Some(entry) => {
                state.supersede(&mut index, entry, user, path, &usage);
                entry.history.push(Revision::from(content));
            }
            None => {
                paths.entries.insert(
                    path.clone(),
                    PathEntry::new(usage.storage_key.clone(), Revision::from(content)),
                );
            }
        }

        debug!(
            %user, %path, key = %usage.storage_key,
            pending = usage.pending, new_upload = usage.new_upload,
            "registered file content"
        );
        Ok(usage)
    }

    /// Replaces the content of `path` if `old_hash` is its current head.
    ///
    /// On success the new content is registered as with
    /// [`PhysicalStorage::add_user_file`] and prepended to the path's
    /// revision history. On mismatch nothing changes and the current head
    /// is reported.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    /// A stale base revision is not an error.
    pub fn update_file_usage(
        &self,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        old_hash: Md5Hash,
        new_hash: Md5Hash,
        new_size: u64,
    ) -> StorageResult<UsageUpdate> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let mut paths = shard.lock();

        let Some(entry) = paths.entries.get_mut(path) else {
            return Ok(UsageUpdate::Stale { latest: None });
        };
        let latest = entry.history.head().map(|r| r.hash);
        if latest != Some(old_hash) {
            debug!(%user, %path, "stale base revision");
            return Ok(UsageUpdate::Stale { latest });
        }

        let mut index = state.index.lock();
        let content = ContentKey::new(new_hash, new_size);
        let usage = state.reference(&mut index, content, user, device, path);
        state.supersede(&mut index, entry, user, path, &usage);
        entry.history.push(Revision::from(content));

        debug!(%user, %path, key = %usage.storage_key, pending = usage.pending, "updated file content");
        Ok(UsageUpdate::Updated(usage))
    }

    /// Writes the bytes of a pending blob.
    ///
    /// The data is staged under the blob's file id, verified against the
    /// blob's content key, and moved into place. The blob then stops being
    /// pending, fallbacks superseded by it are released, and completion
    /// callbacks fire.
    ///
    /// Returns `false` without reading `data` if the blob was already
    /// durable (a duplicate upload).
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownStorageKey`] if no such blob exists
    /// - [`StorageError::UploadInProgress`] if another upload is running
    /// - [`StorageError::ContentMismatch`] if the bytes do not match
    /// - I/O errors from the backend
    pub fn write_file<R: Read>(&self, key: &StorageKey, mut data: R) -> StorageResult<bool> {
        let state = self.state()?;

        let (file_id, content) = {
            let mut index = state.index.lock();
            let record = index
                .records
                .get_mut(key)
                .ok_or_else(|| StorageError::UnknownStorageKey { key: key.clone() })?;
            if !record.pending {
                debug!(%key, "duplicate upload ignored");
                return Ok(false);
            }
            if record.uploading {
                return Err(StorageError::UploadInProgress { key: key.clone() });
            }
            record.uploading = true;
            (record.file_id, record.content)
        };

        if let Err(err) = state.stage_upload(key, file_id, content, &mut data) {
            if let Err(abort_err) = state.backend.abort_upload(file_id) {
                warn!(%key, error = %abort_err, "failed to discard staged upload");
            }
            if let Some(record) = state.index.lock().records.get_mut(key) {
                record.uploading = false;
            }
            return Err(err);
        }

        let (users, callbacks) = {
            let mut index = state.index.lock();
            match index.records.get_mut(key) {
                Some(record) if record.file_id == file_id => {
                    record.pending = false;
                    record.uploading = false;
                    record.uploader = None;
                    let users: Vec<(UserId, Vec<FilePath>)> = record
                        .user_usage
                        .iter()
                        .map(|(user, paths)| (user.clone(), paths.iter().cloned().collect()))
                        .collect();
                    let callbacks = state.listeners.lock().remove(key).unwrap_or_default();
                    (users, callbacks)
                }
                _ => {
                    debug!(%key, "blob dropped while uploading");
                    state.graveyard.lock().push(file_id);
                    (Vec::new(), Vec::new())
                }
            }
        };

        for (user, paths) in users {
            state.release_fallbacks(key, &user, &paths);
        }
        state.reclaim_orphans();

        info!(%key, size = content.size, callbacks = callbacks.len(), "upload completed");
        for callback in callbacks {
            callback(key);
        }
        Ok(true)
    }

    /// Opens a durable blob for reading.
    ///
    /// The returned stream holds a reader reference on the blob until it
    /// is dropped.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Pending`] if the upload has not completed
    /// - [`StorageError::UnknownStorageKey`] if no such blob exists
    pub fn read_file(&self, key: &StorageKey) -> StorageResult<BlobReader> {
        let state = self.state()?;
        let (file_id, content, has_bytes) = {
            let mut index = state.index.lock();
            let record = index
                .records
                .get_mut(key)
                .ok_or_else(|| StorageError::UnknownStorageKey { key: key.clone() })?;
            if record.pending {
                return Err(StorageError::Pending { key: key.clone() });
            }
            record.readers += 1;
            (record.file_id, record.content, record.has_bytes())
        };

        let guard = ReaderGuard::new(Arc::clone(state), key.clone());
        let inner: Box<dyn Read + Send> = if has_bytes {
            state.backend.open(file_id)?
        } else {
            Box::new(io::empty())
        };
        Ok(BlobReader::new(guard, inner, content.size))
    }

    /// Returns whether a blob is still waiting for its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownStorageKey`] if no such blob exists.
    pub fn is_storage_key_pending(&self, key: &StorageKey) -> StorageResult<bool> {
        let state = self.state()?;
        let index = state.index.lock();
        index
            .records
            .get(key)
            .map(|record| record.pending)
            .ok_or_else(|| StorageError::UnknownStorageKey { key: key.clone() })
    }

    /// Moves `user`'s content references from `from` to `to`.
    ///
    /// Returns `false` if `from` holds no content.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] if `to` already holds
    /// content.
    pub fn move_user_path_usage(
        &self,
        user: &UserId,
        from: &FilePath,
        to: &FilePath,
    ) -> StorageResult<bool> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let mut paths = shard.lock();

        if paths.entries.contains_key(to) {
            return Err(StorageError::invalid_argument(format!(
                "{to} already holds content for {user}"
            )));
        }
        let Some(entry) = paths.entries.remove(from) else {
            return Ok(false);
        };

        let mut index = state.index.lock();
        for key in entry.keys() {
            if let Some(record) = index.records.get_mut(&key) {
                record.remove_usage(user, from);
                record.add_usage(user, to);
            }
        }
        paths.entries.insert(to.clone(), entry);
        debug!(%user, %from, %to, "moved path usage");
        Ok(true)
    }

    /// Drops every content reference `user` holds at `path`.
    ///
    /// Blobs left without references are queued for deletion. Returns
    /// `false` if the path held no content.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn remove_user_usage_from_file(&self, user: &UserId, path: &FilePath) -> StorageResult<bool> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let mut paths = shard.lock();
        let Some(entry) = paths.entries.remove(path) else {
            return Ok(false);
        };

        let mut index = state.index.lock();
        for key in entry.keys() {
            state.release(&mut index, &key, user, path);
        }
        debug!(%user, %path, "removed path usage");
        Ok(true)
    }

    /// Points `path` back at `restore`, dropping every other reference it
    /// holds and rewinding its revision history.
    ///
    /// Used when a cancelled upload rolls a path back to its last durable
    /// content.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] if the path holds no content
    /// - [`StorageError::UnknownStorageKey`] if `restore` does not exist
    pub fn revert_user_path(
        &self,
        user: &UserId,
        path: &FilePath,
        restore: &StorageKey,
    ) -> StorageResult<()> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let mut paths = shard.lock();
        let entry = paths.entries.get_mut(path).ok_or_else(|| {
            StorageError::invalid_argument(format!("{path} holds no content for {user}"))
        })?;

        let mut index = state.index.lock();
        let record = index
            .records
            .get_mut(restore)
            .ok_or_else(|| StorageError::UnknownStorageKey {
                key: restore.clone(),
            })?;
        record.add_usage(user, path);
        let revision = Revision::from(record.content);

        let previous = entry.keys();
        entry.current = restore.clone();
        entry.fallbacks.clear();
        entry.history.rewind_to(revision);
        for key in previous.iter().filter(|k| *k != restore) {
            state.release(&mut index, key, user, path);
        }
        debug!(%user, %path, key = %restore, "reverted path content");
        Ok(())
    }

    /// Cancels the upload claims `device` holds on pending blobs.
    ///
    /// The blobs stay pending; the next registration of the same content
    /// re-claims the upload. Returns the released keys in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn release_device_uploads(
        &self,
        user: &UserId,
        device: &DeviceId,
    ) -> StorageResult<Vec<StorageKey>> {
        let state = self.state()?;
        let mut index = state.index.lock();
        let mut released: Vec<StorageKey> = index
            .records
            .iter_mut()
            .filter(|(_, record)| {
                record.pending
                    && record
                        .uploader
                        .as_ref()
                        .is_some_and(|(u, d)| u == user && d == device)
            })
            .map(|(key, record)| {
                record.uploader = None;
                key.clone()
            })
            .collect();
        released.sort();
        if !released.is_empty() {
            debug!(%user, %device, count = released.len(), "released device uploads");
        }
        Ok(released)
    }

    /// Registers a one-shot callback for when `key` finishes uploading.
    ///
    /// Returns `false`, without registering, if the blob is not pending
    /// (already durable, or gone); the caller must handle completion
    /// itself. Callbacks run on the uploading thread after the store has
    /// released all of its locks.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn on_upload_complete(
        &self,
        key: &StorageKey,
        callback: CompletionCallback,
    ) -> StorageResult<bool> {
        let state = self.state()?;
        let index = state.index.lock();
        if !index.records.get(key).is_some_and(|record| record.pending) {
            return Ok(false);
        }
        state
            .listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push(callback);
        Ok(true)
    }

    /// Deletes queued orphan blobs from the backend.
    ///
    /// Returns how many blobs were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    /// Backend failures are logged and the blob stays queued.
    pub fn reclaim_orphans(&self) -> StorageResult<usize> {
        Ok(self.state()?.reclaim_orphans())
    }

    /// Looks up the blob holding `content`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn storage_key_for(&self, content: &ContentKey) -> StorageResult<Option<StorageKey>> {
        let state = self.state()?;
        if content.is_empty() {
            return Ok(Some(StorageKey::empty()));
        }
        Ok(state.index.lock().by_content.get(content).cloned())
    }

    /// Snapshot of one blob.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn blob_info(&self, key: &StorageKey) -> StorageResult<Option<BlobInfo>> {
        let state = self.state()?;
        Ok(state.index.lock().records.get(key).map(|r| r.info(key)))
    }

    /// Current head of a path's revision history.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn revision_head(&self, user: &UserId, path: &FilePath) -> StorageResult<Option<Revision>> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let paths = shard.lock();
        Ok(paths
            .entries
            .get(path)
            .and_then(|entry| entry.history.head().copied()))
    }

    /// Keys a path currently references, current first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn path_keys(&self, user: &UserId, path: &FilePath) -> StorageResult<Vec<StorageKey>> {
        let state = self.state()?;
        let shard = state.user_paths(user);
        let paths = shard.lock();
        Ok(paths.entries.get(path).map(PathEntry::keys).unwrap_or_default())
    }

    /// Aggregate counters.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before initialization.
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let state = self.state()?;
        let users = state.users.read().len();
        let index = state.index.lock();
        let mut stats = StoreStats {
            users,
            ..StoreStats::default()
        };
        for record in index.records.values() {
            stats.blobs += 1;
            stats.open_readers += record.readers;
            if record.pending {
                stats.pending += 1;
            } else {
                stats.stored_bytes += record.content.size;
            }
            if record.uploading {
                stats.uploading += 1;
            }
        }
        Ok(stats)
    }

    /// The blob backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }
}

impl StoreState {
    fn allocate_key(&self) -> StorageKey {
        StorageKey::new(self.next_key.fetch_add(1, Ordering::SeqCst).to_string())
    }

    fn user_paths(&self, user: &UserId) -> Arc<Mutex<UserPaths>> {
        if let Some(shard) = self.users.read().get(user) {
            return Arc::clone(shard);
        }
        let mut users = self.users.write();
        Arc::clone(users.entry(user.clone()).or_default())
    }

    /// Finds or creates the blob for `content` and records the usage.
    fn reference(
        &self,
        index: &mut BlobIndex,
        content: ContentKey,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
    ) -> FileUsage {
        if content.is_empty() {
            let key = StorageKey::empty();
            let record = index
                .records
                .entry(key.clone())
                .or_insert_with(|| BlobRecord::new(content, false));
            record.add_usage(user, path);
            return FileUsage {
                storage_key: key,
                pending: false,
                new_upload: false,
            };
        }

        if let Some(key) = index.by_content.get(&content).cloned() {
            if let Some(record) = index.records.get_mut(&key) {
                record.add_usage(user, path);
                let mut new_upload = false;
                if record.pending && record.uploader.is_none() && !record.uploading {
                    record.uploader = Some((user.clone(), device.clone()));
                    new_upload = true;
                }
                return FileUsage {
                    storage_key: key,
                    pending: record.pending,
                    new_upload,
                };
            }
        }

        let key = self.allocate_key();
        let mut record = BlobRecord::new(content, true);
        record.uploader = Some((user.clone(), device.clone()));
        record.add_usage(user, path);
        index.by_content.insert(content, key.clone());
        index.records.insert(key.clone(), record);
        FileUsage {
            storage_key: key,
            pending: true,
            new_upload: true,
        }
    }

    /// Makes `usage` the current content of `entry`.
    ///
    /// The previous content is released at once if the new content is
    /// durable, and kept as a fallback otherwise.
    fn supersede(
        &self,
        index: &mut BlobIndex,
        entry: &mut PathEntry,
        user: &UserId,
        path: &FilePath,
        usage: &FileUsage,
    ) {
        let new_key = &usage.storage_key;
        if entry.current == *new_key {
            return;
        }
        let old = std::mem::replace(&mut entry.current, new_key.clone());
        if usage.pending {
            entry.fallbacks.retain(|k| k != new_key);
            if !entry.fallbacks.contains(&old) {
                entry.fallbacks.push(old);
            }
            return;
        }

        let mut released: Vec<StorageKey> = entry.fallbacks.drain(..).collect();
        released.push(old);
        released.sort();
        released.dedup();
        for key in released.iter().filter(|k| *k != new_key) {
            self.release(index, key, user, path);
        }
    }

    /// Drops one usage and retires the blob if nothing references it.
    fn release(&self, index: &mut BlobIndex, key: &StorageKey, user: &UserId, path: &FilePath) {
        let Some(record) = index.records.get_mut(key) else {
            return;
        };
        record.remove_usage(user, path);
        if record.is_unused() && record.readers == 0 {
            self.retire(index, key);
        }
    }

    fn retire(&self, index: &mut BlobIndex, key: &StorageKey) {
        let Some(record) = index.records.remove(key) else {
            return;
        };
        if index.by_content.get(&record.content) == Some(key) {
            index.by_content.remove(&record.content);
        }
        self.listeners.lock().remove(key);
        if record.has_bytes() && !record.pending {
            self.graveyard.lock().push(record.file_id);
        }
        debug!(%key, pending = record.pending, "retired blob");
    }

    /// Releases the fallbacks of paths whose current content is `key`.
    fn release_fallbacks(&self, key: &StorageKey, user: &UserId, paths: &[FilePath]) {
        let shard = self.user_paths(user);
        let mut user_paths = shard.lock();
        let mut index = self.index.lock();
        for path in paths {
            let Some(entry) = user_paths.entries.get_mut(path) else {
                continue;
            };
            if entry.current != *key || entry.fallbacks.is_empty() {
                continue;
            }
            let fallbacks = std::mem::take(&mut entry.fallbacks);
            for old in fallbacks.iter().filter(|k| *k != key) {
                self.release(&mut index, old, user, path);
            }
        }
    }

    pub(crate) fn release_reader(&self, key: &StorageKey) {
        {
            let mut index = self.index.lock();
            let Some(record) = index.records.get_mut(key) else {
                return;
            };
            record.readers = record.readers.saturating_sub(1);
            if record.readers == 0 && record.is_unused() {
                self.retire(&mut index, key);
            }
        }
        self.reclaim_orphans();
    }

    /// Streams `data` into a staged upload and commits it.
    fn stage_upload(
        &self,
        key: &StorageKey,
        file_id: FileId,
        content: ContentKey,
        data: &mut dyn Read,
    ) -> StorageResult<()> {
        let mut writer = HashingWriter {
            inner: self.backend.begin_upload(file_id)?,
            context: md5::Context::new(),
            written: 0,
        };
        io::copy(data, &mut writer)?;
        writer.flush()?;
        let HashingWriter {
            inner,
            context,
            written,
        } = writer;
        drop(inner);

        if self.verify_content_hash {
            if written != content.size {
                return Err(StorageError::ContentMismatch {
                    key: key.clone(),
                    message: format!("expected {} bytes, got {written}", content.size),
                });
            }
            let actual = Md5Hash::from(context.compute());
            if actual != content.hash {
                return Err(StorageError::ContentMismatch {
                    key: key.clone(),
                    message: format!("expected MD5 {}, got {actual}", content.hash),
                });
            }
        }

        self.backend.commit_upload(file_id)
    }

    fn reclaim_orphans(&self) -> usize {
        let orphans = std::mem::take(&mut *self.graveyard.lock());
        let mut deleted = 0;
        let mut failed = Vec::new();
        for file_id in orphans {
            match self.backend.delete(file_id) {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(%file_id, error = %err, "failed to delete orphan blob");
                    failed.push(file_id);
                }
            }
        }
        if !failed.is_empty() {
            self.graveyard.lock().extend(failed);
        }
        if deleted > 0 {
            debug!(deleted, "reclaimed orphan blobs");
        }
        deleted
    }
}

struct HashingWriter {
    inner: Box<dyn Write + Send>,
    context: md5::Context,
    written: u64,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.context.consume(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
