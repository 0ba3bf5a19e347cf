//! The metadata provider.
//!
//! [`MetadataProvider`] owns one metadata tree and one event log per user
//! and keeps them consistent with the content store. Events whose content
//! is still uploading stay hidden from change queries until the upload
//! completes or is cancelled; see the `resolve` module for how they are
//! settled.
//!
//! # Lock order
//!
//! initialization guard → users map → one user's tree → that user's
//! events → pending index → query registry → issued sync ids. Store locks
//! may be taken while provider locks are held; the store never holds its
//! own locks while calling back into the provider.

mod resolve;

use crate::config::ProviderConfig;
use crate::error::{CoreError, CoreResult};
use crate::event::{ChangeBatch, FileChange, UserEvent};
use crate::event_log::{EventLog, Insertion};
use crate::initial::{InitialEntry, InitialMetadata};
use crate::metadata::{is_well_formed_revision, FileMetadata};
use crate::outcome::{Conflict, Outcome, StoredFile};
use crate::pending::{PendingIndex, QueryRegistry};
use crate::tree::{PathTree, TreeEvent};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use resolve::{Settlement, Visibility};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use synchub_storage::{PhysicalStorage, UsageUpdate};
use synchub_types::{DeviceId, FilePath, Md5Hash, StorageKey, SyncId, UserId};
use tracing::{debug, error, info, warn};

/// Device id under which preloaded content is registered.
pub const PRELOAD_DEVICE: &str = "preload";

/// Diagnostic hook for out-of-order log inserts.
///
/// Called with the user, the inserted id and the highest id already in
/// the log. Runs while the user's locks are held and must not call back
/// into the provider.
pub type UnserializedWriteHook = Arc<dyn Fn(&UserId, SyncId, SyncId) + Send + Sync>;

/// Provider counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    /// Users with a tree.
    pub users: usize,
    /// Tree entries across all users.
    pub entries: usize,
    /// Log events across all users, hidden ones included.
    pub events: usize,
    /// Storage keys some event is blocked on.
    pub blocked_keys: usize,
    /// Blocked events across all users.
    pub blocked_events: usize,
    /// Change queries in flight.
    pub active_queries: usize,
    /// Highest sync id handed out.
    pub last_sync_id: i64,
    /// Sync ids handed out whose mutation has not finished yet.
    pub issued_sync_ids: usize,
}

struct UserShard {
    tree: Mutex<PathTree<FileMetadata>>,
    events: Mutex<EventLog>,
}

impl UserShard {
    fn new() -> Self {
        Self {
            tree: Mutex::new(PathTree::new()),
            events: Mutex::new(EventLog::new()),
        }
    }
}

/// Shared state of an initialized provider.
pub(crate) struct ProviderState {
    this: Weak<ProviderState>,
    storage: Arc<PhysicalStorage>,
    config: ProviderConfig,
    last_sync_id: AtomicI64,
    issued: Mutex<BTreeSet<SyncId>>,
    users: RwLock<HashMap<UserId, Arc<UserShard>>>,
    pending: Mutex<PendingIndex>,
    queries: Mutex<QueryRegistry>,
    hook: Arc<RwLock<Option<UnserializedWriteHook>>>,
}

/// Per-user metadata trees and change logs over a content store.
///
/// # Lifecycle
///
/// Create with [`MetadataProvider::new`], then call
/// [`MetadataProvider::initialize`] exactly once with an initialized
/// store. Every other method fails with [`CoreError::NotInitialized`]
/// before that.
///
/// # Sync ids
///
/// Mutations take a sync id from [`MetadataProvider::new_sync_id_before_start`].
/// Ids are allocated before the user's lock is taken, so a mutation may
/// land before one that was allocated earlier; the log keeps events
/// sorted by id and reports such inserts to the hook set with
/// [`MetadataProvider::set_unserialized_write_hook`].
///
/// An id stays issued until the mutation it was passed to returns,
/// whatever the outcome. Change queries stop below the lowest issued id,
/// so a late insert is never behind a cursor already handed out. Every
/// id obtained from [`MetadataProvider::new_sync_id_before_start`] must
/// therefore be passed to exactly one mutation.
///
/// # Conflicts
///
/// Rejections caused by concurrent editing come back as
/// [`Outcome::Conflict`]; errors are reserved for broken preconditions,
/// store failures and internal invariant violations.
pub struct MetadataProvider {
    config: ProviderConfig,
    hook: Arc<RwLock<Option<UnserializedWriteHook>>>,
    state: OnceLock<Arc<ProviderState>>,
}

impl Default for MetadataProvider {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

impl MetadataProvider {
    /// Creates an uninitialized provider.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            hook: Arc::new(RwLock::new(None)),
            state: OnceLock::new(),
        }
    }

    /// Returns true once [`MetadataProvider::initialize`] succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Binds the provider to `storage` and seeds it from `initial`.
    ///
    /// Each preloaded entry becomes a `Created` event at a fresh sync id,
    /// folders first. File content is registered with the store under the
    /// [`PRELOAD_DEVICE`]; content the store does not hold stays pending
    /// and hidden until someone uploads it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::AlreadyInitialized`] on a second call
    /// - [`CoreError::Storage`] if `storage` is not initialized
    /// - [`CoreError::InvalidArgument`] for inconsistent preload entries
    pub fn initialize(
        &self,
        storage: Arc<PhysicalStorage>,
        initial: Option<&InitialMetadata>,
    ) -> CoreResult<()> {
        if self.state.get().is_some() {
            return Err(CoreError::AlreadyInitialized);
        }
        if !storage.is_initialized() {
            return Err(synchub_storage::StorageError::NotInitialized.into());
        }

        let state = Arc::new_cyclic(|this| ProviderState {
            this: this.clone(),
            storage,
            config: self.config.clone(),
            last_sync_id: AtomicI64::new(0),
            issued: Mutex::new(BTreeSet::new()),
            users: RwLock::new(HashMap::new()),
            pending: Mutex::new(PendingIndex::new()),
            queries: Mutex::new(QueryRegistry::new()),
            hook: Arc::clone(&self.hook),
        });

        let seeded = match initial {
            Some(initial) => state.seed(initial)?,
            None => 0,
        };

        self.state
            .set(state)
            .map_err(|_| CoreError::AlreadyInitialized)?;
        info!(entries = seeded, "metadata provider initialized");
        Ok(())
    }

    fn state(&self) -> CoreResult<&Arc<ProviderState>> {
        self.state.get().ok_or(CoreError::NotInitialized)
    }

    /// Sets the hook called on out-of-order log inserts.
    pub fn set_unserialized_write_hook(&self, hook: Option<UnserializedWriteHook>) {
        *self.hook.write() = hook;
    }

    /// Allocates the sync id for an operation about to start.
    ///
    /// Change feeds of every user hold back at this id until it is passed
    /// to a mutation and that mutation returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn new_sync_id_before_start(&self) -> CoreResult<SyncId> {
        Ok(self.state()?.issue_sync_id())
    }

    /// Adds a folder at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for the root, file metadata
    /// or an unallocated sync id, and [`CoreError::DuplicateSyncId`] if the
    /// id was already used.
    pub fn add_folder_metadata(
        &self,
        sync_id: SyncId,
        user: &UserId,
        path: &FilePath,
        metadata: FileMetadata,
    ) -> CoreResult<Outcome<FileMetadata>> {
        let state = self.state()?;
        let _issued = state.track_issued(sync_id);
        metadata.validate()?;
        if !metadata.is_folder {
            return Err(CoreError::invalid_argument(format!(
                "add_folder_metadata got file metadata for {path}"
            )));
        }
        state.check_mutation(sync_id, path)?;

        let shard = state.shard(user);
        let mut tree = shard.tree.lock();
        let mut events = shard.events.lock();
        state.ensure_unused(user, &events, sync_id)?;

        if let Some(conflict) = placement_conflict(&tree, path) {
            debug!(%user, %path, %conflict, "folder rejected");
            return Ok(Outcome::Conflict(conflict));
        }

        tree.insert(path, metadata.clone());
        state.record(
            user,
            &mut events,
            UserEvent::new(sync_id, FileChange::created(path.clone(), metadata.clone())),
        )?;
        debug!(%user, %path, %sync_id, "added folder");
        Ok(Outcome::Applied(metadata))
    }

    /// Adds a file at `path` and registers its content with the store.
    ///
    /// The returned entry carries the blob's storage key. If the content
    /// is pending, the `Created` event stays hidden until it is uploaded;
    /// `new_upload` tells whether this device is expected to upload it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for the root, folder or
    /// malformed file metadata and unallocated sync ids.
    pub fn add_file_metadata(
        &self,
        sync_id: SyncId,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        metadata: FileMetadata,
    ) -> CoreResult<Outcome<StoredFile>> {
        let state = self.state()?;
        let _issued = state.track_issued(sync_id);
        if metadata.is_folder {
            return Err(CoreError::invalid_argument(format!(
                "add_file_metadata got folder metadata for {path}"
            )));
        }
        let content = metadata.content_key()?;
        state.check_mutation(sync_id, path)?;

        let shard = state.shard(user);
        let mut tree = shard.tree.lock();
        let mut events = shard.events.lock();
        state.ensure_unused(user, &events, sync_id)?;

        if let Some(conflict) = placement_conflict(&tree, path) {
            debug!(%user, %path, %conflict, "file rejected");
            return Ok(Outcome::Conflict(conflict));
        }

        let usage = state
            .storage
            .add_user_file(user, device, path, content.hash, content.size)?;
        let mut metadata = metadata;
        metadata.storage_key = Some(usage.storage_key.clone());

        tree.insert(path, metadata.clone());
        state.record(
            user,
            &mut events,
            UserEvent::new(sync_id, FileChange::created(path.clone(), metadata.clone())),
        )?;
        if usage.pending {
            state.block_on(user, &mut tree, &mut events, &usage.storage_key, sync_id)?;
        }
        debug!(%user, %path, %sync_id, key = %usage.storage_key, pending = usage.pending, "added file");

        Ok(Outcome::Applied(StoredFile {
            metadata,
            pending: usage.pending,
            new_upload: usage.new_upload,
        }))
    }

    /// Looks up the entry at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn try_get_metadata(
        &self,
        user: &UserId,
        path: &FilePath,
    ) -> CoreResult<Option<FileMetadata>> {
        let state = self.state()?;
        Ok(state
            .existing_shard(user)
            .and_then(|shard| shard.tree.lock().get(path).cloned()))
    }

    /// Lists the direct children of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn list_children(
        &self,
        user: &UserId,
        path: &FilePath,
    ) -> CoreResult<Vec<(FilePath, FileMetadata)>> {
        let state = self.state()?;
        Ok(state
            .existing_shard(user)
            .map(|shard| {
                shard
                    .tree
                    .lock()
                    .children(path)
                    .into_iter()
                    .map(|(p, md)| (p.clone(), md.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Deletes `path` and everything below it.
    ///
    /// Every file in the subtree drops its content reference; blobs left
    /// without references are deleted from the store after the user's
    /// locks are released. One `Deleted` event is recorded for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for the root or an
    /// unallocated sync id.
    pub fn recursively_remove_metadata(
        &self,
        sync_id: SyncId,
        user: &UserId,
        path: &FilePath,
    ) -> CoreResult<Outcome<FileMetadata>> {
        let state = self.state()?;
        let _issued = state.track_issued(sync_id);
        state.check_mutation(sync_id, path)?;

        let shard = state.shard(user);
        let removed = {
            let mut tree = shard.tree.lock();
            let mut events = shard.events.lock();
            state.ensure_unused(user, &events, sync_id)?;

            if !tree.contains(path) {
                return Ok(Outcome::Conflict(Conflict::NotFound { path: path.clone() }));
            }

            let storage = &state.storage;
            let removed = tree
                .remove_recursive(path, |event| -> CoreResult<()> {
                    if let TreeEvent::Deleted { path, value } = event {
                        if !value.is_folder {
                            storage.remove_user_usage_from_file(user, path)?;
                        }
                    }
                    Ok(())
                })?
                .ok_or_else(|| CoreError::invariant(format!("{path} vanished during removal")))?;

            state.record(
                user,
                &mut events,
                UserEvent::new(sync_id, FileChange::deleted(path.clone(), removed.clone())),
            )?;
            state.settle_vanished(user, &mut tree, &mut events)?;
            debug!(%user, %path, %sync_id, "removed subtree");
            removed
        };

        state.storage.reclaim_orphans()?;
        Ok(Outcome::Applied(removed))
    }

    /// Moves `from` and everything below it to `to`.
    ///
    /// Content references move with the files. One `Renamed` event is
    /// recorded, carrying the moved entry's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if either path is the root
    /// or the sync id is unallocated.
    pub fn recursively_rename_metadata(
        &self,
        sync_id: SyncId,
        user: &UserId,
        from: &FilePath,
        to: &FilePath,
    ) -> CoreResult<Outcome<FileMetadata>> {
        let state = self.state()?;
        let _issued = state.track_issued(sync_id);
        state.check_mutation(sync_id, from)?;
        if to.is_root() {
            return Err(CoreError::invalid_argument("cannot rename onto the root"));
        }

        let shard = state.shard(user);
        let mut tree = shard.tree.lock();
        let mut events = shard.events.lock();
        state.ensure_unused(user, &events, sync_id)?;

        let Some(metadata) = tree.get(from).cloned() else {
            return Ok(Outcome::Conflict(Conflict::NotFound { path: from.clone() }));
        };
        if to.starts_with(from) {
            return Ok(Outcome::Conflict(Conflict::InvalidTarget {
                from: from.clone(),
                to: to.clone(),
            }));
        }
        if tree.contains(to) {
            return Ok(Outcome::Conflict(Conflict::AlreadyExists { path: to.clone() }));
        }
        if let Some(conflict) = parent_conflict(&tree, to) {
            return Ok(Outcome::Conflict(conflict));
        }

        let storage = &state.storage;
        let moved = tree.rename_recursive(from, to, |event| -> CoreResult<()> {
            if let TreeEvent::Moved {
                from: old,
                to: new,
                value,
            } = event
            {
                if !value.is_folder {
                    storage.move_user_path_usage(user, old, new)?;
                }
            }
            Ok(())
        })?;
        if !moved {
            return Err(CoreError::invariant(format!(
                "tree refused checked rename {from} -> {to}"
            )));
        }

        let announced = state.rename_announcement(user, &events, sync_id, from, &metadata);
        state.record(
            user,
            &mut events,
            UserEvent::new(sync_id, FileChange::renamed(from.clone(), to.clone(), announced)),
        )?;
        debug!(%user, %from, %to, %sync_id, "renamed subtree");
        Ok(Outcome::Applied(metadata))
    }

    /// Replaces the entry at `path`.
    ///
    /// For files, `base_revision` must be the path's current content
    /// revision; otherwise the update is rejected as stale and the latest
    /// revision is reported. Both revisions must be 32 hex characters.
    /// Folders only update their timestamps and link target.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for the root, inconsistent
    /// metadata or an unallocated sync id.
    pub fn update_metadata(
        &self,
        sync_id: SyncId,
        user: &UserId,
        device: &DeviceId,
        path: &FilePath,
        metadata: FileMetadata,
        base_revision: Option<&str>,
    ) -> CoreResult<Outcome<StoredFile>> {
        let state = self.state()?;
        let _issued = state.track_issued(sync_id);
        if !metadata.is_folder {
            let revision = metadata.revision.as_deref().unwrap_or_default();
            if !is_well_formed_revision(revision) {
                return Ok(Outcome::Conflict(Conflict::MalformedRevision {
                    revision: revision.to_string(),
                }));
            }
            match base_revision {
                Some(base) if is_well_formed_revision(base) => {}
                other => {
                    return Ok(Outcome::Conflict(Conflict::MalformedRevision {
                        revision: other.unwrap_or_default().to_string(),
                    }));
                }
            }
        }
        metadata.validate()?;
        state.check_mutation(sync_id, path)?;

        let shard = state.shard(user);
        let stored = {
            let mut tree = shard.tree.lock();
            let mut events = shard.events.lock();
            state.ensure_unused(user, &events, sync_id)?;

            let Some(existing) = tree.get(path).cloned() else {
                return Ok(Outcome::Conflict(Conflict::NotFound { path: path.clone() }));
            };
            if existing.is_folder != metadata.is_folder {
                return Ok(Outcome::Conflict(Conflict::TypeMismatch { path: path.clone() }));
            }

            if metadata.is_folder {
                tree.insert(path, metadata.clone());
                state.record(
                    user,
                    &mut events,
                    UserEvent::new(sync_id, FileChange::modified(path.clone(), metadata.clone()))
                        .with_previous(Some(existing)),
                )?;
                debug!(%user, %path, %sync_id, "updated folder");
                return Ok(Outcome::Applied(StoredFile {
                    metadata,
                    pending: false,
                    new_upload: false,
                }));
            }

            let content = metadata.content_key()?;
            let base = Md5Hash::from_hex(base_revision.unwrap_or_default())?;
            let usage = match state.storage.update_file_usage(
                user,
                device,
                path,
                base,
                content.hash,
                content.size,
            )? {
                UsageUpdate::Updated(usage) => usage,
                UsageUpdate::Stale { latest } => {
                    debug!(%user, %path, "stale modification rejected");
                    return Ok(Outcome::Conflict(Conflict::StaleRevision {
                        path: path.clone(),
                        latest: latest.map(|hash| hash.to_hex()),
                    }));
                }
            };

            let mut metadata = metadata;
            metadata.storage_key = Some(usage.storage_key.clone());
            tree.insert(path, metadata.clone());

            let previous_hidden = existing
                .storage_key
                .as_ref()
                .is_some_and(|key| state.pending.lock().is_blocked(key, user));
            if previous_hidden && !usage.pending {
                state.record_over_hidden(user, &mut events, sync_id, path, &metadata)?;
            } else {
                state.record(
                    user,
                    &mut events,
                    UserEvent::new(sync_id, FileChange::modified(path.clone(), metadata.clone()))
                        .with_previous(Some(existing)),
                )?;
            }
            if usage.pending {
                state.block_on(user, &mut tree, &mut events, &usage.storage_key, sync_id)?;
            }
            state.settle_vanished(user, &mut tree, &mut events)?;
            debug!(%user, %path, %sync_id, key = %usage.storage_key, pending = usage.pending, "updated file");

            StoredFile {
                metadata,
                pending: usage.pending,
                new_upload: usage.new_upload,
            }
        };

        state.storage.reclaim_orphans()?;
        Ok(Outcome::Applied(stored))
    }

    /// Changes of `user` recorded after `cursor`.
    ///
    /// Events whose content is still uploading are left out; they show up
    /// past the returned cursor once the upload completes. The scan stops
    /// below the lowest sync id still issued to a running mutation. The
    /// cursor is the highest id scanned, so feeding it back never skips a
    /// visible change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn changes_since_sync_id(&self, cursor: SyncId, user: &UserId) -> CoreResult<ChangeBatch> {
        let state = self.state()?;
        let Some(shard) = state.existing_shard(user) else {
            return Ok(ChangeBatch {
                changes: Vec::new(),
                cursor,
            });
        };

        // Settles take the events lock too, so only those after the scan
        // mark keys late, and their fresh ids lie past the cursor.
        let (token, scanned) = {
            let events = shard.events.lock();
            let token = state.queries.lock().register(user);
            let horizon = state.feed_horizon();
            let after = events
                .after(cursor)
                .take_while(|event| !horizon.is_some_and(|horizon| event.sync_id >= horizon))
                .cloned();
            let scanned: Vec<UserEvent> = match state.config.max_changes_per_query {
                Some(limit) => after.take(limit).collect(),
                None => after.collect(),
            };
            (token, scanned)
        };
        let next_cursor = scanned.last().map_or(cursor, |event| event.sync_id);

        let visible: Vec<UserEvent> = {
            let pending = state.pending.lock();
            scanned
                .into_iter()
                .filter(|event| !resolve::is_hidden_by(event, |key| pending.is_blocked(key, user)))
                .collect()
        };

        let late = state.queries.lock().finish(token);
        let changes = visible
            .into_iter()
            .filter(|event| !resolve::is_hidden_by(event, |key| late.contains(key)))
            .map(|event| event.change)
            .collect();

        Ok(ChangeBatch {
            changes,
            cursor: next_cursor,
        })
    }

    /// Cancels every upload `device` of `user` still owes.
    ///
    /// Each affected path is rolled back to its last visible content, or
    /// deleted if it never had any, and the rollback is recorded in the
    /// log. Returns the storage keys whose uploads were cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolation`] if the log and tree
    /// disagree about a rolled-back path.
    pub fn purge_user_pendings_by_device(
        &self,
        user: &UserId,
        device: &DeviceId,
    ) -> CoreResult<Vec<StorageKey>> {
        let state = self.state()?;
        let released = match state.existing_shard(user) {
            Some(shard) => {
                let mut tree = shard.tree.lock();
                let mut events = shard.events.lock();
                let released = state.storage.release_device_uploads(user, device)?;
                for key in &released {
                    state.unblock_and_settle(user, &mut tree, &mut events, key, Settlement::Cancelled)?;
                }
                state.settle_vanished(user, &mut tree, &mut events)?;
                released
            }
            None => state.storage.release_device_uploads(user, device)?,
        };

        state.storage.reclaim_orphans()?;
        if !released.is_empty() {
            warn!(%user, %device, keys = released.len(), "purged pending uploads of disconnected device");
        }
        Ok(released)
    }

    /// The full event log of `user`, hidden events included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn events(&self, user: &UserId) -> CoreResult<Vec<UserEvent>> {
        let state = self.state()?;
        Ok(state
            .existing_shard(user)
            .map(|shard| shard.events.lock().iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every entry of `user`'s tree in path order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn entries(&self, user: &UserId) -> CoreResult<Vec<(FilePath, FileMetadata)>> {
        let state = self.state()?;
        Ok(state
            .existing_shard(user)
            .map(|shard| {
                shard
                    .tree
                    .lock()
                    .entries()
                    .into_iter()
                    .map(|(p, md)| (p.clone(), md.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Users known to the provider, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn users(&self) -> CoreResult<Vec<UserId>> {
        let state = self.state()?;
        let mut users: Vec<UserId> = state.users.read().keys().cloned().collect();
        users.sort();
        Ok(users)
    }

    /// Returns true if `user`'s events on `key` are still hidden.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn is_blocked(&self, user: &UserId, key: &StorageKey) -> CoreResult<bool> {
        Ok(self.state()?.pending.lock().is_blocked(key, user))
    }

    /// Provider counters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInitialized`] before initialization.
    pub fn stats(&self) -> CoreResult<ProviderStats> {
        let state = self.state()?;
        let shards: Vec<Arc<UserShard>> = state.users.read().values().cloned().collect();
        let mut stats = ProviderStats {
            users: shards.len(),
            last_sync_id: state.last_sync_id.load(Ordering::SeqCst),
            ..ProviderStats::default()
        };
        for shard in shards {
            stats.entries += shard.tree.lock().len();
            stats.events += shard.events.lock().len();
        }
        {
            let pending = state.pending.lock();
            stats.blocked_keys = pending.key_count();
            stats.blocked_events = pending.event_count();
        }
        stats.active_queries = state.queries.lock().active_count();
        stats.issued_sync_ids = state.issued.lock().len();
        Ok(stats)
    }
}

fn parent_conflict(tree: &PathTree<FileMetadata>, path: &FilePath) -> Option<Conflict> {
    let parent = path.parent()?;
    if parent.is_root() {
        return None;
    }
    match tree.get(&parent) {
        None => Some(Conflict::ParentMissing { path: path.clone() }),
        Some(metadata) if !metadata.is_folder => Some(Conflict::NotAFolder { path: parent }),
        Some(_) => None,
    }
}

fn placement_conflict(tree: &PathTree<FileMetadata>, path: &FilePath) -> Option<Conflict> {
    if tree.contains(path) {
        return Some(Conflict::AlreadyExists { path: path.clone() });
    }
    parent_conflict(tree, path)
}

/// Releases an issued sync id when a mutation returns.
struct IssuedSyncId<'a> {
    issued: &'a Mutex<BTreeSet<SyncId>>,
    sync_id: SyncId,
}

impl Drop for IssuedSyncId<'_> {
    fn drop(&mut self) {
        self.issued.lock().remove(&self.sync_id);
    }
}

impl ProviderState {
    /// Allocates an id for an event recorded under the user's log lock.
    fn allocate_sync_id(&self) -> SyncId {
        SyncId::new(self.last_sync_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocates an id for a caller and marks it issued.
    ///
    /// Allocation happens under the issued-set lock, so any id allocated
    /// after a query read the set is higher than everything it scanned.
    fn issue_sync_id(&self) -> SyncId {
        let mut issued = self.issued.lock();
        let sync_id = self.allocate_sync_id();
        issued.insert(sync_id);
        sync_id
    }

    /// Keeps `sync_id` issued until the returned guard drops.
    fn track_issued(&self, sync_id: SyncId) -> IssuedSyncId<'_> {
        IssuedSyncId {
            issued: &self.issued,
            sync_id,
        }
    }

    /// Lowest id still issued. Logs are complete below it.
    fn feed_horizon(&self) -> Option<SyncId> {
        self.issued.lock().first().copied()
    }

    fn shard(&self, user: &UserId) -> Arc<UserShard> {
        if let Some(shard) = self.users.read().get(user) {
            return Arc::clone(shard);
        }
        let mut users = self.users.write();
        Arc::clone(
            users
                .entry(user.clone())
                .or_insert_with(|| Arc::new(UserShard::new())),
        )
    }

    fn existing_shard(&self, user: &UserId) -> Option<Arc<UserShard>> {
        self.users.read().get(user).cloned()
    }

    /// Checks the arguments every mutation shares.
    fn check_mutation(&self, sync_id: SyncId, path: &FilePath) -> CoreResult<()> {
        if path.is_root() {
            return Err(CoreError::invalid_argument("the root cannot be changed"));
        }
        let last = self.last_sync_id.load(Ordering::SeqCst);
        if sync_id.as_i64() < 1 || sync_id.as_i64() > last {
            return Err(CoreError::invalid_argument(format!(
                "{sync_id} was not allocated (last is {last})"
            )));
        }
        Ok(())
    }

    fn ensure_unused(&self, user: &UserId, events: &EventLog, sync_id: SyncId) -> CoreResult<()> {
        if events.contains(sync_id) {
            return Err(CoreError::DuplicateSyncId {
                user: user.clone(),
                sync_id,
            });
        }
        Ok(())
    }

    /// Inserts an event, reporting out-of-order inserts.
    fn record(&self, user: &UserId, events: &mut EventLog, event: UserEvent) -> CoreResult<()> {
        let sync_id = event.sync_id;
        match events.insert(event) {
            Ok(Insertion::Appended) => Ok(()),
            Ok(Insertion::OutOfOrder { last }) => {
                warn!(%user, %sync_id, %last, "event inserted out of order; writes for this user were not serialized");
                let hook = self.hook.read().clone();
                if let Some(hook) = hook {
                    hook(user, sync_id, last);
                }
                Ok(())
            }
            Err(_) => Err(CoreError::DuplicateSyncId {
                user: user.clone(),
                sync_id,
            }),
        }
    }

    /// Records a provider-generated event at a fresh sync id.
    fn append_fresh(
        &self,
        user: &UserId,
        events: &mut EventLog,
        change: FileChange,
        previous: Option<FileMetadata>,
    ) -> CoreResult<SyncId> {
        let sync_id = self.allocate_sync_id();
        self.record(user, events, UserEvent::new(sync_id, change).with_previous(previous))?;
        Ok(sync_id)
    }

    /// Records a durable write over content that consumers never saw.
    ///
    /// Consumers know the path by its last visible content, if any: the
    /// write is a `Created` without one, otherwise a `Modified` of that
    /// content, preceded by a `Renamed` if they know it under another path.
    fn record_over_hidden(
        &self,
        user: &UserId,
        events: &mut EventLog,
        sync_id: SyncId,
        path: &FilePath,
        metadata: &FileMetadata,
    ) -> CoreResult<()> {
        let blocked = self.pending.lock().blocked_keys(user);
        let view = Visibility::new(blocked, None);
        match resolve::find_predecessor(events, sync_id, path, &view) {
            None => self.record(
                user,
                events,
                UserEvent::new(sync_id, FileChange::created(path.clone(), metadata.clone())),
            ),
            Some(predecessor) => {
                let seen = resolve::seen_path(events, &predecessor, None, &view);
                if seen == *path {
                    return self.record(
                        user,
                        events,
                        UserEvent::new(sync_id, FileChange::modified(path.clone(), metadata.clone()))
                            .with_previous(Some(predecessor.metadata)),
                    );
                }
                self.record(
                    user,
                    events,
                    UserEvent::new(
                        sync_id,
                        FileChange::renamed(seen, path.clone(), predecessor.metadata.clone()),
                    ),
                )?;
                self.append_fresh(
                    user,
                    events,
                    FileChange::modified(path.clone(), metadata.clone()),
                    Some(predecessor.metadata),
                )?;
                Ok(())
            }
        }
    }

    /// Metadata a rename of `from` is recorded with.
    ///
    /// A file whose current content is still uploading is announced with
    /// the content consumers last saw at `from`, so they can follow the
    /// move. Without such content the rename carries the current metadata
    /// and stays hidden with it.
    fn rename_announcement(
        &self,
        user: &UserId,
        events: &EventLog,
        sync_id: SyncId,
        from: &FilePath,
        metadata: &FileMetadata,
    ) -> FileMetadata {
        let blocked = {
            let pending = self.pending.lock();
            match &metadata.storage_key {
                Some(key) if pending.is_blocked(key, user) => pending.blocked_keys(user),
                _ => return metadata.clone(),
            }
        };
        let view = Visibility::new(blocked, None);
        match resolve::find_predecessor(events, sync_id, from, &view) {
            Some(predecessor)
                if resolve::seen_path(events, &predecessor, None, &view) == *from =>
            {
                predecessor.metadata
            }
            _ => metadata.clone(),
        }
    }

    /// Hides `sync_id` until `key` is uploaded.
    ///
    /// The first event of a user on a key registers a completion callback.
    /// If the upload finished in the meantime the event is settled at once.
    fn block_on(
        &self,
        user: &UserId,
        tree: &mut PathTree<FileMetadata>,
        events: &mut EventLog,
        key: &StorageKey,
        sync_id: SyncId,
    ) -> CoreResult<()> {
        if !self.pending.lock().block(key, user, sync_id) {
            return Ok(());
        }

        let this = self.this.clone();
        let registered = self.storage.on_upload_complete(
            key,
            Box::new(move |key| {
                if let Some(state) = this.upgrade() {
                    state.upload_completed(key);
                }
            }),
        )?;
        if !registered {
            let settlement = match self.storage.blob_info(key)? {
                Some(_) => Settlement::Completed,
                None => Settlement::Vanished,
            };
            self.unblock_and_settle(user, tree, events, key, settlement)?;
        }
        Ok(())
    }

    /// Completion callback: settles every user blocked on `key`.
    fn upload_completed(&self, key: &StorageKey) {
        let users = self.pending.lock().users_blocked_on(key);
        for user in users {
            let Some(shard) = self.existing_shard(&user) else {
                continue;
            };
            let mut tree = shard.tree.lock();
            let mut events = shard.events.lock();
            let settled = self
                .unblock_and_settle(&user, &mut tree, &mut events, key, Settlement::Completed)
                .and_then(|_| self.settle_vanished(&user, &mut tree, &mut events));
            if let Err(err) = settled {
                error!(%user, %key, error = %err, "failed to publish completed upload");
            }
        }
    }

    /// Unblocks `(key, user)` and settles its events in id order.
    ///
    /// Returns how many events were settled; zero if the pair was not
    /// blocked, which makes repeated calls harmless.
    fn unblock_and_settle(
        &self,
        user: &UserId,
        tree: &mut PathTree<FileMetadata>,
        events: &mut EventLog,
        key: &StorageKey,
        settlement: Settlement,
    ) -> CoreResult<usize> {
        let (ids, blocked) = {
            let mut pending = self.pending.lock();
            let ids = pending.unblock(key, user);
            if ids.is_empty() {
                return Ok(0);
            }
            self.queries.lock().record_late(user, key);
            (ids, pending.blocked_keys(user))
        };

        let view = Visibility::new(blocked, Some(key));
        for sync_id in &ids {
            self.settle_event(user, tree, events, &view, *sync_id, key, settlement)?;
        }
        debug!(%user, %key, events = ids.len(), ?settlement, "settled blocked events");
        Ok(ids.len())
    }

    /// Settles keys whose blobs left the store while still blocking
    /// events of `user`.
    fn settle_vanished(
        &self,
        user: &UserId,
        tree: &mut PathTree<FileMetadata>,
        events: &mut EventLog,
    ) -> CoreResult<()> {
        let blocked = self.pending.lock().blocked_keys(user);
        for key in blocked {
            if self.storage.blob_info(&key)?.is_none() {
                self.unblock_and_settle(user, tree, events, &key, Settlement::Vanished)?;
            }
        }
        Ok(())
    }

    /// Seeds trees and logs from a preload.
    fn seed(&self, initial: &InitialMetadata) -> CoreResult<usize> {
        let now = Utc::now();
        let device = DeviceId::new(PRELOAD_DEVICE);
        let mut seeded = 0;

        for preload in &initial.users {
            let user = &preload.user;
            let shard = self.shard(user);
            let mut tree = shard.tree.lock();
            let mut events = shard.events.lock();

            let mut entries: Vec<&InitialEntry> = preload.entries.iter().collect();
            entries.sort_by_key(|entry| (!entry.folder, entry.path.depth()));

            for entry in entries {
                let path = &entry.path;
                if path.is_root() {
                    return Err(CoreError::invalid_argument("cannot preload the root"));
                }
                if let Some(conflict) = placement_conflict(&tree, path) {
                    return Err(CoreError::invalid_argument(format!(
                        "preload of {user} rejected: {conflict}"
                    )));
                }

                let mut metadata = entry.metadata(now)?;
                let mut pending = None;
                if let Some(content) = entry.content_key()? {
                    let usage =
                        self.storage
                            .add_user_file(user, &device, path, content.hash, content.size)?;
                    metadata.storage_key = Some(usage.storage_key.clone());
                    if usage.pending {
                        pending = Some(usage.storage_key);
                    }
                }

                let sync_id = self.allocate_sync_id();
                tree.insert(path, metadata.clone());
                self.record(
                    user,
                    &mut events,
                    UserEvent::new(sync_id, FileChange::created(path.clone(), metadata)),
                )?;
                if let Some(key) = pending {
                    self.block_on(user, &mut tree, &mut events, &key, sync_id)?;
                }
                seeded += 1;
            }

            self.storage.release_device_uploads(user, &device)?;
        }
        Ok(seeded)
    }
}

#[cfg(test)]
mod tests;
