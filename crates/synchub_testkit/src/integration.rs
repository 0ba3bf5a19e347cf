//! Cross-crate integration helpers.
//!
//! [`Replica`] mirrors what a client builds from a user's change feed.
//! [`SyncClient`] drives a [`ServerData`] the way one device would and
//! keeps its own replica, so tests can check that the feed converges on
//! the server's tree.

use std::collections::{BTreeMap, HashMap};
use crate::generators::{SyncOp, CONTENT_POOL, DEVICE_POOL, PATH_POOL};
use synchub_core::{
    ChangeKind, Conflict, CoreError, CoreResult, FileChange, FileMetadata, Outcome, ServerData,
    StoredFile,
};
use synchub_storage::StorageError;
use synchub_types::{ContentKey, DeviceId, FilePath, StorageKey, SyncId, UserId};

/// Shape of an entry for comparisons: folder flag and content key.
pub type EntryShape = (bool, Option<StorageKey>);

/// A client-side copy of one user's tree, built from the change feed.
#[derive(Debug, Clone, Default)]
pub struct Replica {
    entries: BTreeMap<FilePath, FileMetadata>,
    cursor: SyncId,
}

impl Replica {
    /// Creates an empty replica at cursor zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor of the last pull.
    pub fn cursor(&self) -> SyncId {
        self.cursor
    }

    /// Entry at `path`.
    pub fn get(&self, path: &FilePath) -> Option<&FileMetadata> {
        self.entries.get(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the replica is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one change.
    pub fn apply(&mut self, change: &FileChange) {
        match change.kind {
            ChangeKind::Created | ChangeKind::Modified => {
                self.entries
                    .insert(change.new_path.clone(), change.metadata.clone());
            }
            ChangeKind::Deleted => {
                self.entries
                    .retain(|path, _| !path.starts_with(&change.new_path));
            }
            ChangeKind::Renamed => {
                let Some(from) = &change.old_path else {
                    return;
                };
                let moved: Vec<FilePath> = self
                    .entries
                    .keys()
                    .filter(|path| path.starts_with(from))
                    .cloned()
                    .collect();
                let mut relocated = Vec::with_capacity(moved.len());
                for path in moved {
                    if let (Some(metadata), Some(target)) = (
                        self.entries.remove(&path),
                        path.rebase(from, &change.new_path),
                    ) {
                        relocated.push((target, metadata));
                    }
                }
                self.entries.extend(relocated);
            }
        }
    }

    /// Pulls and applies every change after the current cursor.
    ///
    /// Returns the number of changes applied.
    pub fn pull(&mut self, server: &ServerData, user: &UserId) -> CoreResult<usize> {
        let mut applied = 0;
        loop {
            let batch = server.changes_since(user, self.cursor)?;
            for change in &batch.changes {
                self.apply(change);
            }
            applied += batch.len();
            if batch.cursor == self.cursor {
                return Ok(applied);
            }
            self.cursor = batch.cursor;
        }
    }

    /// Path to shape map of the replica.
    pub fn shape(&self) -> BTreeMap<FilePath, EntryShape> {
        shape_of(self.entries.iter())
    }
}

fn shape_of<'a>(
    entries: impl Iterator<Item = (&'a FilePath, &'a FileMetadata)>,
) -> BTreeMap<FilePath, EntryShape> {
    entries
        .map(|(path, md)| (path.clone(), (md.is_folder, md.storage_key.clone())))
        .collect()
}

/// Path to shape map of `user`'s tree on the server.
pub fn server_shape(server: &ServerData, user: &UserId) -> BTreeMap<FilePath, EntryShape> {
    let entries = server
        .provider()
        .entries(user)
        .expect("Failed to list server entries");
    shape_of(entries.iter().map(|(path, md)| (path, md)))
}

/// Uploads every content in `contents` whose blob is still pending.
///
/// Returns how many blobs were written.
pub fn upload_all_pending<'a>(
    server: &ServerData,
    contents: impl IntoIterator<Item = &'a [u8]>,
) -> usize {
    let mut written = 0;
    for data in contents {
        let content = ContentKey::of_bytes(data);
        let Some(key) = server
            .storage()
            .storage_key_for(&content)
            .expect("Failed to look up content")
        else {
            continue;
        };
        if matches!(server.storage().is_storage_key_pending(&key), Ok(true))
            && server.upload_bytes(&key, data).expect("Failed to upload")
        {
            written += 1;
        }
    }
    written
}

/// Asserts that no file in `replica` points at content still in flight.
pub fn assert_no_pending_content(server: &ServerData, replica: &Replica) {
    for (path, metadata) in &replica.entries {
        if let Some(key) = &metadata.storage_key {
            assert!(
                !matches!(server.storage().is_storage_key_pending(key), Ok(true)),
                "{path} became visible before {key} was uploaded"
            );
        }
    }
}

fn pool_path(index: usize) -> FilePath {
    FilePath::parse(PATH_POOL[index]).expect("Invalid pool path")
}

/// Applies one script step for `user`.
///
/// Conflicts are expected and ignored; errors panic.
pub fn apply_op(server: &ServerData, user: &UserId, op: &SyncOp, replica: &mut Replica) {
    match *op {
        SyncOp::Folder { path } => {
            server
                .create_folder(user, &pool_path(path))
                .expect("Failed to create folder");
        }
        SyncOp::Create {
            path,
            content,
            device,
        } => {
            let content = ContentKey::of_bytes(CONTENT_POOL[content]);
            server
                .create_file(
                    user,
                    &DeviceId::new(DEVICE_POOL[device]),
                    &pool_path(path),
                    content.hash,
                    content.size,
                )
                .expect("Failed to create file");
        }
        SyncOp::Modify {
            path,
            content,
            device,
        } => {
            let target = pool_path(path);
            let Some(existing) = server.get(user, &target).expect("Failed to get") else {
                return;
            };
            if existing.is_folder {
                return;
            }
            let content = ContentKey::of_bytes(CONTENT_POOL[content]);
            server
                .modify(
                    user,
                    &DeviceId::new(DEVICE_POOL[device]),
                    &target,
                    &existing.revision.unwrap_or_default(),
                    content.hash,
                    content.size,
                )
                .expect("Failed to modify file");
        }
        SyncOp::Rename { from, to } => {
            server
                .rename(user, &pool_path(from), &pool_path(to))
                .expect("Failed to rename");
        }
        SyncOp::Delete { path } => {
            server
                .delete(user, &pool_path(path))
                .expect("Failed to delete");
        }
        SyncOp::Upload { content } => {
            upload_all_pending(server, [CONTENT_POOL[content]]);
        }
        SyncOp::Disconnect { device } => {
            server
                .device_disconnected(user, &DeviceId::new(DEVICE_POOL[device]))
                .expect("Failed to purge device");
        }
        SyncOp::Pull => {
            replica.pull(server, user).expect("Failed to pull changes");
            assert_no_pending_content(server, replica);
        }
    }
}

/// Runs a script for `user`, then uploads every missing content and
/// pulls once more.
///
/// Returns the replica the client ends up with.
pub fn run_script(server: &ServerData, user: &UserId, script: &[SyncOp]) -> Replica {
    let mut replica = Replica::new();
    for op in script {
        apply_op(server, user, op, &mut replica);
    }
    upload_all_pending(server, CONTENT_POOL.iter().copied());
    replica.pull(server, user).expect("Failed to pull changes");
    replica
}

/// One device of one user talking to a server.
pub struct SyncClient<'a> {
    server: &'a ServerData,
    /// The user.
    pub user: UserId,
    /// The device.
    pub device: DeviceId,
    /// What this client learned from the change feed.
    pub replica: Replica,
    owed: HashMap<StorageKey, Vec<u8>>,
}

impl<'a> SyncClient<'a> {
    /// Creates a client with an empty replica.
    pub fn new(server: &'a ServerData, user: &str, device: &str) -> Self {
        Self {
            server,
            user: UserId::new(user),
            device: DeviceId::new(device),
            replica: Replica::new(),
            owed: HashMap::new(),
        }
    }

    fn path(path: &str) -> FilePath {
        FilePath::parse(path).expect("Invalid test path")
    }

    /// Creates a folder.
    pub fn folder(&self, path: &str) -> Outcome<FileMetadata> {
        self.server
            .create_folder(&self.user, &Self::path(path))
            .expect("Failed to create folder")
    }

    /// Announces a file; remembers the bytes if this device must upload.
    pub fn create(&mut self, path: &str, data: &[u8]) -> Outcome<StoredFile> {
        let content = ContentKey::of_bytes(data);
        let outcome = self
            .server
            .create_file(&self.user, &self.device, &Self::path(path), content.hash, content.size)
            .expect("Failed to create file");
        self.remember(&outcome, data);
        outcome
    }

    /// Replaces a file's content, using the server's current revision as
    /// the base.
    pub fn modify(&mut self, path: &str, data: &[u8]) -> Outcome<StoredFile> {
        let target = Self::path(path);
        let base = match self.server.get(&self.user, &target).expect("Failed to get") {
            Some(existing) if !existing.is_folder => existing.revision.unwrap_or_default(),
            Some(_) => return Outcome::Conflict(Conflict::TypeMismatch { path: target }),
            None => return Outcome::Conflict(Conflict::NotFound { path: target }),
        };
        let content = ContentKey::of_bytes(data);
        let outcome = self
            .server
            .modify(&self.user, &self.device, &target, &base, content.hash, content.size)
            .expect("Failed to modify file");
        self.remember(&outcome, data);
        outcome
    }

    fn remember(&mut self, outcome: &Outcome<StoredFile>, data: &[u8]) {
        if let Outcome::Applied(stored) = outcome {
            if stored.new_upload {
                if let Some(key) = stored.storage_key() {
                    self.owed.insert(key.clone(), data.to_vec());
                }
            }
        }
    }

    /// Moves a path.
    pub fn rename(&self, from: &str, to: &str) -> Outcome<FileMetadata> {
        self.server
            .rename(&self.user, &Self::path(from), &Self::path(to))
            .expect("Failed to rename")
    }

    /// Deletes a path.
    pub fn delete(&self, path: &str) -> Outcome<FileMetadata> {
        self.server
            .delete(&self.user, &Self::path(path))
            .expect("Failed to delete")
    }

    /// Uploads everything this device owes.
    ///
    /// Blobs that left the store in the meantime are skipped. Returns how
    /// many blobs were written.
    pub fn upload_owed(&mut self) -> usize {
        let mut written = 0;
        for (key, data) in std::mem::take(&mut self.owed) {
            match self.server.upload_bytes(&key, &data) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(CoreError::Storage(StorageError::UnknownStorageKey { .. })) => {}
                Err(err) => panic!("upload of {key} failed: {err}"),
            }
        }
        written
    }

    /// Number of blobs this device still owes.
    pub fn owed(&self) -> usize {
        self.owed.len()
    }

    /// Drops the device's connection, cancelling its uploads.
    pub fn disconnect(&mut self) -> Vec<StorageKey> {
        self.owed.clear();
        self.server
            .device_disconnected(&self.user, &self.device)
            .expect("Failed to purge device")
    }

    /// Pulls the change feed into the replica.
    pub fn pull(&mut self) -> usize {
        self.replica
            .pull(self.server, &self.user)
            .expect("Failed to pull changes")
    }

    /// Asserts that the replica matches the server's tree.
    pub fn assert_converged(&self) {
        assert_eq!(
            self.replica.shape(),
            server_shape(self.server, &self.user),
            "replica of {} diverged from the server",
            self.user
        );
    }
}
