//! Blob records and per-path usage entries.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use synchub_types::{ContentKey, DeviceId, FileId, FilePath, Md5Hash, StorageKey, UserId};

/// One stored revision of a path: the content it pointed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Content size in bytes.
    pub size: u64,
    /// Content digest.
    pub hash: Md5Hash,
}

impl From<ContentKey> for Revision {
    fn from(content: ContentKey) -> Self {
        Self {
            size: content.size,
            hash: content.hash,
        }
    }
}

/// Most-recent-first list of revisions accepted for a path.
#[derive(Debug, Clone, Default)]
pub(crate) struct RevisionHistory {
    revisions: VecDeque<Revision>,
}

impl RevisionHistory {
    pub(crate) fn head(&self) -> Option<&Revision> {
        self.revisions.front()
    }

    pub(crate) fn push(&mut self, revision: Revision) {
        self.revisions.push_front(revision);
    }

    /// Drops newer revisions until `hash` is the head.
    ///
    /// If `hash` is not in the history it becomes the only entry.
    pub(crate) fn rewind_to(&mut self, revision: Revision) {
        match self.revisions.iter().position(|r| r.hash == revision.hash) {
            Some(pos) => {
                self.revisions.drain(..pos);
            }
            None => {
                self.revisions.clear();
                self.revisions.push_front(revision);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.revisions.len()
    }
}

/// Content references held by one `(user, path)`.
///
/// `current` is what the path shows now. `fallbacks` are superseded blobs
/// kept alive until `current` finishes uploading.
#[derive(Debug, Clone)]
pub(crate) struct PathEntry {
    pub(crate) current: StorageKey,
    pub(crate) fallbacks: Vec<StorageKey>,
    pub(crate) history: RevisionHistory,
}

impl PathEntry {
    pub(crate) fn new(current: StorageKey, revision: Revision) -> Self {
        let mut history = RevisionHistory::default();
        history.push(revision);
        Self {
            current,
            fallbacks: Vec::new(),
            history,
        }
    }

    /// Every key referenced by this entry, current first, without repeats.
    pub(crate) fn keys(&self) -> Vec<StorageKey> {
        let mut keys = vec![self.current.clone()];
        for key in &self.fallbacks {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

/// Index state of one blob.
#[derive(Debug)]
pub(crate) struct BlobRecord {
    pub(crate) content: ContentKey,
    pub(crate) file_id: FileId,
    pub(crate) pending: bool,
    pub(crate) uploading: bool,
    pub(crate) uploader: Option<(UserId, DeviceId)>,
    pub(crate) readers: usize,
    pub(crate) user_usage: HashMap<UserId, HashSet<FilePath>>,
}

impl BlobRecord {
    pub(crate) fn new(content: ContentKey, pending: bool) -> Self {
        Self {
            content,
            file_id: FileId::new(),
            pending,
            uploading: false,
            uploader: None,
            readers: 0,
            user_usage: HashMap::new(),
        }
    }

    /// Whether the blob has bytes in the backend once durable.
    pub(crate) fn has_bytes(&self) -> bool {
        !self.content.is_empty()
    }

    pub(crate) fn add_usage(&mut self, user: &UserId, path: &FilePath) {
        self.user_usage
            .entry(user.clone())
            .or_default()
            .insert(path.clone());
    }

    pub(crate) fn remove_usage(&mut self, user: &UserId, path: &FilePath) {
        if let Some(paths) = self.user_usage.get_mut(user) {
            paths.remove(path);
            if paths.is_empty() {
                self.user_usage.remove(user);
            }
        }
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.user_usage.is_empty()
    }

    pub(crate) fn info(&self, key: &StorageKey) -> BlobInfo {
        BlobInfo {
            storage_key: key.clone(),
            content: self.content,
            file_id: self.file_id,
            pending: self.pending,
            uploading: self.uploading,
            readers: self.readers,
            users: self.user_usage.len(),
            paths: self.user_usage.values().map(HashSet::len).sum(),
        }
    }
}

/// Snapshot of a blob's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Key of the blob.
    pub storage_key: StorageKey,
    /// Content identity.
    pub content: ContentKey,
    /// On-disk name.
    pub file_id: FileId,
    /// Whether the bytes are still missing.
    pub pending: bool,
    /// Whether an upload is being written right now.
    pub uploading: bool,
    /// Open read streams.
    pub readers: usize,
    /// Number of users referencing the blob.
    pub users: usize,
    /// Number of `(user, path)` references.
    pub paths: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(byte: u8) -> Revision {
        Revision {
            size: u64::from(byte),
            hash: Md5Hash::from_bytes([byte; 16]),
        }
    }

    #[test]
    fn history_is_most_recent_first() {
        let mut history = RevisionHistory::default();
        history.push(rev(1));
        history.push(rev(2));
        assert_eq!(history.head(), Some(&rev(2)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn rewind_drops_newer_revisions() {
        let mut history = RevisionHistory::default();
        history.push(rev(1));
        history.push(rev(2));
        history.push(rev(3));

        history.rewind_to(rev(1));
        assert_eq!(history.head(), Some(&rev(1)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rewind_to_unknown_revision_resets() {
        let mut history = RevisionHistory::default();
        history.push(rev(1));
        history.rewind_to(rev(9));
        assert_eq!(history.head(), Some(&rev(9)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn entry_keys_are_deduplicated() {
        let mut entry = PathEntry::new(StorageKey::new("2"), rev(2));
        entry.fallbacks = vec![StorageKey::new("1"), StorageKey::new("2"), StorageKey::new("1")];
        assert_eq!(entry.keys(), vec![StorageKey::new("2"), StorageKey::new("1")]);
    }

    #[test]
    fn usage_bookkeeping() {
        let mut record = BlobRecord::new(ContentKey::new(Md5Hash::from_bytes([1; 16]), 10), true);
        let alice = UserId::new("alice");
        let a = FilePath::parse("/a").unwrap();
        let b = FilePath::parse("/b").unwrap();

        record.add_usage(&alice, &a);
        record.add_usage(&alice, &b);
        assert_eq!(record.info(&StorageKey::new("1")).paths, 2);

        record.remove_usage(&alice, &a);
        assert!(!record.is_unused());
        record.remove_usage(&alice, &b);
        assert!(record.is_unused());
    }
}
