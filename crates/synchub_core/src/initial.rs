//! Bulk preload of metadata trees.

use crate::error::{CoreError, CoreResult};
use crate::metadata::FileMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synchub_types::{ContentKey, FilePath, Md5Hash, UserId};

/// Trees to seed a provider with before first use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialMetadata {
    /// Per-user entries.
    #[serde(default)]
    pub users: Vec<InitialUser>,
}

impl InitialMetadata {
    /// Creates an empty preload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry for `user`.
    #[must_use]
    pub fn with_entry(mut self, user: impl Into<UserId>, entry: InitialEntry) -> Self {
        let user = user.into();
        match self.users.iter_mut().find(|u| u.user == user) {
            Some(existing) => existing.entries.push(entry),
            None => self.users.push(InitialUser {
                user,
                entries: vec![entry],
            }),
        }
        self
    }

    /// Number of entries across all users.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.users.iter().map(|u| u.entries.len()).sum()
    }
}

/// One user's preloaded entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialUser {
    /// Owner of the entries.
    pub user: UserId,
    /// Files and folders; parents must be listed as folders.
    #[serde(default)]
    pub entries: Vec<InitialEntry>,
}

/// One preloaded file or folder.
///
/// File content is given either as `text` or as `revision` plus `size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialEntry {
    /// Where the entry lives.
    pub path: FilePath,
    /// Whether the entry is a folder.
    #[serde(default)]
    pub folder: bool,
    /// File content as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// File content digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Md5Hash>,
    /// File content length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Creation and modification time; defaults to load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl InitialEntry {
    /// A folder entry.
    #[must_use]
    pub fn folder(path: FilePath) -> Self {
        Self {
            path,
            folder: true,
            text: None,
            revision: None,
            size: None,
            modified: None,
        }
    }

    /// A file entry with text content.
    #[must_use]
    pub fn text_file(path: FilePath, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            folder: false,
            ..Self::folder(path)
        }
    }

    /// A file entry known by digest and size only.
    #[must_use]
    pub fn file(path: FilePath, hash: Md5Hash, size: u64) -> Self {
        Self {
            revision: Some(hash),
            size: Some(size),
            folder: false,
            ..Self::folder(path)
        }
    }

    /// Content identity of a file entry, `None` for folders.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if the content fields do
    /// not fit the entry kind.
    pub fn content_key(&self) -> CoreResult<Option<ContentKey>> {
        match (self.folder, &self.text, self.revision, self.size) {
            (true, None, None, None) => Ok(None),
            (true, ..) => Err(CoreError::invalid_argument(format!(
                "preloaded folder {} carries content",
                self.path
            ))),
            (false, Some(text), None, None) => Ok(Some(ContentKey::of_bytes(text.as_bytes()))),
            (false, None, Some(hash), Some(size)) => Ok(Some(ContentKey::new(hash, size))),
            (false, ..) => Err(CoreError::invalid_argument(format!(
                "preloaded file {} needs either text or revision and size",
                self.path
            ))),
        }
    }

    /// Metadata for the entry, without a storage key.
    ///
    /// # Errors
    ///
    /// Same as [`InitialEntry::content_key`].
    pub fn metadata(&self, now: DateTime<Utc>) -> CoreResult<FileMetadata> {
        let time = self.modified.unwrap_or(now);
        Ok(match self.content_key()? {
            None => FileMetadata::folder(time),
            Some(content) => FileMetadata::file(content.hash, content.size, time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> FilePath {
        FilePath::parse(s).unwrap()
    }

    #[test]
    fn builder_groups_by_user() {
        let initial = InitialMetadata::new()
            .with_entry("alice", InitialEntry::folder(p("/docs")))
            .with_entry("bob", InitialEntry::folder(p("/music")))
            .with_entry("alice", InitialEntry::text_file(p("/docs/a.txt"), "hi"));
        assert_eq!(initial.users.len(), 2);
        assert_eq!(initial.users[0].entries.len(), 2);
        assert_eq!(initial.entry_count(), 3);
    }

    #[test]
    fn content_keys() {
        assert_eq!(InitialEntry::folder(p("/d")).content_key().unwrap(), None);
        assert_eq!(
            InitialEntry::text_file(p("/a"), "hi").content_key().unwrap(),
            Some(ContentKey::of_bytes(b"hi"))
        );
        let hash = Md5Hash::of_bytes(b"zz");
        assert_eq!(
            InitialEntry::file(p("/b"), hash, 2).content_key().unwrap(),
            Some(ContentKey::new(hash, 2))
        );
    }

    #[test]
    fn inconsistent_entries_are_rejected() {
        let mut folder = InitialEntry::folder(p("/d"));
        folder.size = Some(1);
        assert!(folder.content_key().is_err());

        let mut file = InitialEntry::text_file(p("/a"), "x");
        file.size = Some(1);
        assert!(file.content_key().is_err());

        let mut bare = InitialEntry::folder(p("/f"));
        bare.folder = false;
        assert!(bare.metadata(Utc::now()).is_err());
    }

    #[test]
    fn parses_scenario_json() {
        let json = r#"{
            "users": [{
                "user": "alice",
                "entries": [
                    { "path": "/docs", "folder": true },
                    { "path": "/docs/a.txt", "text": "hello" }
                ]
            }]
        }"#;
        let initial: InitialMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(initial.users[0].user, UserId::new("alice"));
        let metadata = initial.users[0].entries[1].metadata(Utc::now()).unwrap();
        assert_eq!(metadata.size, Some(5));
        assert!(!metadata.is_folder);
    }
}
