//! Content store configuration.

use std::path::{Path, PathBuf};

/// Configuration for a content store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of the file backend.
    pub root_dir: PathBuf,

    /// Directory (under `root_dir`) holding completed blobs.
    pub blob_dir_name: String,

    /// Directory (under `root_dir`) holding in-flight uploads.
    pub temp_dir_name: String,

    /// Whether to fsync each blob before it is moved into place.
    pub sync_on_write: bool,

    /// Whether uploads are checked against the announced MD5 and size.
    pub verify_content_hash: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("synchub-data"),
            blob_dir_name: "blobs".to_string(),
            temp_dir_name: "tmp".to_string(),
            sync_on_write: true,
            verify_content_hash: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration rooted at `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Sets whether blobs are fsynced before they become visible.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets whether uploads are verified against their content key.
    #[must_use]
    pub const fn verify_content_hash(mut self, value: bool) -> Self {
        self.verify_content_hash = value;
        self
    }

    /// Sets the name of the completed blob directory.
    #[must_use]
    pub fn blob_dir_name(mut self, name: impl Into<String>) -> Self {
        self.blob_dir_name = name.into();
        self
    }

    /// Sets the name of the upload staging directory.
    #[must_use]
    pub fn temp_dir_name(mut self, name: impl Into<String>) -> Self {
        self.temp_dir_name = name.into();
        self
    }

    /// Path of the completed blob directory.
    #[must_use]
    pub fn blob_dir(&self) -> PathBuf {
        self.root_dir.join(&self.blob_dir_name)
    }

    /// Path of the upload staging directory.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.root_dir.join(&self.temp_dir_name)
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StorageConfig::default();
        assert!(config.sync_on_write);
        assert!(config.verify_content_hash);
        assert_eq!(config.blob_dir(), PathBuf::from("synchub-data/blobs"));
        assert_eq!(config.temp_dir(), PathBuf::from("synchub-data/tmp"));
    }

    #[test]
    fn builder_pattern() {
        let config = StorageConfig::new("/srv/sync")
            .sync_on_write(false)
            .verify_content_hash(false)
            .temp_dir_name("incoming");

        assert!(!config.sync_on_write);
        assert!(!config.verify_content_hash);
        assert_eq!(config.temp_dir(), PathBuf::from("/srv/sync/incoming"));
        assert_eq!(config.root(), Path::new("/srv/sync"));
    }
}
