//! Error types for content store operations.

use std::io;
use synchub_types::StorageKey;
use thiserror::Error;

/// Result type for content store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the content store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store was used before `initialize`.
    #[error("storage is not initialized")]
    NotInitialized,

    /// `initialize` was called twice.
    #[error("storage is already initialized")]
    AlreadyInitialized,

    /// The blob has not been uploaded yet.
    ///
    /// Callers should answer "retry later", not report data loss.
    #[error("blob {key} is still pending upload")]
    Pending {
        /// The pending blob.
        key: StorageKey,
    },

    /// Another upload of the same blob is in progress.
    #[error("blob {key} is already being uploaded")]
    UploadInProgress {
        /// The blob being uploaded.
        key: StorageKey,
    },

    /// No blob is registered under this key.
    #[error("unknown storage key {key}")]
    UnknownStorageKey {
        /// The requested key.
        key: StorageKey,
    },

    /// Uploaded bytes do not match the announced content key.
    #[error("uploaded content for {key} does not match: {message}")]
    ContentMismatch {
        /// The blob being uploaded.
        key: StorageKey,
        /// What did not match.
        message: String,
    },

    /// Another process holds the storage directory.
    #[error("storage directory locked: another process has exclusive access")]
    Locked,

    /// A caller broke an operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StorageError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns true if the caller should retry later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::UploadInProgress { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let key = StorageKey::new("7");
        assert!(StorageError::Pending { key: key.clone() }.is_retryable());
        assert!(StorageError::UploadInProgress { key: key.clone() }.is_retryable());
        assert!(!StorageError::UnknownStorageKey { key }.is_retryable());
        assert!(!StorageError::NotInitialized.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StorageError::Pending {
            key: StorageKey::new("12"),
        };
        assert!(err.to_string().contains("12"));
    }
}
