//! Error types for synchub core.

use synchub_types::{SyncId, UserId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the metadata provider.
///
/// These are contract violations and internal failures. Outcomes that
/// concurrent clients trigger in normal operation (stale revisions,
/// missing paths, duplicate creations) are reported as
/// [`Conflict`](crate::Conflict) values instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Content store error.
    #[error("storage error: {0}")]
    Storage(#[from] synchub_storage::StorageError),

    /// Malformed identifier or path.
    #[error("invalid value: {0}")]
    Types(#[from] synchub_types::TypesError),

    /// The provider was used before `initialize`.
    #[error("metadata provider is not initialized")]
    NotInitialized,

    /// `initialize` was called twice.
    #[error("metadata provider is already initialized")]
    AlreadyInitialized,

    /// A caller broke an operation's contract.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// An event with this sync id is already in the user's log.
    #[error("duplicate {sync_id} in event log of {user}")]
    DuplicateSyncId {
        /// Owner of the log.
        user: UserId,
        /// The repeated id.
        sync_id: SyncId,
    },

    /// Internal bookkeeping is inconsistent.
    ///
    /// Indicates a bug; the operation was aborted.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// What was inconsistent.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns true if the caller should retry later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}
