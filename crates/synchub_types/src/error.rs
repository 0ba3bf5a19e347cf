//! Error types for value parsing.

use thiserror::Error;

/// Result type for parsing operations.
pub type TypesResult<T> = Result<T, TypesError>;

/// Errors raised when building a value from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// The path contains a forbidden segment.
    #[error("invalid path {path:?}: segments must not be '.', '..' or contain NUL")]
    InvalidPath {
        /// The rejected input.
        path: String,
    },

    /// The hash is not exactly 16 bytes.
    #[error("invalid MD5 hash: expected 16 bytes, got {actual}")]
    InvalidHashLength {
        /// Number of bytes supplied.
        actual: usize,
    },

    /// The hash is not valid hexadecimal.
    #[error("invalid MD5 revision string {value:?}")]
    InvalidHashHex {
        /// The rejected input.
        value: String,
    },
}
