//! # synchub types
//!
//! Identifiers and value types shared by the synchub content store and
//! metadata provider.
//!
//! This crate provides:
//! - [`FilePath`] - hierarchical path used as a metadata tree key
//! - [`UserId`], [`DeviceId`] - opaque client identifiers
//! - [`SyncId`] - per-user event log cursor
//! - [`StorageKey`], [`FileId`] - blob identifiers
//! - [`Md5Hash`], [`ContentKey`] - content addressing
//!
//! ## Example
//!
//! ```rust
//! use synchub_types::{ContentKey, FilePath, Md5Hash};
//!
//! let path = FilePath::parse("/docs/a.txt").unwrap();
//! assert_eq!(path.name(), Some("a.txt"));
//!
//! let key = ContentKey::of_bytes(b"hello");
//! assert_eq!(key.size, 5);
//! assert_eq!(key.hash, Md5Hash::of_bytes(b"hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hash;
mod ids;
mod path;

pub use error::{TypesError, TypesResult};
pub use hash::{ContentKey, Md5Hash, MD5_LEN};
pub use ids::{DeviceId, FileId, StorageKey, SyncId, UserId};
pub use path::FilePath;
