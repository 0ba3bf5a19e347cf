//! # synchub storage
//!
//! The content store of the synchub sync backend.
//!
//! Content is addressed by [`ContentKey`](synchub_types::ContentKey) (MD5 +
//! size). Every distinct content is stored exactly once as a blob and
//! indexed by an opaque [`StorageKey`](synchub_types::StorageKey); users
//! reference blobs from paths in their trees.
//!
//! ## Responsibilities
//!
//! - Deduplicate content across users and paths
//! - Track which blobs are still pending (announced but not uploaded)
//! - Enforce optimistic concurrency on modifications via per-path
//!   revision histories
//! - Keep superseded content alive until its replacement is durable
//! - Reference-count readers so blobs are never deleted under them
//!
//! ## Backends
//!
//! Blob bytes live behind the [`BlobBackend`] trait:
//!
//! - [`FileBlobBackend`] - one file per blob, uploads staged in a temp
//!   directory and renamed into place
//! - [`InMemoryBlobBackend`] - for tests
//!
//! ## Example
//!
//! ```rust
//! use synchub_storage::PhysicalStorage;
//! use synchub_types::{ContentKey, DeviceId, FilePath, UserId};
//! use std::io::Read;
//!
//! let storage = PhysicalStorage::in_memory();
//! storage.initialize(None).unwrap();
//!
//! let content = ContentKey::of_bytes(b"hello");
//! let user = UserId::new("alice");
//! let path = FilePath::parse("/a.txt").unwrap();
//! let usage = storage
//!     .add_user_file(&user, &DeviceId::new("laptop"), &path, content.hash, content.size)
//!     .unwrap();
//! assert!(usage.pending && usage.new_upload);
//!
//! storage.write_file(&usage.storage_key, &b"hello"[..]).unwrap();
//! let mut data = String::new();
//! storage.read_file(&usage.storage_key).unwrap().read_to_string(&mut data).unwrap();
//! assert_eq!(data, "hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod file;
mod initial;
mod memory;
mod reader;
mod record;
mod store;

pub use backend::BlobBackend;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use file::FileBlobBackend;
pub use initial::{InitialBlob, InitialStorageData};
pub use memory::InMemoryBlobBackend;
pub use reader::BlobReader;
pub use record::{BlobInfo, Revision};
pub use store::{CompletionCallback, FileUsage, PhysicalStorage, StoreStats, UsageUpdate};
