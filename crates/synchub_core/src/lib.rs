//! # synchub core
//!
//! Metadata trees, change logs and pending-upload resolution for the
//! synchub sync backend.
//!
//! ## Overview
//!
//! Every user owns a [`PathTree`] of [`FileMetadata`] (the current state)
//! and an [`EventLog`] of [`UserEvent`]s (the history consumers replicate
//! from). File content lives in a deduplicating
//! [`PhysicalStorage`](synchub_storage::PhysicalStorage).
//!
//! A file may be announced before its bytes arrive. Until the upload
//! completes, the events that reference it are hidden from
//! [`MetadataProvider::changes_since_sync_id`]. When the upload completes
//! or the uploading device goes away, the hidden events are settled
//! against whatever happened to the path in the meantime.
//!
//! ## Conflicts vs. errors
//!
//! Expected outcomes of concurrent editing (stale revisions, missing
//! paths, occupied targets) are [`Outcome::Conflict`] values. Errors
//! ([`CoreError`]) mean a broken precondition, a store failure or an
//! internal invariant violation.
//!
//! ## Example
//!
//! ```rust
//! use synchub_core::{ChangeKind, ServerData};
//! use synchub_types::{ContentKey, DeviceId, FilePath, SyncId, UserId};
//!
//! let server = ServerData::in_memory();
//! server.initialize(None, None).unwrap();
//! let alice = UserId::new("alice");
//!
//! server.create_folder(&alice, &FilePath::parse("/docs").unwrap()).unwrap();
//! let content = ContentKey::of_bytes(b"hello");
//! let stored = server
//!     .create_file(
//!         &alice,
//!         &DeviceId::new("laptop"),
//!         &FilePath::parse("/docs/a.txt").unwrap(),
//!         content.hash,
//!         content.size,
//!     )
//!     .unwrap()
//!     .applied()
//!     .unwrap();
//! assert!(stored.pending);
//!
//! // Only the folder is visible until the bytes arrive
//! assert_eq!(server.changes_since(&alice, SyncId::ZERO).unwrap().len(), 1);
//!
//! server.upload_bytes(stored.storage_key().unwrap(), b"hello").unwrap();
//! let batch = server.changes_since(&alice, SyncId::ZERO).unwrap();
//! assert_eq!(batch.changes[1].kind, ChangeKind::Created);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod event;
mod event_log;
mod initial;
mod metadata;
mod outcome;
mod pending;
mod provider;
mod server_data;
mod tree;

pub use config::ProviderConfig;
pub use error::{CoreError, CoreResult};
pub use event::{ChangeBatch, ChangeKind, FileChange, UserEvent};
pub use event_log::{EventLog, Insertion};
pub use initial::{InitialEntry, InitialMetadata, InitialUser};
pub use metadata::{is_well_formed_revision, FileMetadata};
pub use outcome::{Conflict, Outcome, StoredFile};
pub use pending::{PendingIndex, QueryRegistry, QueryToken};
pub use provider::{MetadataProvider, ProviderStats, UnserializedWriteHook, PRELOAD_DEVICE};
pub use server_data::{ServerData, ServerStats};
pub use tree::{PathTree, TreeEvent};
