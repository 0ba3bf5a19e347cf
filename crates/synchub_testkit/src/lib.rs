//! # synchub testkit
//!
//! Test utilities for synchub.
//!
//! This crate provides:
//! - Server fixtures backed by memory or a temporary directory
//! - Property-based generators for paths, contents and operation scripts
//! - A replica that replays the change feed the way a client would
//! - A multi-threaded stress driver
//!
//! ## Usage
//!
//! ```rust
//! use synchub_testkit::prelude::*;
//!
//! with_temp_server(|server| {
//!     let mut client = SyncClient::new(server, "alice", "laptop");
//!     client.create("/a.txt", b"hello");
//!     client.upload_owed();
//!     client.pull();
//!     client.assert_converged();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
