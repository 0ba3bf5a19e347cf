//! Property-based test generators using proptest.
//!
//! Paths and contents come from small pools so that random scripts
//! collide often: the interesting behavior is what happens when a path
//! is reused or a content is shared while its upload is still pending.

use proptest::prelude::*;
use synchub_types::FilePath;

/// Paths scripts operate on. Nested entries need their parent folder.
pub const PATH_POOL: &[&str] = &["/a", "/b", "/d", "/d/a", "/d/b", "/e", "/e/a"];

/// Contents scripts write.
pub const CONTENT_POOL: &[&[u8]] = &[b"alpha", b"beta", b"gamma", b"delta"];

/// Devices scripts act from.
pub const DEVICE_POOL: &[&str] = &["laptop", "phone"];

/// Strategy for generating a single path segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.]{0,7}").expect("Invalid regex")
}

/// Strategy for generating valid non-root paths up to `max_depth` deep.
pub fn file_path_strategy(max_depth: usize) -> impl Strategy<Value = FilePath> {
    prop::collection::vec(segment_strategy(), 1..=max_depth.max(1)).prop_map(|segments| {
        FilePath::parse(&format!("/{}", segments.join("/"))).expect("Generated path is valid")
    })
}

/// Strategy for generating non-empty file content.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..512)
}

/// One step of a single-user sync script.
///
/// Indices point into [`PATH_POOL`], [`CONTENT_POOL`] and [`DEVICE_POOL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    /// Create a folder.
    Folder {
        /// Path index.
        path: usize,
    },
    /// Announce a file.
    Create {
        /// Path index.
        path: usize,
        /// Content index.
        content: usize,
        /// Device index.
        device: usize,
    },
    /// Replace a file's content at its current revision.
    Modify {
        /// Path index.
        path: usize,
        /// Content index.
        content: usize,
        /// Device index.
        device: usize,
    },
    /// Move a path.
    Rename {
        /// Source path index.
        from: usize,
        /// Target path index.
        to: usize,
    },
    /// Delete a path.
    Delete {
        /// Path index.
        path: usize,
    },
    /// Deliver the bytes of a content if they are still missing.
    Upload {
        /// Content index.
        content: usize,
    },
    /// Drop a device's connection.
    Disconnect {
        /// Device index.
        device: usize,
    },
    /// Let the client pull the change feed.
    Pull,
}

impl SyncOp {
    /// The path this step names, if any.
    pub fn path(&self) -> Option<&'static str> {
        match self {
            Self::Folder { path }
            | Self::Create { path, .. }
            | Self::Modify { path, .. }
            | Self::Delete { path }
            | Self::Rename { from: path, .. } => Some(PATH_POOL[*path]),
            Self::Upload { .. } | Self::Disconnect { .. } | Self::Pull => None,
        }
    }
}

/// Strategy for generating one script step.
pub fn sync_op_strategy() -> impl Strategy<Value = SyncOp> {
    let path = 0..PATH_POOL.len();
    let content = 0..CONTENT_POOL.len();
    let device = 0..DEVICE_POOL.len();
    prop_oneof![
        2 => path.clone().prop_map(|path| SyncOp::Folder { path }),
        4 => (path.clone(), content.clone(), device.clone())
            .prop_map(|(path, content, device)| SyncOp::Create { path, content, device }),
        3 => (path.clone(), content.clone(), device.clone())
            .prop_map(|(path, content, device)| SyncOp::Modify { path, content, device }),
        2 => (path.clone(), path.clone()).prop_map(|(from, to)| SyncOp::Rename { from, to }),
        1 => path.prop_map(|path| SyncOp::Delete { path }),
        3 => content.prop_map(|content| SyncOp::Upload { content }),
        1 => device.prop_map(|device| SyncOp::Disconnect { device }),
        2 => Just(SyncOp::Pull),
    ]
}

/// Strategy for generating a script of `len` steps.
pub fn sync_script_strategy(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<SyncOp>> {
    prop::collection::vec(sync_op_strategy(), len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_generated_paths_are_valid(path in file_path_strategy(4)) {
            prop_assert!(!path.is_root());
            prop_assert!(path.depth() <= 4);
        }

        #[test]
        fn test_script_indices_in_range(script in sync_script_strategy(1..50)) {
            for op in &script {
                if let Some(path) = op.path() {
                    prop_assert!(PATH_POOL.contains(&path));
                }
            }
        }
    }

    #[test]
    fn test_pools_parse() {
        for path in PATH_POOL {
            assert!(FilePath::parse(path).is_ok());
        }
    }
}
