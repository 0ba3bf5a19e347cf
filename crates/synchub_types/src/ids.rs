//! Opaque identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifies the owner of a metadata tree and event log.
    UserId
);

string_id!(
    /// Identifies one client device of a user.
    ///
    /// Uploads are claimed per device so a disconnected device's in-flight
    /// uploads can be cancelled.
    DeviceId
);

string_id!(
    /// Identifies a deduplicated content blob.
    ///
    /// Storage keys are allocated from a counter, except for the 0-byte
    /// file which always uses [`StorageKey::EMPTY`].
    StorageKey
);

impl StorageKey {
    /// The sentinel key of the empty file.
    pub const EMPTY: &'static str = "empty";

    /// The sentinel key of the empty file.
    #[must_use]
    pub fn empty() -> Self {
        Self(Self::EMPTY.to_string())
    }

    /// Returns true for the empty-file sentinel.
    #[must_use]
    pub fn is_empty_sentinel(&self) -> bool {
        self.0 == Self::EMPTY
    }
}

/// Position in a user's event log.
///
/// Sync ids are allocated from a per-provider counter and are strictly
/// increasing. `SyncId::ZERO` is the cursor meaning "from the beginning".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(pub i64);

impl SyncId {
    /// The initial cursor.
    pub const ZERO: SyncId = SyncId(0);

    /// Creates a sync id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync:{}", self.0)
    }
}

/// On-disk name of a blob.
///
/// Distinct from the [`StorageKey`] so blob files never reveal or depend on
/// key allocation order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Creates a new random file id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the file name used on disk.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0.simple())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
