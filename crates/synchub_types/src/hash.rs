//! Content addressing.

use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an MD5 digest in bytes.
pub const MD5_LEN: usize = 16;

/// An MD5 digest.
///
/// The hex form (32 lowercase characters) doubles as the revision string
/// of a file's metadata.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Md5Hash([u8; MD5_LEN]);

impl Md5Hash {
    /// Creates a hash from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; MD5_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates a hash from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidHashLength`] unless the slice is
    /// exactly 16 bytes.
    pub fn from_slice(slice: &[u8]) -> TypesResult<Self> {
        let bytes: [u8; MD5_LEN] = slice
            .try_into()
            .map_err(|_| TypesError::InvalidHashLength {
                actual: slice.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Parses a 32-character hex revision string.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidHashHex`] if the string is not exactly
    /// 32 hex characters.
    pub fn from_hex(value: &str) -> TypesResult<Self> {
        if value.len() != MD5_LEN * 2 {
            return Err(TypesError::InvalidHashHex {
                value: value.to_string(),
            });
        }
        let mut bytes = [0u8; MD5_LEN];
        hex::decode_to_slice(value, &mut bytes).map_err(|_| TypesError::InvalidHashHex {
            value: value.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Computes the digest of a byte slice.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MD5_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<md5::Digest> for Md5Hash {
    fn from(digest: md5::Digest) -> Self {
        Self(digest.0)
    }
}

impl fmt::Display for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Hash({})", self.to_hex())
    }
}

impl TryFrom<String> for Md5Hash {
    type Error = TypesError;

    fn try_from(value: String) -> TypesResult<Self> {
        Self::from_hex(&value)
    }
}

impl From<Md5Hash> for String {
    fn from(hash: Md5Hash) -> Self {
        hash.to_hex()
    }
}

/// Identity of a piece of content: its digest and its length.
///
/// Two files with equal content keys share exactly one stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey {
    /// MD5 digest of the content.
    pub hash: Md5Hash,
    /// Length of the content in bytes.
    pub size: u64,
}

impl ContentKey {
    /// Creates a content key.
    #[must_use]
    pub const fn new(hash: Md5Hash, size: u64) -> Self {
        Self { hash, size }
    }

    /// Computes the content key of a byte slice.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            hash: Md5Hash::of_bytes(data),
            size: data.len() as u64,
        }
    }

    /// Returns true for the empty content.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_digest() {
        let hash = Md5Hash::of_bytes(b"");
        assert_eq!(hash.to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(Md5Hash::from_slice(&[0u8; 16]).is_ok());
        assert_eq!(
            Md5Hash::from_slice(&[0u8; 15]),
            Err(TypesError::InvalidHashLength { actual: 15 })
        );
    }

    #[test]
    fn from_hex_checks_format() {
        assert!(Md5Hash::from_hex("d41d8cd98f00b204e9800998ecf8427e").is_ok());
        assert!(Md5Hash::from_hex("D41D8CD98F00B204E9800998ECF8427E").is_ok());
        assert!(Md5Hash::from_hex("d41d8cd98f00b204e9800998ecf8427").is_err());
        assert!(Md5Hash::from_hex("zz1d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Md5Hash::from_hex("").is_err());
    }

    #[test]
    fn content_key_of_bytes() {
        let key = ContentKey::of_bytes(b"abc");
        assert_eq!(key.size, 3);
        assert!(!key.is_empty());
        assert!(ContentKey::of_bytes(b"").is_empty());
    }

    proptest! {
        #[test]
        fn hex_form_parses_back(bytes in prop::array::uniform16(any::<u8>())) {
            let hash = Md5Hash::from_bytes(bytes);
            prop_assert_eq!(Md5Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        }
    }
}
