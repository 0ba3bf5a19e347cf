//! Bulk preload of blob content.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use synchub_types::ContentKey;

/// Content to seed a store with before first use.
///
/// Scenario descriptions list the blobs that already exist on the server;
/// each is written as durable content during
/// [`PhysicalStorage::initialize`](crate::PhysicalStorage::initialize).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialStorageData {
    /// Preloaded blobs. Duplicate contents are stored once.
    #[serde(default)]
    pub blobs: Vec<InitialBlob>,
}

impl InitialStorageData {
    /// Creates an empty preload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text blob.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.blobs.push(InitialBlob::text(text));
        self
    }

    /// Adds a binary blob.
    #[must_use]
    pub fn with_bytes(mut self, data: &[u8]) -> Self {
        self.blobs.push(InitialBlob::bytes(data));
        self
    }
}

/// One preloaded blob, given either as UTF-8 text or as hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialBlob {
    /// Content as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Content as lowercase or uppercase hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

impl InitialBlob {
    /// A text blob.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            hex: None,
        }
    }

    /// A binary blob.
    #[must_use]
    pub fn bytes(data: &[u8]) -> Self {
        Self {
            text: None,
            hex: Some(hex::encode(data)),
        }
    }

    /// Decodes the blob content.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidArgument`] unless exactly one of
    /// `text` and `hex` is set and `hex` decodes.
    pub fn data(&self) -> StorageResult<Vec<u8>> {
        match (&self.text, &self.hex) {
            (Some(text), None) => Ok(text.as_bytes().to_vec()),
            (None, Some(encoded)) => hex::decode(encoded)
                .map_err(|e| StorageError::invalid_argument(format!("bad blob hex: {e}"))),
            _ => Err(StorageError::invalid_argument(
                "initial blob needs exactly one of `text` or `hex`",
            )),
        }
    }

    /// Content key of the blob.
    ///
    /// # Errors
    ///
    /// Same as [`InitialBlob::data`].
    pub fn content_key(&self) -> StorageResult<ContentKey> {
        Ok(ContentKey::of_bytes(&self.data()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_hex_blobs_decode() {
        assert_eq!(InitialBlob::text("hi").data().unwrap(), b"hi");
        assert_eq!(InitialBlob::bytes(&[0, 255]).data().unwrap(), vec![0, 255]);
    }

    #[test]
    fn ambiguous_blob_is_rejected() {
        let blob = InitialBlob {
            text: Some("a".into()),
            hex: Some("61".into()),
        };
        assert!(blob.data().is_err());
        assert!(InitialBlob { text: None, hex: None }.data().is_err());
        assert!(InitialBlob { text: None, hex: Some("zz".into()) }.data().is_err());
    }

    #[test]
    fn parses_scenario_json() {
        let json = r#"{ "blobs": [ { "text": "hello" }, { "hex": "00ff" } ] }"#;
        let data: InitialStorageData = serde_json::from_str(json).unwrap();
        assert_eq!(data.blobs.len(), 2);
        assert_eq!(
            data.blobs[0].content_key().unwrap(),
            ContentKey::of_bytes(b"hello")
        );
    }

    #[test]
    fn builder_helpers() {
        let data = InitialStorageData::new().with_text("a").with_bytes(b"b");
        assert_eq!(data.blobs.len(), 2);
        assert_eq!(data.blobs[1].data().unwrap(), b"b");
    }
}
