//! CLI command implementations.

pub mod replay;
pub mod stats;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use synchub_core::{CoreError, InitialMetadata, ProviderConfig, ServerData};
use synchub_storage::{InitialStorageData, StorageConfig};
use thiserror::Error;
use tracing::info;

/// Errors raised while preparing a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The scenario file could not be read.
    #[error("cannot read scenario {path:?}: {source}")]
    Read {
        /// Scenario path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The scenario file is not valid JSON for a scenario.
    #[error("invalid scenario {path:?}: {source}")]
    Parse {
        /// Scenario path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The server rejected the scenario.
    #[error("failed to load scenario: {0}")]
    Load(#[from] CoreError),
}

/// Initial server state read from a scenario file.
#[derive(Debug, Default, Deserialize)]
pub struct Scenario {
    /// Blobs that exist before any client connects.
    #[serde(default)]
    pub storage: Option<InitialStorageData>,
    /// Per-user trees.
    #[serde(default)]
    pub metadata: Option<InitialMetadata>,
}

impl Scenario {
    /// Reads a scenario from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, CliError> {
        serde_json::from_str(text).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds a server and seeds it with this scenario.
    ///
    /// Blobs live under `root` when given, in memory otherwise.
    pub fn into_server(self, root: Option<&Path>) -> Result<ServerData, CliError> {
        let server = match root {
            Some(root) => ServerData::open(&StorageConfig::new(root), ProviderConfig::default())?,
            None => ServerData::in_memory(),
        };
        server.initialize(self.storage.as_ref(), self.metadata.as_ref())?;
        info!(
            entries = self.metadata.as_ref().map_or(0, InitialMetadata::entry_count),
            "scenario loaded"
        );
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "storage": { "blobs": [ { "text": "hello" } ] },
        "metadata": {
            "users": [
                {
                    "user": "alice",
                    "entries": [
                        { "path": "/docs", "folder": true },
                        { "path": "/docs/a.txt", "text": "hello" },
                        { "path": "/docs/b.txt", "text": "not uploaded" }
                    ]
                }
            ]
        }
    }"#;

    #[test]
    fn test_scenario_loads_into_server() {
        let scenario = Scenario::parse(Path::new("inline.json"), SCENARIO).unwrap();
        let server = scenario.into_server(None).unwrap();
        let stats = server.stats().unwrap();
        assert_eq!(stats.provider.users, 1);
        assert_eq!(stats.provider.entries, 3);
        assert_eq!(stats.store.pending, 1);
    }

    #[test]
    fn test_empty_scenario_is_valid() {
        let scenario = Scenario::parse(Path::new("empty.json"), "{}").unwrap();
        assert!(scenario.storage.is_none());
        assert!(scenario.into_server(None).is_ok());
    }

    #[test]
    fn test_file_backed_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scenario.json");
        std::fs::write(&file, SCENARIO).unwrap();

        let store = dir.path().join("store");
        let server = Scenario::load(&file)
            .unwrap()
            .into_server(Some(store.as_path()))
            .unwrap();
        assert_eq!(server.storage().backend().blob_count().unwrap(), 1);
    }

    #[test]
    fn test_bad_scenario_reports_path() {
        let err = Scenario::parse(Path::new("bad.json"), "[1, 2").unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
