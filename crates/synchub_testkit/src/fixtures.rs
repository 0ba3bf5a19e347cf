//! Test fixtures and server helpers.
//!
//! Provides convenience functions for setting up initialized servers
//! and common test scenarios.

use std::path::PathBuf;
use std::sync::Once;
use synchub_core::{InitialMetadata, ProviderConfig, ServerData};
use synchub_storage::{InitialStorageData, StorageConfig};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// An initialized server with automatic cleanup.
pub struct TestServer {
    /// The server instance.
    pub server: ServerData,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestServer {
    /// Creates an initialized in-memory server.
    pub fn memory() -> Self {
        Self::with_config(ProviderConfig::default())
    }

    /// Creates an initialized in-memory server with a provider config.
    pub fn with_config(config: ProviderConfig) -> Self {
        init_tracing();
        let server = ServerData::new(
            std::sync::Arc::new(synchub_storage::PhysicalStorage::in_memory()),
            config,
        );
        server
            .initialize(None, None)
            .expect("Failed to initialize server");
        Self {
            server,
            _temp_dir: None,
        }
    }

    /// Creates an in-memory server seeded with preloads.
    pub fn preloaded(storage: &InitialStorageData, metadata: &InitialMetadata) -> Self {
        init_tracing();
        let server = ServerData::in_memory();
        server
            .initialize(Some(storage), Some(metadata))
            .expect("Failed to initialize preloaded server");
        Self {
            server,
            _temp_dir: None,
        }
    }

    /// Creates an initialized server whose blobs live in a temp directory.
    pub fn file() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = StorageConfig::new(temp_dir.path());
        let server = ServerData::open(&config, ProviderConfig::default())
            .expect("Failed to open file server");
        server
            .initialize(None, None)
            .expect("Failed to initialize server");
        Self {
            server,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the storage root if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }
}

impl std::ops::Deref for TestServer {
    type Target = ServerData;

    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

/// Runs a test with an initialized in-memory server.
///
/// # Example
///
/// ```rust
/// use synchub_testkit::with_temp_server;
/// use synchub_types::{FilePath, UserId};
///
/// with_temp_server(|server| {
///     let alice = UserId::new("alice");
///     let docs = FilePath::parse("/docs").unwrap();
///     assert!(!server.create_folder(&alice, &docs).unwrap().is_conflict());
/// });
/// ```
pub fn with_temp_server<F, R>(f: F) -> R
where
    F: FnOnce(&ServerData) -> R,
{
    let test_server = TestServer::memory();
    f(&test_server.server)
}

/// Runs a test with a server whose blobs live in a temp directory.
pub fn with_file_server<F, R>(f: F) -> R
where
    F: FnOnce(&ServerData, &std::path::Path) -> R,
{
    let test_server = TestServer::file();
    let path = test_server
        .path()
        .expect("File server should have a path");
    f(&test_server.server, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use synchub_core::InitialEntry;
    use synchub_types::FilePath;

    fn path(s: &str) -> FilePath {
        FilePath::parse(s).expect("Invalid scenario path")
    }

    /// Two users sharing one document.
    ///
    /// Both `alice` and `bob` own `/docs/readme.txt` with the same text,
    /// which is stored once. `bob` also owns `/docs/draft.txt`, whose
    /// bytes have not arrived yet.
    pub fn shared_documents() -> TestServer {
        let storage = InitialStorageData::new().with_text("shared readme");
        let metadata = InitialMetadata::new()
            .with_entry("alice", InitialEntry::folder(path("/docs")))
            .with_entry(
                "alice",
                InitialEntry::text_file(path("/docs/readme.txt"), "shared readme"),
            )
            .with_entry("bob", InitialEntry::folder(path("/docs")))
            .with_entry(
                "bob",
                InitialEntry::text_file(path("/docs/readme.txt"), "shared readme"),
            )
            .with_entry(
                "bob",
                InitialEntry::text_file(path("/docs/draft.txt"), "unfinished"),
            );
        TestServer::preloaded(&storage, &metadata)
    }

    /// A server where `alice` owns `folders` folders of `files` files each,
    /// all with distinct durable content.
    pub fn populated_server(folders: usize, files: usize) -> TestServer {
        let mut storage = InitialStorageData::new();
        let mut metadata = InitialMetadata::new();
        for f in 0..folders {
            let folder = format!("/folder_{f}");
            metadata = metadata.with_entry("alice", InitialEntry::folder(path(&folder)));
            for i in 0..files {
                let text = format!("content {f}.{i}");
                storage = storage.with_text(text.clone());
                metadata = metadata.with_entry(
                    "alice",
                    InitialEntry::text_file(path(&format!("{folder}/file_{i}.txt")), text),
                );
            }
        }
        TestServer::preloaded(&storage, &metadata)
    }
}
