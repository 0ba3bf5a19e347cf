use super::*;
use crate::event::ChangeKind;
use std::sync::atomic::AtomicUsize;
use std::thread;
use std::time::Duration;
use synchub_storage::InitialStorageData;

fn p(s: &str) -> FilePath {
    FilePath::parse(s).unwrap()
}

fn meta(data: &[u8]) -> FileMetadata {
    FileMetadata::file(Md5Hash::of_bytes(data), data.len() as u64, Utc::now())
}

fn rev(data: &[u8]) -> String {
    Md5Hash::of_bytes(data).to_hex()
}

struct Harness {
    storage: Arc<PhysicalStorage>,
    provider: MetadataProvider,
    user: UserId,
    device: DeviceId,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ProviderConfig::default())
    }

    fn with_config(config: ProviderConfig) -> Self {
        let storage = Arc::new(PhysicalStorage::in_memory());
        storage.initialize(None).unwrap();
        let provider = MetadataProvider::new(config);
        provider.initialize(Arc::clone(&storage), None).unwrap();
        Self {
            storage,
            provider,
            user: UserId::new("alice"),
            device: DeviceId::new("laptop"),
        }
    }

    fn id(&self) -> SyncId {
        self.provider.new_sync_id_before_start().unwrap()
    }

    fn folder(&self, path: &str) {
        self.provider
            .add_folder_metadata(self.id(), &self.user, &p(path), FileMetadata::folder(Utc::now()))
            .unwrap()
            .applied()
            .unwrap();
    }

    fn file(&self, path: &str, data: &[u8]) -> StoredFile {
        self.file_from(&self.device, path, data)
    }

    fn file_from(&self, device: &DeviceId, path: &str, data: &[u8]) -> StoredFile {
        self.provider
            .add_file_metadata(self.id(), &self.user, device, &p(path), meta(data))
            .unwrap()
            .applied()
            .unwrap()
    }

    fn modify(&self, device: &DeviceId, path: &str, old: &[u8], new: &[u8]) -> Outcome<StoredFile> {
        self.provider
            .update_metadata(self.id(), &self.user, device, &p(path), meta(new), Some(&rev(old)))
            .unwrap()
    }

    fn rename(&self, from: &str, to: &str) -> Outcome<FileMetadata> {
        self.provider
            .recursively_rename_metadata(self.id(), &self.user, &p(from), &p(to))
            .unwrap()
    }

    fn delete(&self, path: &str) -> Outcome<FileMetadata> {
        self.provider
            .recursively_remove_metadata(self.id(), &self.user, &p(path))
            .unwrap()
    }

    fn upload(&self, stored: &StoredFile, data: &[u8]) {
        assert!(self.storage.write_file(stored.storage_key().unwrap(), data).unwrap());
    }

    fn feed(&self) -> Vec<String> {
        feed_of(&self.provider, &self.user)
    }
}

fn feed_of(provider: &MetadataProvider, user: &UserId) -> Vec<String> {
    provider
        .changes_since_sync_id(SyncId::ZERO, user)
        .unwrap()
        .changes
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[test]
fn use_before_initialize_fails() {
    let provider = MetadataProvider::default();
    assert!(!provider.is_initialized());
    assert!(matches!(
        provider.new_sync_id_before_start(),
        Err(CoreError::NotInitialized)
    ));
    assert!(matches!(
        provider.changes_since_sync_id(SyncId::ZERO, &UserId::new("alice")),
        Err(CoreError::NotInitialized)
    ));
}

#[test]
fn initialize_twice_fails() {
    let h = Harness::new();
    assert!(h.provider.is_initialized());
    assert!(matches!(
        h.provider.initialize(Arc::clone(&h.storage), None),
        Err(CoreError::AlreadyInitialized)
    ));
}

#[test]
fn initialize_requires_initialized_storage() {
    let provider = MetadataProvider::default();
    let storage = Arc::new(PhysicalStorage::in_memory());
    assert!(matches!(
        provider.initialize(storage, None),
        Err(CoreError::Storage(synchub_storage::StorageError::NotInitialized))
    ));
}

#[test]
fn pending_file_appears_after_upload() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");
    assert!(stored.pending);
    assert!(stored.new_upload);

    assert_eq!(h.feed(), vec!["created /docs"]);

    h.upload(&stored, b"hello");
    assert_eq!(h.feed(), vec!["created /docs", "created /docs/a.txt"]);

    let batch = h
        .provider
        .changes_since_sync_id(SyncId::new(2), &h.user)
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.cursor, SyncId::new(3));
    assert!(!h.provider.is_blocked(&h.user, stored.storage_key().unwrap()).unwrap());
}

#[test]
fn settling_twice_changes_nothing() {
    let h = Harness::new();
    let stored = h.file("/a.txt", b"hello");
    h.upload(&stored, b"hello");
    let before = h.provider.events(&h.user).unwrap();

    let state = h.provider.state().unwrap();
    state.upload_completed(stored.storage_key().unwrap());
    state.upload_completed(stored.storage_key().unwrap());

    assert_eq!(h.provider.events(&h.user).unwrap(), before);
}

#[test]
fn rename_while_pending_publishes_final_path() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");
    assert!(h.rename("/docs/a.txt", "/docs/b.txt").applied().is_some());

    // The rename carries pending content and stays hidden
    assert_eq!(h.feed(), vec!["created /docs"]);

    h.upload(&stored, b"hello");
    assert_eq!(h.feed(), vec!["created /docs", "created /docs/b.txt"]);
}

#[test]
fn folder_rename_while_pending_is_followed() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");
    h.rename("/docs", "/archive").applied().unwrap();

    assert_eq!(h.feed(), vec!["created /docs", "renamed /docs -> /archive"]);

    h.upload(&stored, b"hello");
    assert_eq!(
        h.feed(),
        vec!["created /docs", "renamed /docs -> /archive", "created /archive/a.txt"]
    );
}

#[test]
fn pending_modification_publishes_modified_with_previous() {
    let h = Harness::new();
    let first = h.file("/a.txt", b"one");
    h.upload(&first, b"one");

    let second = h.modify(&h.device, "/a.txt", b"one", b"two").applied().unwrap();
    assert!(second.pending);
    assert_eq!(h.feed(), vec!["created /a.txt"]);

    h.upload(&second, b"two");
    assert_eq!(h.feed(), vec!["created /a.txt", "modified /a.txt"]);

    let events = h.provider.events(&h.user).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.kind(), ChangeKind::Modified);
    assert_eq!(
        last.previous.as_ref().and_then(|md| md.storage_key.as_ref()),
        first.storage_key()
    );
    assert!(last.change.metadata.references(second.storage_key().unwrap()));
}

#[test]
fn pending_modification_survives_rename_of_known_file() {
    let h = Harness::new();
    let first = h.file("/a.txt", b"one");
    h.upload(&first, b"one");
    let second = h.modify(&h.device, "/a.txt", b"one", b"two").applied().unwrap();
    h.rename("/a.txt", "/b.txt").applied().unwrap();
    h.folder("/a.txt");

    h.upload(&second, b"two");
    assert_eq!(
        h.feed(),
        vec![
            "created /a.txt",
            "renamed /a.txt -> /b.txt",
            "created /a.txt",
            "modified /b.txt"
        ]
    );
}

#[test]
fn superseded_pending_content_does_not_linger() {
    let h = Harness::new();
    let first = h.file("/a.txt", b"one");
    h.upload(&first, b"one");
    h.modify(&h.device, "/a.txt", b"one", b"two").applied().unwrap();
    let third = h.modify(&h.device, "/a.txt", b"two", b"three").applied().unwrap();

    // Completing the newest content retires the intermediate blob
    h.upload(&third, b"three");
    assert_eq!(h.feed(), vec!["created /a.txt", "modified /a.txt"]);
    let stats = h.provider.stats().unwrap();
    assert_eq!(stats.blocked_keys, 0);
    assert_eq!(stats.blocked_events, 0);
}

#[test]
fn delete_while_pending_hides_content_for_good() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");
    let key = stored.storage_key().unwrap().clone();

    h.delete("/docs").applied().unwrap();
    assert_eq!(h.feed(), vec!["created /docs", "deleted /docs"]);

    // Nothing references the blob, so it is gone and nothing stays blocked
    assert!(h.storage.blob_info(&key).unwrap().is_none());
    assert_eq!(h.provider.stats().unwrap().blocked_keys, 0);
    assert!(h.storage.write_file(&key, &b"hello"[..]).is_err());
}

#[test]
fn durable_write_over_hidden_content_is_a_creation() {
    let h = Harness::new();
    let other = h.file("/x.txt", b"two");
    h.upload(&other, b"two");
    h.file("/a.txt", b"one");

    let stored = h.modify(&h.device, "/a.txt", b"one", b"two").applied().unwrap();
    assert!(!stored.pending);
    assert!(!stored.new_upload);

    assert_eq!(h.feed(), vec!["created /x.txt", "created /a.txt"]);
    assert_eq!(h.provider.stats().unwrap().blocked_keys, 0);
}

#[test]
fn purge_without_predecessor_deletes() {
    let h = Harness::new();
    let stored = h.file("/a.txt", b"hello");
    let key = stored.storage_key().unwrap().clone();

    let purged = h
        .provider
        .purge_user_pendings_by_device(&h.user, &h.device)
        .unwrap();
    assert_eq!(purged, vec![key.clone()]);

    assert_eq!(h.feed(), vec!["deleted /a.txt"]);
    assert!(h.provider.try_get_metadata(&h.user, &p("/a.txt")).unwrap().is_none());
    assert!(h.storage.blob_info(&key).unwrap().is_none());
}

#[test]
fn purge_restores_last_visible_content() {
    let h = Harness::new();
    let phone = DeviceId::new("phone");
    let first = h.file("/a.txt", b"one");
    h.upload(&first, b"one");

    h.modify(&phone, "/a.txt", b"one", b"two").applied().unwrap();
    h.rename("/a.txt", "/b.txt").applied().unwrap();

    // Consumers know the file, so they see it move with the old content
    assert_eq!(h.feed(), vec!["created /a.txt", "renamed /a.txt -> /b.txt"]);
    let events = h.provider.events(&h.user).unwrap();
    assert!(events.last().unwrap().change.metadata.references(first.storage_key().unwrap()));

    let purged = h.provider.purge_user_pendings_by_device(&h.user, &phone).unwrap();
    assert_eq!(purged.len(), 1);

    assert_eq!(
        h.feed(),
        vec!["created /a.txt", "renamed /a.txt -> /b.txt", "modified /b.txt"]
    );
    let restored = h.provider.try_get_metadata(&h.user, &p("/b.txt")).unwrap().unwrap();
    assert_eq!(restored.storage_key.as_ref(), first.storage_key());

    // Only the cancelling device's uploads are touched
    assert!(h
        .provider
        .purge_user_pendings_by_device(&h.user, &h.device)
        .unwrap()
        .is_empty());
}

#[test]
fn shared_content_is_uploaded_once() {
    let h = Harness::new();
    let bob = UserId::new("bob");
    let alice_file = h.file("/a.txt", b"same");
    let bob_file = h
        .provider
        .add_file_metadata(h.id(), &bob, &DeviceId::new("desk"), &p("/b.txt"), meta(b"same"))
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(alice_file.storage_key(), bob_file.storage_key());
    assert!(alice_file.new_upload);
    assert!(bob_file.pending);
    assert!(!bob_file.new_upload);

    h.upload(&alice_file, b"same");
    assert_eq!(h.feed(), vec!["created /a.txt"]);
    assert_eq!(feed_of(&h.provider, &bob), vec!["created /b.txt"]);
}

#[test]
fn stale_and_malformed_modifications_conflict() {
    let h = Harness::new();
    let stored = h.file("/a.txt", b"one");
    h.upload(&stored, b"one");

    let stale = h.modify(&h.device, "/a.txt", b"zzz", b"two");
    assert_eq!(
        stale.conflict(),
        Some(&Conflict::StaleRevision {
            path: p("/a.txt"),
            latest: Some(rev(b"one")),
        })
    );

    let malformed = h
        .provider
        .update_metadata(h.id(), &h.user, &h.device, &p("/a.txt"), meta(b"two"), Some("xyz"))
        .unwrap();
    assert_eq!(
        malformed.conflict(),
        Some(&Conflict::MalformedRevision {
            revision: "xyz".to_string()
        })
    );

    let missing_base = h
        .provider
        .update_metadata(h.id(), &h.user, &h.device, &p("/a.txt"), meta(b"two"), None)
        .unwrap();
    assert!(matches!(
        missing_base.conflict(),
        Some(Conflict::MalformedRevision { .. })
    ));

    // State is untouched
    let current = h.provider.try_get_metadata(&h.user, &p("/a.txt")).unwrap().unwrap();
    assert_eq!(current.revision, Some(rev(b"one")));
}

#[test]
fn update_conflicts_on_shape() {
    let h = Harness::new();
    h.folder("/docs");

    let mismatch = h.modify(&h.device, "/docs", b"one", b"two");
    assert_eq!(mismatch.conflict(), Some(&Conflict::TypeMismatch { path: p("/docs") }));

    let missing = h.modify(&h.device, "/nope.txt", b"one", b"two");
    assert_eq!(missing.conflict(), Some(&Conflict::NotFound { path: p("/nope.txt") }));

    let folder = h
        .provider
        .update_metadata(h.id(), &h.user, &h.device, &p("/docs"), FileMetadata::folder(Utc::now()), None)
        .unwrap()
        .applied()
        .unwrap();
    assert!(!folder.pending);
    assert_eq!(h.feed(), vec!["created /docs", "modified /docs"]);
}

#[test]
fn placement_conflicts() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"x");
    h.upload(&stored, b"x");

    let again = h
        .provider
        .add_folder_metadata(h.id(), &h.user, &p("/docs"), FileMetadata::folder(Utc::now()))
        .unwrap();
    assert_eq!(again.conflict(), Some(&Conflict::AlreadyExists { path: p("/docs") }));

    let orphan = h
        .provider
        .add_folder_metadata(h.id(), &h.user, &p("/nope/child"), FileMetadata::folder(Utc::now()))
        .unwrap();
    assert_eq!(
        orphan.conflict(),
        Some(&Conflict::ParentMissing {
            path: p("/nope/child")
        })
    );

    let under_file = h
        .provider
        .add_file_metadata(h.id(), &h.user, &h.device, &p("/docs/a.txt/b"), meta(b"y"))
        .unwrap();
    assert_eq!(
        under_file.conflict(),
        Some(&Conflict::NotAFolder {
            path: p("/docs/a.txt")
        })
    );
}

#[test]
fn rename_conflicts() {
    let h = Harness::new();
    h.folder("/docs");
    h.folder("/docs/sub");
    h.folder("/other");

    assert_eq!(
        h.rename("/docs", "/docs/sub/inner").conflict(),
        Some(&Conflict::InvalidTarget {
            from: p("/docs"),
            to: p("/docs/sub/inner")
        })
    );
    assert_eq!(
        h.rename("/docs", "/other").conflict(),
        Some(&Conflict::AlreadyExists { path: p("/other") })
    );
    assert_eq!(
        h.rename("/missing", "/x").conflict(),
        Some(&Conflict::NotFound { path: p("/missing") })
    );
    assert_eq!(
        h.delete("/missing").conflict(),
        Some(&Conflict::NotFound { path: p("/missing") })
    );
}

#[test]
fn recursive_rename_moves_content_references() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");
    h.upload(&stored, b"hello");

    h.rename("/docs", "/archive").applied().unwrap();
    let key = stored.storage_key().unwrap();
    assert!(h.storage.path_keys(&h.user, &p("/docs/a.txt")).unwrap().is_empty());
    assert_eq!(
        h.storage.path_keys(&h.user, &p("/archive/a.txt")).unwrap(),
        vec![key.clone()]
    );
    assert_eq!(
        h.provider.list_children(&h.user, &p("/archive")).unwrap()[0].0,
        p("/archive/a.txt")
    );
}

#[test]
fn root_and_sync_id_preconditions() {
    let h = Harness::new();
    let id = h.id();
    assert!(matches!(
        h.provider.recursively_remove_metadata(id, &h.user, &FilePath::root()),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(matches!(
        h.provider.add_folder_metadata(
            SyncId::new(99),
            &h.user,
            &p("/a"),
            FileMetadata::folder(Utc::now())
        ),
        Err(CoreError::InvalidArgument { .. })
    ));

    h.provider
        .add_folder_metadata(id, &h.user, &p("/a"), FileMetadata::folder(Utc::now()))
        .unwrap()
        .applied()
        .unwrap();
    assert!(matches!(
        h.provider
            .add_folder_metadata(id, &h.user, &p("/b"), FileMetadata::folder(Utc::now())),
        Err(CoreError::DuplicateSyncId { .. })
    ));
    assert!(matches!(
        h.provider
            .add_folder_metadata(h.id(), &h.user, &p("/c"), meta(b"x")),
        Err(CoreError::InvalidArgument { .. })
    ));
}

#[test]
fn out_of_order_insert_reports_to_hook() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    h.provider
        .set_unserialized_write_hook(Some(Arc::new(move |_user: &UserId, inserted: SyncId, last: SyncId| {
            assert!(inserted < last);
            seen.fetch_add(1, Ordering::SeqCst);
        })));

    let early = h.id();
    let late = h.id();
    h.provider
        .add_folder_metadata(late, &h.user, &p("/b"), FileMetadata::folder(Utc::now()))
        .unwrap()
        .applied()
        .unwrap();
    h.provider
        .add_folder_metadata(early, &h.user, &p("/a"), FileMetadata::folder(Utc::now()))
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.feed(), vec!["created /a", "created /b"]);
}

#[test]
fn feed_holds_back_at_unfinished_sync_ids() {
    let h = Harness::new();
    let early = h.id();
    let late = h.id();
    h.provider
        .add_folder_metadata(late, &h.user, &p("/x"), FileMetadata::folder(Utc::now()))
        .unwrap()
        .applied()
        .unwrap();

    let first = h.provider.changes_since_sync_id(SyncId::ZERO, &h.user).unwrap();
    assert!(first.is_empty());
    assert_eq!(first.cursor, SyncId::ZERO);
    assert_eq!(h.provider.stats().unwrap().issued_sync_ids, 1);

    h.provider
        .add_folder_metadata(early, &h.user, &p("/y"), FileMetadata::folder(Utc::now()))
        .unwrap()
        .applied()
        .unwrap();
    let second = h.provider.changes_since_sync_id(first.cursor, &h.user).unwrap();
    let changes: Vec<String> = second.changes.iter().map(ToString::to_string).collect();
    assert_eq!(changes, vec!["created /y", "created /x"]);
    assert_eq!(second.cursor, late);
    assert_eq!(h.provider.stats().unwrap().issued_sync_ids, 0);
}

#[test]
fn rejected_mutations_release_their_sync_ids() {
    let h = Harness::new();
    h.folder("/a");

    let conflict = h
        .provider
        .add_folder_metadata(h.id(), &h.user, &p("/a"), FileMetadata::folder(Utc::now()))
        .unwrap();
    assert!(conflict.is_conflict());
    assert!(h
        .provider
        .add_file_metadata(h.id(), &h.user, &h.device, &FilePath::root(), meta(b"x"))
        .is_err());
    assert!(h.delete("/missing").is_conflict());
    assert_eq!(h.provider.stats().unwrap().issued_sync_ids, 0);

    h.folder("/b");
    assert_eq!(h.feed(), vec!["created /a", "created /b"]);
}

#[test]
fn upload_settled_while_a_query_waits_is_delivered_once() {
    let h = Harness::new();
    let stored = h.file("/a.txt", b"hello");
    let shard = h.provider.state().unwrap().existing_shard(&h.user).unwrap();

    let first = thread::scope(|scope| {
        let events = shard.events.lock();
        let writer = scope.spawn(|| h.upload(&stored, b"hello"));
        // The completion callback holds the tree while it waits for the log
        while !shard.tree.is_locked() {
            thread::yield_now();
        }
        let reader =
            scope.spawn(|| h.provider.changes_since_sync_id(SyncId::ZERO, &h.user).unwrap());
        thread::sleep(Duration::from_millis(50));
        drop(events);

        writer.join().unwrap();
        reader.join().unwrap()
    });
    let second = h.provider.changes_since_sync_id(first.cursor, &h.user).unwrap();

    let delivered: Vec<String> = first
        .changes
        .iter()
        .chain(&second.changes)
        .map(ToString::to_string)
        .collect();
    assert_eq!(delivered, vec!["created /a.txt"]);
    assert_eq!(h.provider.stats().unwrap().active_queries, 0);
}

#[test]
fn query_limit_pages_through_log() {
    let h = Harness::with_config(ProviderConfig::new().max_changes_per_query(2));
    h.folder("/a");
    h.folder("/b");
    h.folder("/c");

    let first = h.provider.changes_since_sync_id(SyncId::ZERO, &h.user).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first.cursor, SyncId::new(2));

    let second = h.provider.changes_since_sync_id(first.cursor, &h.user).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second.cursor, SyncId::new(3));

    let done = h.provider.changes_since_sync_id(second.cursor, &h.user).unwrap();
    assert!(done.is_empty());
    assert_eq!(done.cursor, SyncId::new(3));
}

#[test]
fn preload_seeds_trees_and_blocks_missing_content() {
    let storage = Arc::new(PhysicalStorage::in_memory());
    storage
        .initialize(Some(&InitialStorageData::new().with_text("hello")))
        .unwrap();

    let initial = InitialMetadata::new()
        .with_entry("alice", InitialEntry::text_file(p("/docs/a.txt"), "hello"))
        .with_entry("alice", InitialEntry::text_file(p("/docs/b.txt"), "missing"))
        .with_entry("alice", InitialEntry::folder(p("/docs")));
    let provider = MetadataProvider::default();
    provider.initialize(Arc::clone(&storage), Some(&initial)).unwrap();

    let alice = UserId::new("alice");
    assert_eq!(
        feed_of(&provider, &alice),
        vec!["created /docs", "created /docs/a.txt"]
    );
    assert_eq!(provider.stats().unwrap().last_sync_id, 3);

    // The preload device gave up its claim, so a client may upload
    let stored = provider
        .add_file_metadata(
            provider.new_sync_id_before_start().unwrap(),
            &alice,
            &DeviceId::new("laptop"),
            &p("/c.txt"),
            meta(b"missing"),
        )
        .unwrap()
        .applied()
        .unwrap();
    assert!(stored.pending);
    assert!(stored.new_upload);

    storage
        .write_file(stored.storage_key().unwrap(), &b"missing"[..])
        .unwrap();
    assert_eq!(
        feed_of(&provider, &alice),
        vec![
            "created /docs",
            "created /docs/a.txt",
            "created /docs/b.txt",
            "created /c.txt"
        ]
    );
}

#[test]
fn preload_rejects_orphans() {
    let storage = Arc::new(PhysicalStorage::in_memory());
    storage.initialize(None).unwrap();
    let initial =
        InitialMetadata::new().with_entry("alice", InitialEntry::text_file(p("/docs/a.txt"), "x"));
    let provider = MetadataProvider::default();
    assert!(matches!(
        provider.initialize(storage, Some(&initial)),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(!provider.is_initialized());
}

#[test]
fn stats_track_blocked_events() {
    let h = Harness::new();
    h.folder("/docs");
    let stored = h.file("/docs/a.txt", b"hello");

    let stats = h.provider.stats().unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.events, 2);
    assert_eq!(stats.blocked_keys, 1);
    assert_eq!(stats.blocked_events, 1);
    assert_eq!(stats.active_queries, 0);

    h.upload(&stored, b"hello");
    let stats = h.provider.stats().unwrap();
    assert_eq!(stats.blocked_events, 0);
    assert_eq!(stats.events, 2);
    assert_eq!(h.provider.users().unwrap(), vec![h.user.clone()]);
}
