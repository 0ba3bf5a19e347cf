//! Pending-upload bookkeeping.
//!
//! [`PendingIndex`] records which log events wait for a blob to finish
//! uploading. [`QueryRegistry`] tracks change queries in flight so that a
//! blob completing halfway through a query does not leak stale events
//! into its answer.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use synchub_types::{StorageKey, SyncId, UserId};

/// Events blocked on blobs that are still uploading.
///
/// Keyed by storage key, then user. An entry exists exactly while the
/// user has events whose visibility depends on that blob.
#[derive(Debug, Clone, Default)]
pub struct PendingIndex {
    entries: BTreeMap<StorageKey, BTreeMap<UserId, BTreeSet<SyncId>>>,
}

impl PendingIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks `sync_id` of `user` on `key`.
    ///
    /// Returns true if the pair `(key, user)` was not blocked before.
    pub fn block(&mut self, key: &StorageKey, user: &UserId, sync_id: SyncId) -> bool {
        let users = self.entries.entry(key.clone()).or_default();
        let fresh = !users.contains_key(user);
        users.entry(user.clone()).or_default().insert(sync_id);
        fresh
    }

    /// Unblocks `(key, user)`, returning its events in id order.
    pub fn unblock(&mut self, key: &StorageKey, user: &UserId) -> Vec<SyncId> {
        let Some(users) = self.entries.get_mut(key) else {
            return Vec::new();
        };
        let ids = users.remove(user).map(|ids| ids.into_iter().collect()).unwrap_or_default();
        if users.is_empty() {
            self.entries.remove(key);
        }
        ids
    }

    /// Returns true if `user`'s events on `key` are blocked.
    #[must_use]
    pub fn is_blocked(&self, key: &StorageKey, user: &UserId) -> bool {
        self.entries
            .get(key)
            .is_some_and(|users| users.contains_key(user))
    }

    /// Users with events blocked on `key`.
    #[must_use]
    pub fn users_blocked_on(&self, key: &StorageKey) -> Vec<UserId> {
        self.entries
            .get(key)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys blocking some event of `user`.
    #[must_use]
    pub fn blocked_keys(&self, user: &UserId) -> HashSet<StorageKey> {
        self.entries
            .iter()
            .filter(|(_, users)| users.contains_key(user))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of blocked keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of blocked events across all users.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    /// Returns true if nothing is blocked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle of a change query in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryToken(u64);

#[derive(Debug)]
struct ActiveQuery {
    user: UserId,
    late: HashSet<StorageKey>,
}

/// Change queries in flight and the keys unblocked while they ran.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    next_token: u64,
    active: HashMap<QueryToken, ActiveQuery>,
}

impl QueryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a query over `user`'s log.
    pub fn register(&mut self, user: &UserId) -> QueryToken {
        self.next_token += 1;
        let token = QueryToken(self.next_token);
        self.active.insert(
            token,
            ActiveQuery {
                user: user.clone(),
                late: HashSet::new(),
            },
        );
        token
    }

    /// Records that `key` was unblocked for `user` while queries ran.
    pub fn record_late(&mut self, user: &UserId, key: &StorageKey) {
        for query in self.active.values_mut().filter(|q| &q.user == user) {
            query.late.insert(key.clone());
        }
    }

    /// Ends a query, returning the keys unblocked during it.
    pub fn finish(&mut self, token: QueryToken) -> HashSet<StorageKey> {
        self.active
            .remove(&token)
            .map(|query| query.late)
            .unwrap_or_default()
    }

    /// Number of queries in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> StorageKey {
        StorageKey::new(k)
    }

    #[test]
    fn block_and_unblock() {
        let mut index = PendingIndex::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        assert!(index.block(&key("1"), &alice, SyncId::new(5)));
        assert!(!index.block(&key("1"), &alice, SyncId::new(2)));
        assert!(index.block(&key("1"), &bob, SyncId::new(3)));
        assert_eq!(index.event_count(), 3);
        assert_eq!(index.users_blocked_on(&key("1")), vec![alice.clone(), bob.clone()]);

        assert_eq!(index.unblock(&key("1"), &alice), vec![SyncId::new(2), SyncId::new(5)]);
        assert!(!index.is_blocked(&key("1"), &alice));
        assert!(index.is_blocked(&key("1"), &bob));

        // Second unblock finds nothing
        assert!(index.unblock(&key("1"), &alice).is_empty());

        index.unblock(&key("1"), &bob);
        assert!(index.is_empty());
    }

    #[test]
    fn blocked_keys_per_user() {
        let mut index = PendingIndex::new();
        let alice = UserId::new("alice");
        index.block(&key("1"), &alice, SyncId::new(1));
        index.block(&key("2"), &alice, SyncId::new(2));
        index.block(&key("3"), &UserId::new("bob"), SyncId::new(3));

        let keys = index.blocked_keys(&alice);
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&key("2")));
        assert_eq!(index.key_count(), 3);
    }

    #[test]
    fn late_completions_reach_only_matching_queries() {
        let mut registry = QueryRegistry::new();
        let alice = UserId::new("alice");
        let first = registry.register(&alice);
        let other = registry.register(&UserId::new("bob"));

        registry.record_late(&alice, &key("9"));
        let second = registry.register(&alice);
        assert_eq!(registry.active_count(), 3);

        assert_eq!(registry.finish(first), HashSet::from([key("9")]));
        assert!(registry.finish(second).is_empty());
        assert!(registry.finish(other).is_empty());
        assert!(registry.finish(first).is_empty());
        assert_eq!(registry.active_count(), 0);
    }
}
