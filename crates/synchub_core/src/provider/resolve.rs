//! Settling events that were blocked on a pending upload.
//!
//! When a blob's upload completes, is cancelled, or the blob disappears,
//! every event a user recorded against it is re-evaluated. The log may
//! have moved on since: the file may have been renamed (renames of a
//! hidden file are hidden too), deleted, or overwritten. Each blocked
//! event is settled in three steps:
//!
//! 1. Replay the log forward from the event to find where the file lives
//!    now, or what ended it.
//! 2. Walk the log backward to find the last visible content at that
//!    path, which consumers already have.
//! 3. Remove the stale event and the hidden renames that tracked it, then
//!    append the events consumers need at fresh sync ids.
//!
//! Settling is driven by removing the `(key, user)` entry from the
//! pending index, so a key is never settled twice for the same user.

use super::ProviderState;
use crate::error::{CoreError, CoreResult};
use crate::event::{ChangeKind, FileChange, UserEvent};
use crate::event_log::EventLog;
use crate::metadata::FileMetadata;
use crate::tree::PathTree;
use std::collections::HashSet;
use synchub_types::{FilePath, StorageKey, SyncId, UserId};
use tracing::{debug, error, warn};

/// Why a key's events are being settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    /// The upload completed; the content is readable.
    Completed,
    /// The uploading device went away; roll the paths back.
    Cancelled,
    /// The blob is gone from the store; drop what is left.
    Vanished,
}

/// Decides which events of one user consumers may see.
///
/// Creations, modifications and renames of content that is still
/// uploading are hidden. Deletions are always visible.
pub(crate) struct Visibility<'a> {
    blocked: HashSet<StorageKey>,
    settling: Option<&'a StorageKey>,
}

impl<'a> Visibility<'a> {
    pub(crate) fn new(blocked: HashSet<StorageKey>, settling: Option<&'a StorageKey>) -> Self {
        Self { blocked, settling }
    }

    pub(crate) fn is_hidden(&self, event: &UserEvent) -> bool {
        is_hidden_by(event, |key| {
            self.settling == Some(key) || self.blocked.contains(key)
        })
    }
}

/// Applies the visibility rule with `blocked` deciding per key.
pub(crate) fn is_hidden_by(event: &UserEvent, blocked: impl Fn(&StorageKey) -> bool) -> bool {
    if event.kind() == ChangeKind::Deleted {
        return false;
    }
    event.change.storage_key().is_some_and(blocked)
}

#[derive(Debug, PartialEq, Eq)]
enum Fate {
    /// The file is still in the tree at `live`.
    Survived { live: FilePath },
    /// A later write at the same path replaced the content.
    Superseded,
    /// A deletion of `at` (the file or an ancestor) removed it.
    Deleted { at: FilePath, sync_id: SyncId },
}

#[derive(Debug)]
struct Replay {
    fate: Fate,
    /// Renames of the file itself that carry the settled key.
    trail: Vec<SyncId>,
}

/// Follows `start`'s path forward through every later event.
fn replay_forward(events: &EventLog, start: &UserEvent, key: &StorageKey) -> Replay {
    let mut live = start.path().clone();
    let mut trail = Vec::new();
    for event in events.after(start.sync_id) {
        let change = &event.change;
        match change.kind {
            ChangeKind::Renamed => {
                let Some(from) = &change.old_path else {
                    continue;
                };
                if let Some(moved) = live.rebase(from, &change.new_path) {
                    if *from == live && change.metadata.references(key) {
                        trail.push(event.sync_id);
                    }
                    live = moved;
                }
            }
            ChangeKind::Deleted if live.starts_with(&change.new_path) => {
                return Replay {
                    fate: Fate::Deleted {
                        at: change.new_path.clone(),
                        sync_id: event.sync_id,
                    },
                    trail,
                };
            }
            ChangeKind::Created | ChangeKind::Modified if change.new_path == live => {
                return Replay {
                    fate: Fate::Superseded,
                    trail,
                };
            }
            _ => {}
        }
    }
    Replay {
        fate: Fate::Survived { live },
        trail,
    }
}

/// The last visible file content consumers have for a path.
#[derive(Debug, Clone)]
pub(crate) struct Predecessor {
    pub(crate) metadata: FileMetadata,
    pub(crate) path: FilePath,
    pub(crate) sync_id: SyncId,
}

/// Walks backward from `before` looking for visible content at `path`.
///
/// Every rename is followed, hidden or not, so the walk keeps track of
/// the file itself. Only a visible creation or modification counts as a
/// predecessor; a deletion covering the path ends the search.
pub(crate) fn find_predecessor(
    events: &EventLog,
    before: SyncId,
    path: &FilePath,
    view: &Visibility<'_>,
) -> Option<Predecessor> {
    let mut path = path.clone();
    for event in events.before(before) {
        let change = &event.change;
        match change.kind {
            ChangeKind::Renamed => {
                let Some(from) = &change.old_path else {
                    continue;
                };
                if let Some(earlier) = path.rebase(&change.new_path, from) {
                    path = earlier;
                } else if path.starts_with(from) {
                    // Whatever lived here moved away; the file came later
                    return None;
                }
            }
            ChangeKind::Deleted if path.starts_with(&change.new_path) => return None,
            ChangeKind::Created | ChangeKind::Modified
                if change.new_path == path && !view.is_hidden(event) =>
            {
                if change.metadata.is_folder {
                    return None;
                }
                return Some(Predecessor {
                    metadata: change.metadata.clone(),
                    path,
                    sync_id: event.sync_id,
                });
            }
            _ => {}
        }
    }
    None
}

/// Where consumers believe the predecessor lives, following visible
/// renames only, up to (excluding) `until`.
pub(crate) fn seen_path(
    events: &EventLog,
    predecessor: &Predecessor,
    until: Option<SyncId>,
    view: &Visibility<'_>,
) -> FilePath {
    let mut seen = predecessor.path.clone();
    for event in events.after(predecessor.sync_id) {
        if until.is_some_and(|until| event.sync_id >= until) {
            break;
        }
        if event.kind() != ChangeKind::Renamed || view.is_hidden(event) {
            continue;
        }
        if let Some(from) = &event.change.old_path {
            if let Some(moved) = seen.rebase(from, &event.change.new_path) {
                seen = moved;
            }
        }
    }
    seen
}

impl ProviderState {
    /// Settles one blocked event of `user` on `key`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn settle_event(
        &self,
        user: &UserId,
        tree: &mut PathTree<FileMetadata>,
        events: &mut EventLog,
        view: &Visibility<'_>,
        sync_id: SyncId,
        key: &StorageKey,
        settlement: Settlement,
    ) -> CoreResult<()> {
        let Some(event) = events.get(sync_id).cloned() else {
            debug!(%user, %sync_id, "blocked event already gone");
            return Ok(());
        };

        let replay = replay_forward(events, &event, key);
        let predecessor = find_predecessor(events, sync_id, event.path(), view);

        events.remove(sync_id);
        for id in &replay.trail {
            events.remove(*id);
        }

        match replay.fate {
            Fate::Superseded => {
                debug!(%user, %sync_id, %key, "blocked event superseded by a later write");
                Ok(())
            }
            Fate::Deleted { at, sync_id: deleted_at } => {
                if let Some(predecessor) = predecessor {
                    let seen = seen_path(events, &predecessor, Some(deleted_at), view);
                    if !seen.starts_with(&at) {
                        self.append_fresh(
                            user,
                            events,
                            FileChange::deleted(seen, predecessor.metadata),
                            None,
                        )?;
                    }
                }
                debug!(%user, %sync_id, %key, path = %at, "blocked event's path was deleted");
                Ok(())
            }
            Fate::Survived { live } => match settlement {
                Settlement::Completed => {
                    self.publish_completed(user, tree, events, view, key, &live, predecessor)
                }
                Settlement::Cancelled => {
                    self.roll_back(user, tree, events, view, key, &live, predecessor)
                }
                Settlement::Vanished => {
                    warn!(%user, %key, path = %live, "content vanished from a live path");
                    Ok(())
                }
            },
        }
    }

    fn current_entry(
        &self,
        user: &UserId,
        tree: &PathTree<FileMetadata>,
        key: &StorageKey,
        live: &FilePath,
    ) -> CoreResult<FileMetadata> {
        match tree.get(live) {
            Some(current) if current.references(key) => Ok(current.clone()),
            Some(_) => {
                error!(%user, %key, path = %live, "replayed path holds other content");
                Err(CoreError::invariant(format!(
                    "{live} of {user} does not reference {key} after replay"
                )))
            }
            None => {
                error!(%user, %key, path = %live, "replayed path missing from tree");
                Err(CoreError::invariant(format!(
                    "{live} of {user} is missing after replay"
                )))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_completed(
        &self,
        user: &UserId,
        tree: &PathTree<FileMetadata>,
        events: &mut EventLog,
        view: &Visibility<'_>,
        key: &StorageKey,
        live: &FilePath,
        predecessor: Option<Predecessor>,
    ) -> CoreResult<()> {
        let current = self.current_entry(user, tree, key, live)?;
        match predecessor {
            Some(predecessor) => {
                let seen = seen_path(events, &predecessor, None, view);
                if seen != *live {
                    self.append_fresh(
                        user,
                        events,
                        FileChange::renamed(seen, live.clone(), predecessor.metadata.clone()),
                        None,
                    )?;
                }
                self.append_fresh(
                    user,
                    events,
                    FileChange::modified(live.clone(), current),
                    Some(predecessor.metadata),
                )?;
            }
            None => {
                self.append_fresh(user, events, FileChange::created(live.clone(), current), None)?;
            }
        }
        debug!(%user, %key, path = %live, "published completed upload");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn roll_back(
        &self,
        user: &UserId,
        tree: &mut PathTree<FileMetadata>,
        events: &mut EventLog,
        view: &Visibility<'_>,
        key: &StorageKey,
        live: &FilePath,
        predecessor: Option<Predecessor>,
    ) -> CoreResult<()> {
        let cancelled = self.current_entry(user, tree, key, live)?;
        let restore = predecessor.and_then(|p| p.metadata.storage_key.clone().map(|k| (p, k)));

        match restore {
            Some((predecessor, restore_key)) => {
                self.storage.revert_user_path(user, live, &restore_key)?;
                tree.insert(live, predecessor.metadata.clone());
                let seen = seen_path(events, &predecessor, None, view);
                if seen != *live {
                    self.append_fresh(
                        user,
                        events,
                        FileChange::renamed(seen, live.clone(), predecessor.metadata.clone()),
                        None,
                    )?;
                }
                self.append_fresh(
                    user,
                    events,
                    FileChange::modified(live.clone(), predecessor.metadata),
                    Some(cancelled),
                )?;
                debug!(%user, %key, path = %live, restored = %restore_key, "rolled back to last durable content");
            }
            None => {
                tree.remove(live);
                self.storage.remove_user_usage_from_file(user, live)?;
                self.append_fresh(user, events, FileChange::deleted(live.clone(), cancelled), None)?;
                debug!(%user, %key, path = %live, "rolled back by deleting never-durable file");
            }
        }
        Ok(())
    }
}
