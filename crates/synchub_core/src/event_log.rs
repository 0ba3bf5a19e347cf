//! Per-user event log ordered by sync id.

use crate::event::UserEvent;
use std::collections::BTreeMap;
use std::ops::Bound;
use synchub_types::SyncId;

/// Where an inserted event landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// After every existing event.
    Appended,
    /// Before `last`, the highest id already in the log.
    OutOfOrder {
        /// Highest id in the log at insert time.
        last: SyncId,
    },
}

/// A user's events, addressed and ordered by sync id.
///
/// Ids are handed out before operations race to insert, so inserts may
/// arrive out of order; the log keeps them sorted regardless. Events can
/// also be removed and replaced by id, which pending-upload resolution
/// relies on.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: BTreeMap<SyncId, UserEvent>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Highest id in the log.
    #[must_use]
    pub fn last_sync_id(&self) -> Option<SyncId> {
        self.events.keys().next_back().copied()
    }

    /// Returns true if an event with this id exists.
    #[must_use]
    pub fn contains(&self, sync_id: SyncId) -> bool {
        self.events.contains_key(&sync_id)
    }

    /// Returns the event with this id.
    #[must_use]
    pub fn get(&self, sync_id: SyncId) -> Option<&UserEvent> {
        self.events.get(&sync_id)
    }

    /// Inserts an event at its id's position.
    ///
    /// # Errors
    ///
    /// Hands the event back if its id is already taken.
    pub fn insert(&mut self, event: UserEvent) -> Result<Insertion, UserEvent> {
        if self.events.contains_key(&event.sync_id) {
            return Err(event);
        }
        let placement = match self.last_sync_id() {
            Some(last) if last > event.sync_id => Insertion::OutOfOrder { last },
            _ => Insertion::Appended,
        };
        self.events.insert(event.sync_id, event);
        Ok(placement)
    }

    /// Replaces the event with the same id, returning the old one.
    ///
    /// Does nothing and returns `None` if no such event exists.
    pub fn replace(&mut self, event: UserEvent) -> Option<UserEvent> {
        let slot = self.events.get_mut(&event.sync_id)?;
        Some(std::mem::replace(slot, event))
    }

    /// Removes the event with this id.
    pub fn remove(&mut self, sync_id: SyncId) -> Option<UserEvent> {
        self.events.remove(&sync_id)
    }

    /// Events with an id greater than `cursor`, in order.
    pub fn after(&self, cursor: SyncId) -> impl Iterator<Item = &UserEvent> {
        self.events
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .map(|(_, event)| event)
    }

    /// Events with an id less than `sync_id`, newest first.
    pub fn before(&self, sync_id: SyncId) -> impl Iterator<Item = &UserEvent> {
        self.events.range(..sync_id).rev().map(|(_, event)| event)
    }

    /// All events in order.
    pub fn iter(&self) -> impl Iterator<Item = &UserEvent> {
        self.events.values()
    }
}
