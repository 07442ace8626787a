//! Client event reducer: a bounded fold over a change stream.
//!
//! [`RecentList`] merges an ordered (but not gap-free or duplicate-free)
//! stream of change records into the bounded in-memory list behind a live
//! topic view. The merge is idempotent by row identity, which is what
//! makes at-least-once delivery from the change feed safe. The list is
//! never re-sorted: insert placement trusts arrival order, so out-of-order
//! delivery can leave the list out of strict chronological order.

use crate::domain::{EventId, MatchEvent, Notification, NotificationId};
use crate::feed::ChangeOp;

/// A row with a stable identity used as the deduplication key.
pub trait Identified {
    /// Identity type.
    type Id: PartialEq + Copy;

    /// Returns the row's identity.
    fn ident(&self) -> Self::Id;
}

impl Identified for MatchEvent {
    type Id = EventId;

    fn ident(&self) -> EventId {
        self.id
    }
}

impl Identified for Notification {
    type Id = NotificationId;

    fn ident(&self) -> NotificationId {
        self.id
    }
}

/// Bounded newest-first list of recent rows for one topic.
#[derive(Debug, Clone)]
pub struct RecentList<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Identified + PartialEq> RecentList<T> {
    /// Creates an empty list retaining at most `capacity` rows.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Applies one change record to the list.
    ///
    /// - INSERT prepends and truncates to capacity. A redelivery with an
    ///   identity already present and equal content is a no-op; different
    ///   content replaces in place (an admin correction redelivered as
    ///   INSERT).
    /// - UPDATE replaces the row with matching identity in place; an
    ///   absent identity is a no-op (the row fell out of the window).
    /// - DELETE removes the row with matching identity; absent is a no-op.
    ///
    /// Returns `true` if the list changed.
    pub fn apply(&mut self, op: ChangeOp, row: T) -> bool {
        match op {
            ChangeOp::Insert => {
                if let Some(existing) = self.find_mut(row.ident()) {
                    if *existing == row {
                        return false;
                    }
                    *existing = row;
                    return true;
                }
                self.items.insert(0, row);
                self.items.truncate(self.capacity);
                true
            }
            ChangeOp::Update => {
                if let Some(existing) = self.find_mut(row.ident())
                    && *existing != row
                {
                    *existing = row;
                    return true;
                }
                false
            }
            ChangeOp::Delete => {
                let before = self.items.len();
                let id = row.ident();
                self.items.retain(|item| item.ident() != id);
                self.items.len() != before
            }
        }
    }

    /// Replaces the whole window, e.g. from a snapshot re-fetch after a
    /// reconnect gap. Rows beyond capacity are dropped from the tail.
    pub fn replace_all(&mut self, rows: Vec<T>) {
        self.items = rows;
        self.items.truncate(self.capacity);
    }

    fn find_mut(&mut self, id: T::Id) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.ident() == id)
    }

    /// Returns the retained rows, newest first.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Number of retained rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no rows are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of retained rows.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Identified + PartialEq + Clone> RecentList<T> {
    /// Returns an owned copy of the retained rows.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }
}
