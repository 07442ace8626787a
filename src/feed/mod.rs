//! Change-feed contract: the transport seam of the pipeline.
//!
//! The backend data store emits a change record (insert/update/delete with
//! before/after row snapshots) for every write to a watched table. A
//! [`ChangeFeed`] implementation turns a [`FilterSpec`] predicate into a
//! lazy, cancellable stream of those records. Everything downstream — the
//! subscription manager, the event reducer, the dispatcher — is written
//! against this trait, not against any particular transport.

pub mod memory;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Watched tables of the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    /// Append-only match event log.
    MatchEvents,
    /// Mutable current-match-state rows.
    MatchState,
    /// Per-user stored notifications.
    Notifications,
}

impl FeedTable {
    /// Returns the table name as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MatchEvents => "match_events",
            Self::MatchState => "match_state",
            Self::Notifications => "notifications",
        }
    }
}

/// Kind of write a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    /// A new row was inserted.
    Insert,
    /// An existing row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// One change notification: operation plus row snapshots.
///
/// `new_row` is present for inserts and updates; `old_row` for updates and
/// deletes. Rows travel as raw JSON and are decoded at the consuming edge
/// so one record type serves every watched table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Table the write happened on.
    pub table: FeedTable,
    /// Kind of write.
    pub op: ChangeOp,
    /// Row snapshot before the write.
    pub old_row: Option<serde_json::Value>,
    /// Row snapshot after the write.
    pub new_row: Option<serde_json::Value>,
}

impl ChangeRecord {
    /// Builds an INSERT record.
    #[must_use]
    pub const fn insert(table: FeedTable, row: serde_json::Value) -> Self {
        Self {
            table,
            op: ChangeOp::Insert,
            old_row: None,
            new_row: Some(row),
        }
    }

    /// Builds an UPDATE record.
    #[must_use]
    pub const fn update(
        table: FeedTable,
        old_row: serde_json::Value,
        new_row: serde_json::Value,
    ) -> Self {
        Self {
            table,
            op: ChangeOp::Update,
            old_row: Some(old_row),
            new_row: Some(new_row),
        }
    }

    /// Builds a DELETE record.
    #[must_use]
    pub const fn delete(table: FeedTable, old_row: serde_json::Value) -> Self {
        Self {
            table,
            op: ChangeOp::Delete,
            old_row: Some(old_row),
            new_row: None,
        }
    }

    /// Returns the row snapshot that identifies this change: the new row
    /// for inserts and updates, the old row for deletes.
    #[must_use]
    pub const fn row(&self) -> Option<&serde_json::Value> {
        match self.op {
            ChangeOp::Insert | ChangeOp::Update => self.new_row.as_ref(),
            ChangeOp::Delete => self.old_row.as_ref(),
        }
    }
}

/// Change-feed predicate: which table, which operations, which rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Watched table.
    pub table: FeedTable,
    /// Operations to deliver; `None` means all three.
    pub ops: Option<Vec<ChangeOp>>,
    /// Column-equality row filter, e.g. `("match_id", <uuid>)`.
    pub row_eq: Option<(String, serde_json::Value)>,
}

impl FilterSpec {
    /// Creates a filter matching every write on `table`.
    #[must_use]
    pub const fn table(table: FeedTable) -> Self {
        Self {
            table,
            ops: None,
            row_eq: None,
        }
    }

    /// Restricts the filter to the given operations.
    #[must_use]
    pub fn ops(mut self, ops: impl Into<Vec<ChangeOp>>) -> Self {
        self.ops = Some(ops.into());
        self
    }

    /// Restricts the filter to rows whose `column` equals `value`.
    #[must_use]
    pub fn row_eq(mut self, column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.row_eq = Some((column.into(), value.into()));
        self
    }

    /// Returns `true` if the record passes this predicate.
    #[must_use]
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if record.table != self.table {
            return false;
        }
        if let Some(ops) = &self.ops
            && !ops.contains(&record.op)
        {
            return false;
        }
        if let Some((column, value)) = &self.row_eq {
            let Some(row) = record.row() else {
                return false;
            };
            return row.get(column) == Some(value);
        }
        true
    }
}

/// A lazy, cancellable sequence of change records for one subscription.
///
/// An `Err` item is a transport fault (the subscription manager reacts by
/// reconnecting); `None` is an orderly end of the channel.
pub type ChangeStream = BoxStream<'static, Result<ChangeRecord, FeedError>>;

/// A transport that can open filtered change streams.
///
/// Opening a stream is the subscription handshake; implementations
/// multiplex all open streams onto one shared connection.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Opens a stream of records matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] when the handshake fails; the caller decides
    /// whether to retry.
    fn open(
        &self,
        filter: &FilterSpec,
    ) -> impl std::future::Future<Output = Result<ChangeStream, FeedError>> + Send;
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_rejects_other_tables() {
        let filter = FilterSpec::table(FeedTable::MatchEvents);
        let record = ChangeRecord::insert(FeedTable::Notifications, json!({}));
        assert!(!filter.matches(&record));
    }

    #[test]
    fn filter_restricts_operations() {
        let filter = FilterSpec::table(FeedTable::MatchState).ops([ChangeOp::Update]);
        let update = ChangeRecord::update(FeedTable::MatchState, json!({}), json!({}));
        let insert = ChangeRecord::insert(FeedTable::MatchState, json!({}));
        assert!(filter.matches(&update));
        assert!(!filter.matches(&insert));
    }

    #[test]
    fn row_filter_compares_column_values() {
        let filter =
            FilterSpec::table(FeedTable::MatchEvents).row_eq("match_id", "abc");
        let hit = ChangeRecord::insert(FeedTable::MatchEvents, json!({"match_id": "abc"}));
        let miss = ChangeRecord::insert(FeedTable::MatchEvents, json!({"match_id": "xyz"}));
        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
    }

    #[test]
    fn row_filter_uses_old_row_for_deletes() {
        let filter =
            FilterSpec::table(FeedTable::MatchEvents).row_eq("match_id", "abc");
        let delete = ChangeRecord::delete(FeedTable::MatchEvents, json!({"match_id": "abc"}));
        assert!(filter.matches(&delete));
    }

    #[test]
    fn op_serde_is_screaming_snake_case() {
        let json = serde_json::to_string(&ChangeOp::Insert).unwrap_or_default();
        assert_eq!(json, "\"INSERT\"");
    }
}
