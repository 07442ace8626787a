//! Persistence layer: the notification store contract.
//!
//! [`NotificationStore`] is the server-side collaborator holding stored
//! notifications and per-user preference rows. The concrete implementation
//! uses `sqlx::PgPool` for async PostgreSQL access; an in-memory store
//! backs tests and local runs.

pub mod memory;
pub mod models;
pub mod postgres;

use std::future::Future;

use crate::domain::{
    Notification, NotificationId, NotificationPreferences, PreferencesPatch, UserId,
};
use crate::error::PipelineError;

/// Server-side store for notifications and notification preferences.
///
/// Notification rows are owned by their user: `mark_read` and `delete`
/// must refuse rows belonging to anyone else. Preference rows are created
/// lazily; `get_preferences` returns `None` until the first upsert.
pub trait NotificationStore: Send + Sync + 'static {
    /// Lists the user's notifications, newest first, at most `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on store failure.
    fn list(
        &self,
        user: UserId,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Notification>, PipelineError>> + Send;

    /// Inserts a notification row.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on store failure.
    fn insert(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Marks the user's notification as read.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotificationNotFound`] when the row does
    /// not exist or belongs to another user, and
    /// [`PipelineError::Persistence`] on store failure.
    fn mark_read(
        &self,
        id: NotificationId,
        user: UserId,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Deletes the user's notification.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotificationNotFound`] when the row does
    /// not exist or belongs to another user, and
    /// [`PipelineError::Persistence`] on store failure.
    fn delete(
        &self,
        id: NotificationId,
        user: UserId,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Fetches the user's preference row, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on store failure.
    fn get_preferences(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Option<NotificationPreferences>, PipelineError>> + Send;

    /// Creates or partially updates the user's preference row, returning
    /// the resulting record. Unset patch fields keep their stored value
    /// (or the lazy-creation defaults for a fresh row).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] on store failure.
    fn upsert_preferences(
        &self,
        user: UserId,
        patch: &PreferencesPatch,
    ) -> impl Future<Output = Result<NotificationPreferences, PipelineError>> + Send;
}
