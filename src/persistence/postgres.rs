//! PostgreSQL implementation of the notification store.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE notifications (
//!     id UUID PRIMARY KEY,
//!     user_id UUID NOT NULL,
//!     title TEXT NOT NULL,
//!     message TEXT NOT NULL,
//!     notification_type TEXT NOT NULL,
//!     data JSONB NOT NULL DEFAULT '{}',
//!     is_read BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE notification_preferences (
//!     user_id UUID PRIMARY KEY,
//!     goal_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     card_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     match_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     news_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     ticket_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     order_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     payment_alerts BOOLEAN NOT NULL DEFAULT TRUE,
//!     push_enabled BOOLEAN NOT NULL DEFAULT FALSE
//! );
//! ```

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::NotificationStore;
use super::models::{NotificationRow, PreferencesRow};
use crate::config::PipelineConfig;
use crate::domain::{
    Notification, NotificationId, NotificationPreferences, PreferencesPatch, UserId,
};
use crate::error::PipelineError;

/// PostgreSQL-backed notification store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    /// Creates a store with an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the pool settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] when the pool cannot be
    /// established.
    pub async fn connect(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        Ok(Self { pool })
    }
}

impl NotificationStore for PgNotificationStore {
    async fn list(&self, user: UserId, limit: i64) -> Result<Vec<Notification>, PipelineError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT id, user_id, title, message, notification_type, data, is_read, created_at \
             FROM notifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn insert(&self, notification: &Notification) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO notifications \
             (id, user_id, title, message, notification_type, data, is_read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.user_id.as_uuid())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.notification_type.as_str())
        .bind(&notification.data)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn mark_read(&self, id: NotificationId, user: UserId) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2",
        )
        .bind(id.as_uuid())
        .bind(user.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotificationNotFound(*id.as_uuid()));
        }
        Ok(())
    }

    async fn delete(&self, id: NotificationId, user: UserId) -> Result<(), PipelineError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id.as_uuid())
            .bind(user.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotificationNotFound(*id.as_uuid()));
        }
        Ok(())
    }

    async fn get_preferences(
        &self,
        user: UserId,
    ) -> Result<Option<NotificationPreferences>, PipelineError> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            "SELECT user_id, goal_alerts, card_alerts, match_alerts, news_alerts, \
             ticket_alerts, order_alerts, payment_alerts, push_enabled \
             FROM notification_preferences WHERE user_id = $1",
        )
        .bind(user.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(row.map(NotificationPreferences::from))
    }

    async fn upsert_preferences(
        &self,
        user: UserId,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences, PipelineError> {
        // Fresh rows take lazy-creation defaults for unset fields; existing
        // rows keep their stored values.
        let row = sqlx::query_as::<_, PreferencesRow>(
            "INSERT INTO notification_preferences \
             (user_id, goal_alerts, card_alerts, match_alerts, news_alerts, \
              ticket_alerts, order_alerts, payment_alerts, push_enabled) \
             VALUES ($1, COALESCE($2, TRUE), COALESCE($3, TRUE), COALESCE($4, TRUE), \
                     COALESCE($5, TRUE), COALESCE($6, TRUE), COALESCE($7, TRUE), \
                     COALESCE($8, TRUE), COALESCE($9, FALSE)) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 goal_alerts = COALESCE($2, notification_preferences.goal_alerts), \
                 card_alerts = COALESCE($3, notification_preferences.card_alerts), \
                 match_alerts = COALESCE($4, notification_preferences.match_alerts), \
                 news_alerts = COALESCE($5, notification_preferences.news_alerts), \
                 ticket_alerts = COALESCE($6, notification_preferences.ticket_alerts), \
                 order_alerts = COALESCE($7, notification_preferences.order_alerts), \
                 payment_alerts = COALESCE($8, notification_preferences.payment_alerts), \
                 push_enabled = COALESCE($9, notification_preferences.push_enabled) \
             RETURNING user_id, goal_alerts, card_alerts, match_alerts, news_alerts, \
                       ticket_alerts, order_alerts, payment_alerts, push_enabled",
        )
        .bind(user.as_uuid())
        .bind(patch.goal_alerts)
        .bind(patch.card_alerts)
        .bind(patch.match_alerts)
        .bind(patch.news_alerts)
        .bind(patch.ticket_alerts)
        .bind(patch.order_alerts)
        .bind(patch.payment_alerts)
        .bind(patch.push_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(row.into())
    }
}
