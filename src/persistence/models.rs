//! Database models for notifications and preference rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Notification, NotificationId, NotificationPreferences, NotificationType, UserId,
};
use crate::error::PipelineError;

/// A stored notification row from the `notifications` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRow {
    /// Row identity.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Type discriminator string (e.g. `"goal"`).
    pub notification_type: String,
    /// JSONB payload with notification-specific data.
    pub data: serde_json::Value,
    /// Whether the user has read the notification.
    pub is_read: bool,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl NotificationRow {
    /// Converts the row into the domain type.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedPayload`] when the stored type
    /// discriminator is not a known [`NotificationType`].
    pub fn into_domain(self) -> Result<Notification, PipelineError> {
        let notification_type = NotificationType::parse(&self.notification_type)
            .ok_or_else(|| {
                PipelineError::MalformedPayload(format!(
                    "unknown notification_type {:?}",
                    self.notification_type
                ))
            })?;
        Ok(Notification {
            id: NotificationId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            title: self.title,
            message: self.message,
            notification_type,
            data: self.data,
            is_read: self.is_read,
            created_at: self.created_at,
        })
    }
}

/// A preference row from the `notification_preferences` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PreferencesRow {
    /// Owning user; also the table's primary key.
    pub user_id: Uuid,
    /// Goal alerts.
    pub goal_alerts: bool,
    /// Card alerts.
    pub card_alerts: bool,
    /// Match status alerts.
    pub match_alerts: bool,
    /// News alerts.
    pub news_alerts: bool,
    /// Ticketing alerts.
    pub ticket_alerts: bool,
    /// Merchandise order alerts.
    pub order_alerts: bool,
    /// Payment alerts.
    pub payment_alerts: bool,
    /// Push master switch.
    pub push_enabled: bool,
}

impl From<PreferencesRow> for NotificationPreferences {
    fn from(row: PreferencesRow) -> Self {
        Self {
            user_id: UserId::from_uuid(row.user_id),
            goal_alerts: row.goal_alerts,
            card_alerts: row.card_alerts,
            match_alerts: row.match_alerts,
            news_alerts: row.news_alerts,
            ticket_alerts: row.ticket_alerts,
            order_alerts: row.order_alerts,
            payment_alerts: row.payment_alerts,
            push_enabled: row.push_enabled,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn row(kind: &str) -> NotificationRow {
        NotificationRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Goal".to_string(),
            message: "1-0".to_string(),
            notification_type: kind.to_string(),
            data: serde_json::json!({}),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn known_type_converts() {
        let converted = row("goal").into_domain();
        let Ok(notification) = converted else {
            panic!("conversion failed");
        };
        assert_eq!(notification.notification_type, NotificationType::Goal);
    }

    #[test]
    fn unknown_type_is_malformed() {
        assert!(matches!(
            row("telepathy").into_domain(),
            Err(PipelineError::MalformedPayload(_))
        ));
    }
}
