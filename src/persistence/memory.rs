//! In-memory notification store for tests and local runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use super::NotificationStore;
use crate::domain::{
    Notification, NotificationId, NotificationPreferences, PreferencesPatch, UserId,
};
use crate::error::PipelineError;

/// Map-backed [`NotificationStore`].
///
/// [`MemoryNotificationStore::fail_preferences`] makes the preference
/// operations fail, which is what the dispatcher's fail-open tests need.
#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
    preferences: RwLock<HashMap<UserId, NotificationPreferences>>,
    fail_preferences: AtomicBool,
}

impl MemoryNotificationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent preference reads and writes fail until switched
    /// off again.
    pub fn fail_preferences(&self, fail: bool) {
        self.fail_preferences.store(fail, Ordering::SeqCst);
    }

    /// Total stored notification count, across all users.
    pub async fn notification_count(&self) -> usize {
        self.notifications.read().await.len()
    }

    fn preferences_check(&self) -> Result<(), PipelineError> {
        if self.fail_preferences.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence(
                "preference store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl NotificationStore for MemoryNotificationStore {
    async fn list(&self, user: UserId, limit: i64) -> Result<Vec<Notification>, PipelineError> {
        let notifications = self.notifications.read().await;
        let mut rows: Vec<_> = notifications
            .iter()
            .filter(|n| n.user_id == user)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn insert(&self, notification: &Notification) -> Result<(), PipelineError> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn mark_read(&self, id: NotificationId, user: UserId) -> Result<(), PipelineError> {
        let mut notifications = self.notifications.write().await;
        let row = notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user)
            .ok_or(PipelineError::NotificationNotFound(*id.as_uuid()))?;
        row.is_read = true;
        Ok(())
    }

    async fn delete(&self, id: NotificationId, user: UserId) -> Result<(), PipelineError> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|n| !(n.id == id && n.user_id == user));
        if notifications.len() == before {
            return Err(PipelineError::NotificationNotFound(*id.as_uuid()));
        }
        Ok(())
    }

    async fn get_preferences(
        &self,
        user: UserId,
    ) -> Result<Option<NotificationPreferences>, PipelineError> {
        self.preferences_check()?;
        Ok(self.preferences.read().await.get(&user).cloned())
    }

    async fn upsert_preferences(
        &self,
        user: UserId,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences, PipelineError> {
        self.preferences_check()?;
        let mut preferences = self.preferences.write().await;
        let current = preferences
            .get(&user)
            .cloned()
            .unwrap_or_else(|| NotificationPreferences::defaults(user));
        let merged = patch.apply_to(&current);
        preferences.insert(user, merged.clone());
        Ok(merged)
    }
}

impl fmt::Debug for MemoryNotificationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNotificationStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::NotificationType;

    fn notification(user: UserId) -> Notification {
        Notification::new(user, NotificationType::Goal, "Goal", "1-0", serde_json::json!({}))
    }

    #[tokio::test]
    async fn list_is_scoped_to_user_and_newest_first() {
        let store = MemoryNotificationStore::new();
        let user = UserId::new();
        let other = UserId::new();
        let first = notification(user);
        let mut second = notification(user);
        second.created_at += chrono::Duration::seconds(1);
        let _ = store.insert(&first).await;
        let _ = store.insert(&second).await;
        let _ = store.insert(&notification(other)).await;

        let rows = store.list(user, 10).await.unwrap_or_default();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.first().map(|n| n.id), Some(second.id));
    }

    #[tokio::test]
    async fn mark_read_refuses_foreign_rows() {
        let store = MemoryNotificationStore::new();
        let user = UserId::new();
        let row = notification(user);
        let _ = store.insert(&row).await;

        assert!(matches!(
            store.mark_read(row.id, UserId::new()).await,
            Err(PipelineError::NotificationNotFound(_))
        ));
        assert!(store.mark_read(row.id, user).await.is_ok());
    }

    #[tokio::test]
    async fn upsert_creates_with_defaults_then_patches() {
        let store = MemoryNotificationStore::new();
        let user = UserId::new();

        let created = store
            .upsert_preferences(user, &PreferencesPatch::default())
            .await
            .ok();
        let Some(created) = created else {
            panic!("upsert failed");
        };
        assert!(created.goal_alerts);
        assert!(!created.push_enabled);

        let patch = PreferencesPatch {
            goal_alerts: Some(false),
            ..PreferencesPatch::default()
        };
        let patched = store.upsert_preferences(user, &patch).await.ok();
        let Some(patched) = patched else {
            panic!("patch failed");
        };
        assert!(!patched.goal_alerts);
        assert!(patched.card_alerts);
    }

    #[tokio::test]
    async fn failure_injection_only_hits_preferences() {
        let store = MemoryNotificationStore::new();
        let user = UserId::new();
        store.fail_preferences(true);

        assert!(store.get_preferences(user).await.is_err());
        assert!(store.insert(&notification(user)).await.is_ok());
    }
}
