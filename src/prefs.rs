//! Client-side preference cache.
//!
//! A read-through cache over the server preference record. Updates are
//! optimistic: the local value changes immediately and the server write
//! happens behind it; each cached value is tagged with its reconciliation
//! state so callers can tell a confirmed record from an optimistic or
//! failed one. Conflicts are resolved by last-write-wins on the next
//! read-through.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{NotificationPreferences, PreferencesPatch, UserId};
use crate::persistence::NotificationStore;

/// Reconciliation state of one cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState<T> {
    /// Applied locally; the server write has not completed yet.
    Pending(T),
    /// Matches the last value the server returned.
    Confirmed(T),
    /// Applied locally, but the server write failed; kept stale-but-available.
    Failed(T),
}

impl<T> CacheState<T> {
    /// Returns the cached value regardless of state.
    pub const fn value(&self) -> &T {
        match self {
            Self::Pending(value) | Self::Confirmed(value) | Self::Failed(value) => value,
        }
    }

    /// Returns `true` if the value matches server truth.
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Read-through cache over a user's [`NotificationPreferences`].
pub struct PreferenceCache<S> {
    store: Arc<S>,
    entries: Mutex<HashMap<UserId, CacheState<NotificationPreferences>>>,
}

impl<S: NotificationStore> PreferenceCache<S> {
    /// Creates an empty cache over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the user's preferences, reading through to the store on a
    /// cache miss.
    ///
    /// A user with no stored row gets [`NotificationPreferences::defaults`],
    /// persisted lazily. A store failure also yields the defaults — the
    /// dispatcher fails open rather than silently dropping events — but the
    /// failure is logged and the defaults are not cached, so the next call
    /// retries the store.
    pub async fn get(&self, user: UserId) -> NotificationPreferences {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&user) {
            return entry.value().clone();
        }

        match self.store.get_preferences(user).await {
            Ok(Some(prefs)) => {
                entries.insert(user, CacheState::Confirmed(prefs.clone()));
                prefs
            }
            Ok(None) => {
                let defaults = NotificationPreferences::defaults(user);
                match self.store.upsert_preferences(user, &defaults.as_patch()).await {
                    Ok(created) => {
                        entries.insert(user, CacheState::Confirmed(created.clone()));
                        created
                    }
                    Err(err) => {
                        tracing::warn!(user = %user, error = %err, "failed to persist default preferences");
                        entries.insert(user, CacheState::Failed(defaults.clone()));
                        defaults
                    }
                }
            }
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "preference lookup failed; defaulting to notify");
                NotificationPreferences::defaults(user)
            }
        }
    }

    /// Applies a partial update optimistically and persists it.
    ///
    /// The local value changes before the store write; on success the
    /// server's record overwrites it (Confirmed), on failure the
    /// optimistic value is kept (Failed) and a warning is logged — the UI
    /// never rolls back.
    pub async fn update(&self, user: UserId, patch: &PreferencesPatch) -> NotificationPreferences {
        let current = self.get(user).await;
        let optimistic = patch.apply_to(&current);
        self.entries
            .lock()
            .await
            .insert(user, CacheState::Pending(optimistic.clone()));

        match self.store.upsert_preferences(user, patch).await {
            Ok(confirmed) => {
                self.entries
                    .lock()
                    .await
                    .insert(user, CacheState::Confirmed(confirmed.clone()));
                confirmed
            }
            Err(err) => {
                tracing::warn!(user = %user, error = %err, "preference write failed; keeping optimistic value");
                self.entries
                    .lock()
                    .await
                    .insert(user, CacheState::Failed(optimistic.clone()));
                optimistic
            }
        }
    }

    /// Drops the cached entry so the next read goes back to the store.
    pub async fn invalidate(&self, user: UserId) {
        self.entries.lock().await.remove(&user);
    }

    /// Returns the cached entry and its reconciliation state, if any.
    pub async fn state(&self, user: UserId) -> Option<CacheState<NotificationPreferences>> {
        self.entries.lock().await.get(&user).cloned()
    }
}

impl<S> fmt::Debug for PreferenceCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryNotificationStore;

    fn cache() -> (Arc<MemoryNotificationStore>, PreferenceCache<MemoryNotificationStore>) {
        let store = Arc::new(MemoryNotificationStore::new());
        let cache = PreferenceCache::new(Arc::clone(&store));
        (store, cache)
    }

    #[tokio::test]
    async fn first_access_creates_and_persists_defaults() {
        let (store, cache) = cache();
        let user = UserId::new();

        let prefs = cache.get(user).await;
        assert!(prefs.goal_alerts);
        assert!(!prefs.push_enabled);

        // The defaults are now server truth.
        let stored = store.get_preferences(user).await.unwrap_or_default();
        assert_eq!(stored, Some(prefs));
        assert!(matches!(cache.state(user).await, Some(state) if state.is_confirmed()));
    }

    #[tokio::test]
    async fn store_failure_fails_open_without_caching() {
        let (store, cache) = cache();
        let user = UserId::new();
        store.fail_preferences(true);

        let prefs = cache.get(user).await;
        assert!(prefs.goal_alerts);
        assert!(cache.state(user).await.is_none());

        // Store recovers; next read goes through and caches.
        store.fail_preferences(false);
        let _ = cache.get(user).await;
        assert!(cache.state(user).await.is_some());
    }

    #[tokio::test]
    async fn update_confirms_against_server_truth() {
        let (_, cache) = cache();
        let user = UserId::new();
        let patch = PreferencesPatch {
            goal_alerts: Some(false),
            ..PreferencesPatch::default()
        };

        let updated = cache.update(user, &patch).await;
        assert!(!updated.goal_alerts);
        assert!(matches!(cache.state(user).await, Some(state) if state.is_confirmed()));
    }

    #[tokio::test]
    async fn failed_update_keeps_optimistic_value() {
        let (store, cache) = cache();
        let user = UserId::new();
        let _ = cache.get(user).await;

        store.fail_preferences(true);
        let patch = PreferencesPatch {
            card_alerts: Some(false),
            ..PreferencesPatch::default()
        };
        let updated = cache.update(user, &patch).await;
        assert!(!updated.card_alerts);

        let Some(CacheState::Failed(kept)) = cache.state(user).await else {
            panic!("expected a failed entry");
        };
        assert!(!kept.card_alerts);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let (store, cache) = cache();
        let user = UserId::new();
        let _ = cache.get(user).await;

        // Server-side change happens behind the cache's back.
        let patch = PreferencesPatch {
            news_alerts: Some(false),
            ..PreferencesPatch::default()
        };
        let _ = store.upsert_preferences(user, &patch).await;
        assert!(cache.get(user).await.news_alerts);

        cache.invalidate(user).await;
        assert!(!cache.get(user).await.news_alerts);
    }
}
