//! Notification dispatcher: routes domain events to presentation surfaces.
//!
//! For each inbound event the dispatcher decides which surfaces fire:
//! an in-session toast (for anyone currently viewing the match), a sound
//! cue, and a persisted notification with optional browser push (for the
//! specific user being notified). The two audiences are gated
//! differently: high-importance toasts always fire, while the persisted
//! and push paths are filtered through the user's
//! [`NotificationPreferences`]. Presentation surfaces are injected
//! dependencies, never hard-wired.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{MatchEvent, NotificationType, TeamSide, UserId};
use crate::domain::Notification;
use crate::error::PipelineError;
use crate::persistence::NotificationStore;
use crate::prefs::PreferenceCache;

/// Importance class of a notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    /// Always toasts, regardless of preference flags.
    High,
    /// Fires only the surfaces its policy names.
    Normal,
}

/// Which presentation surfaces a notification type reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfacePolicy {
    /// In-session toast for active viewers.
    pub toast: bool,
    /// Sound cue alongside the toast.
    pub sound: bool,
    /// Browser push (and stored notification) for the targeted user.
    pub push: bool,
}

/// Returns the importance class for a notification type.
///
/// Goals, red cards, and the final whistle always produce a toast.
#[must_use]
pub const fn importance_of(kind: NotificationType) -> Importance {
    match kind {
        NotificationType::Goal | NotificationType::RedCard | NotificationType::FullTime => {
            Importance::High
        }
        _ => Importance::Normal,
    }
}

/// Returns the surface policy for a notification type.
#[must_use]
pub const fn policy_for(kind: NotificationType) -> SurfacePolicy {
    match kind {
        NotificationType::Goal => SurfacePolicy {
            toast: true,
            sound: true,
            push: true,
        },
        NotificationType::RedCard | NotificationType::FullTime => SurfacePolicy {
            toast: true,
            sound: false,
            push: true,
        },
        NotificationType::YellowCard
        | NotificationType::Substitution
        | NotificationType::KickOff
        | NotificationType::HalfTime => SurfacePolicy {
            toast: true,
            sound: false,
            push: false,
        },
        NotificationType::Commentary => SurfacePolicy {
            toast: false,
            sound: false,
            push: false,
        },
        NotificationType::Ticket
        | NotificationType::News
        | NotificationType::Merchandise
        | NotificationType::Payment => SurfacePolicy {
            toast: true,
            sound: false,
            push: true,
        },
    }
}

/// In-session toast content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    /// Short headline.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Classification, for styling and icons.
    pub kind: NotificationType,
}

/// Browser push notification fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Badge URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Collapse tag: pushes with the same tag replace each other.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Structured payload used for click routing.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PushPayload {
    /// Parses a raw push payload, falling back to plain text.
    ///
    /// A malformed JSON payload must never crash the dispatcher: the raw
    /// bytes become the body of a generic notification instead.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "malformed push payload; falling back to text");
                Self {
                    title: "Notification".to_string(),
                    body: raw.to_string(),
                    icon: None,
                    badge: None,
                    tag: None,
                    data: serde_json::Value::Null,
                }
            }
        }
    }

    /// Maps the payload to the view a click should open.
    #[must_use]
    pub fn target_url(&self, kind: NotificationType) -> String {
        let data = &self.data;
        let id_from = |key: &str| -> Option<&str> { data.get(key).and_then(|v| v.as_str()) };
        match kind {
            NotificationType::Goal
            | NotificationType::YellowCard
            | NotificationType::RedCard
            | NotificationType::Substitution
            | NotificationType::KickOff
            | NotificationType::HalfTime
            | NotificationType::FullTime
            | NotificationType::Commentary => match id_from("match_id") {
                Some(id) => format!("/matches/{id}"),
                None => "/matches".to_string(),
            },
            NotificationType::Ticket => match id_from("ticket_id") {
                Some(id) => format!("/tickets/{id}"),
                None => "/tickets".to_string(),
            },
            NotificationType::News => match id_from("article_id") {
                Some(id) => format!("/news/{id}"),
                None => "/news".to_string(),
            },
            NotificationType::Merchandise | NotificationType::Payment => {
                match id_from("order_id") {
                    Some(id) => format!("/shop/orders/{id}"),
                    None => "/shop/orders".to_string(),
                }
            }
        }
    }
}

/// In-session toast surface.
pub trait ToastSink: Send + Sync {
    /// Shows a toast to the active viewer.
    fn show(&self, toast: &Toast);
}

/// Sound cue surface.
pub trait SoundSink: Send + Sync {
    /// Plays the cue for the given notification type.
    fn play(&self, kind: NotificationType);
}

/// Browser push surface.
pub trait PushSink: Send + Sync {
    /// Displays a push notification.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::PushPermissionDenied`] when the browser
    /// permission is missing or revoked.
    fn push(&self, payload: &PushPayload) -> Result<(), PipelineError>;
}

/// Routes inbound events to presentation surfaces.
pub struct NotificationDispatcher<S> {
    prefs: Arc<PreferenceCache<S>>,
    store: Arc<S>,
    toast: Arc<dyn ToastSink>,
    sound: Option<Arc<dyn SoundSink>>,
    push: Option<Arc<dyn PushSink>>,
    permission_reported: AtomicBool,
}

impl<S: NotificationStore> NotificationDispatcher<S> {
    /// Creates a dispatcher with a toast surface only.
    #[must_use]
    pub fn new(prefs: Arc<PreferenceCache<S>>, store: Arc<S>, toast: Arc<dyn ToastSink>) -> Self {
        Self {
            prefs,
            store,
            toast,
            sound: None,
            push: None,
            permission_reported: AtomicBool::new(false),
        }
    }

    /// Adds a sound surface.
    #[must_use]
    pub fn with_sound(mut self, sound: Arc<dyn SoundSink>) -> Self {
        self.sound = Some(sound);
        self
    }

    /// Adds a push surface.
    #[must_use]
    pub fn with_push(mut self, push: Arc<dyn PushSink>) -> Self {
        self.push = Some(push);
        self
    }

    /// Dispatches one match event.
    ///
    /// The toast/sound path fires for the current session unconditionally
    /// (subject to the type's policy); the persisted/push path fires for
    /// `target_user`, filtered through their preferences.
    pub async fn dispatch_match_event(&self, event: &MatchEvent, target_user: Option<UserId>) {
        let kind = NotificationType::from(event.event_type);
        let policy = policy_for(kind);

        if policy.toast || importance_of(kind) == Importance::High {
            let toast = Toast {
                title: headline(event),
                body: event.description.clone(),
                kind,
            };
            self.toast.show(&toast);
            if policy.sound
                && let Some(sound) = &self.sound
            {
                sound.play(kind);
            }
        }

        if let Some(user) = target_user {
            let data = serde_json::json!({
                "match_id": event.match_id.to_string(),
                "event_id": event.id.to_string(),
                "minute": event.event_time,
            });
            self.notify_user(user, kind, headline(event), event.description.clone(), data)
                .await;
        }
    }

    /// Persists a notification for `user` and pushes it, subject to their
    /// preference flags. Fails open when the preference store is down.
    /// A denied push permission surfaces one explanatory toast per
    /// dispatcher; other push failures only log.
    pub async fn notify_user(
        &self,
        user: UserId,
        kind: NotificationType,
        title: String,
        message: String,
        data: serde_json::Value,
    ) {
        let prefs = self.prefs.get(user).await;
        if !prefs.allows(kind.category()) {
            tracing::debug!(user = %user, kind = kind.as_str(), "notification suppressed by preference");
            return;
        }

        let notification = Notification::new(user, kind, title, message, data);
        if let Err(err) = self.store.insert(&notification).await {
            tracing::warn!(user = %user, error = %err, "failed to persist notification");
        }

        let policy = policy_for(kind);
        if policy.push
            && prefs.push_enabled
            && let Some(push) = &self.push
        {
            let payload = PushPayload {
                title: notification.title.clone(),
                body: notification.message.clone(),
                icon: None,
                badge: None,
                tag: Some(kind.as_str().to_string()),
                data: notification.data.clone(),
            };
            match push.push(&payload) {
                Ok(()) => {}
                Err(PipelineError::PushPermissionDenied) => {
                    // A denied permission is explained to the user once;
                    // re-requesting it is up to them, not the dispatcher.
                    if !self.permission_reported.swap(true, Ordering::SeqCst) {
                        tracing::warn!(user = %user, "push permission denied");
                        self.toast.show(&Toast {
                            title: "Notifications blocked".to_string(),
                            body: "Enable notifications in your browser settings to receive push alerts."
                                .to_string(),
                            kind,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(user = %user, error = %err, "push delivery failed");
                }
            }
        }
    }
}

impl<S> fmt::Debug for NotificationDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sound", &self.sound.is_some())
            .field("push", &self.push.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the toast headline for a match event.
fn headline(event: &MatchEvent) -> String {
    let side = match event.team {
        Some(TeamSide::Home) => " for the home side",
        Some(TeamSide::Away) => " for the away side",
        None => "",
    };
    match event.event_type {
        crate::domain::MatchEventType::Goal => format!("Goal{side}!"),
        crate::domain::MatchEventType::YellowCard => "Yellow card".to_string(),
        crate::domain::MatchEventType::RedCard => "Red card".to_string(),
        crate::domain::MatchEventType::Substitution => "Substitution".to_string(),
        crate::domain::MatchEventType::KickOff => "Kick-off".to_string(),
        crate::domain::MatchEventType::HalfTime => "Half-time".to_string(),
        crate::domain::MatchEventType::FullTime => "Full-time".to_string(),
        crate::domain::MatchEventType::Commentary => "Commentary".to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{MatchEventType, MatchId, PreferencesPatch};
    use crate::persistence::memory::MemoryNotificationStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingToast {
        shown: Mutex<Vec<Toast>>,
    }

    impl ToastSink for RecordingToast {
        fn show(&self, toast: &Toast) {
            if let Ok(mut shown) = self.shown.lock() {
                shown.push(toast.clone());
            }
        }
    }

    #[derive(Default)]
    struct RecordingPush {
        sent: Mutex<Vec<PushPayload>>,
        deny: bool,
        fail: bool,
    }

    impl PushSink for RecordingPush {
        fn push(&self, payload: &PushPayload) -> Result<(), PipelineError> {
            if self.deny {
                return Err(PipelineError::PushPermissionDenied);
            }
            if self.fail {
                return Err(PipelineError::Persistence("push service down".to_string()));
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(payload.clone());
            }
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryNotificationStore>,
        prefs: Arc<PreferenceCache<MemoryNotificationStore>>,
        toast: Arc<RecordingToast>,
        push: Arc<RecordingPush>,
        dispatcher: NotificationDispatcher<MemoryNotificationStore>,
    }

    fn fixture(deny_push: bool) -> Fixture {
        fixture_with(RecordingPush {
            deny: deny_push,
            ..RecordingPush::default()
        })
    }

    fn fixture_with(push: RecordingPush) -> Fixture {
        let store = Arc::new(MemoryNotificationStore::new());
        let prefs = Arc::new(PreferenceCache::new(Arc::clone(&store)));
        let toast = Arc::new(RecordingToast::default());
        let push = Arc::new(push);
        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&prefs),
            Arc::clone(&store),
            Arc::clone(&toast) as Arc<dyn ToastSink>,
        )
        .with_push(Arc::clone(&push) as Arc<dyn PushSink>);
        Fixture {
            store,
            prefs,
            toast,
            push,
            dispatcher,
        }
    }

    fn goal(match_id: MatchId) -> MatchEvent {
        MatchEvent::new(match_id, MatchEventType::Goal, 23, "low drive into the corner")
            .with_team(TeamSide::Home)
    }

    #[test]
    fn high_importance_types_are_classified() {
        assert_eq!(importance_of(NotificationType::Goal), Importance::High);
        assert_eq!(importance_of(NotificationType::FullTime), Importance::High);
        assert_eq!(importance_of(NotificationType::YellowCard), Importance::Normal);
    }

    #[test]
    fn goal_policy_is_toast_sound_push() {
        let policy = policy_for(NotificationType::Goal);
        assert!(policy.toast && policy.sound && policy.push);
        assert!(!policy_for(NotificationType::Commentary).toast);
        assert!(!policy_for(NotificationType::KickOff).push);
    }

    #[tokio::test]
    async fn disabled_category_suppresses_persisted_and_push_but_not_toast() {
        let f = fixture(false);
        let user = UserId::new();
        // Preference gating: goal alerts off, push on.
        let _ = f
            .prefs
            .update(
                user,
                &PreferencesPatch {
                    goal_alerts: Some(false),
                    push_enabled: Some(true),
                    ..PreferencesPatch::default()
                },
            )
            .await;

        f.dispatcher
            .dispatch_match_event(&goal(MatchId::new()), Some(user))
            .await;

        // Same-session toast still fires for the active viewer.
        let toasts = f.toast.shown.lock().map(|s| s.len()).unwrap_or(0);
        assert_eq!(toasts, 1);
        // No stored notification, no push for the suppressed user.
        assert_eq!(f.store.notification_count().await, 0);
        let pushes = f.push.sent.lock().map(|s| s.len()).unwrap_or(0);
        assert_eq!(pushes, 0);
    }

    #[tokio::test]
    async fn enabled_category_persists_and_pushes() {
        let f = fixture(false);
        let user = UserId::new();
        let _ = f
            .prefs
            .update(
                user,
                &PreferencesPatch {
                    push_enabled: Some(true),
                    ..PreferencesPatch::default()
                },
            )
            .await;

        f.dispatcher
            .dispatch_match_event(&goal(MatchId::new()), Some(user))
            .await;

        assert_eq!(f.store.notification_count().await, 1);
        let pushes = f.push.sent.lock().map(|s| s.len()).unwrap_or(0);
        assert_eq!(pushes, 1);
    }

    #[tokio::test]
    async fn push_disabled_by_default_suppresses_push_only() {
        let f = fixture(false);
        let user = UserId::new();

        f.dispatcher
            .dispatch_match_event(&goal(MatchId::new()), Some(user))
            .await;

        assert_eq!(f.store.notification_count().await, 1);
        let pushes = f.push.sent.lock().map(|s| s.len()).unwrap_or(0);
        assert_eq!(pushes, 0);
    }

    #[tokio::test]
    async fn preference_store_failure_fails_open() {
        let f = fixture(false);
        let user = UserId::new();
        f.store.fail_preferences(true);

        f.dispatcher
            .dispatch_match_event(&goal(MatchId::new()), Some(user))
            .await;

        // Lookup failed, so the event is not silently dropped.
        assert_eq!(f.store.notification_count().await, 1);
    }

    #[tokio::test]
    async fn permission_denied_never_propagates() {
        let f = fixture(true);
        let user = UserId::new();
        let _ = f
            .prefs
            .update(
                user,
                &PreferencesPatch {
                    push_enabled: Some(true),
                    ..PreferencesPatch::default()
                },
            )
            .await;

        // Two dispatches; neither panics and the notification path still
        // persists.
        for _ in 0..2 {
            f.dispatcher
                .dispatch_match_event(&goal(MatchId::new()), Some(user))
                .await;
        }
        assert_eq!(f.store.notification_count().await, 2);

        // Two goal toasts plus exactly one "Notifications blocked"
        // explainer, no matter how many pushes were denied.
        let Ok(shown) = f.toast.shown.lock() else {
            panic!("toast lock poisoned");
        };
        assert_eq!(shown.len(), 3);
        let explainers = shown
            .iter()
            .filter(|t| t.title == "Notifications blocked")
            .count();
        assert_eq!(explainers, 1);
    }

    #[tokio::test]
    async fn transient_push_failure_does_not_show_the_permission_explainer() {
        let f = fixture_with(RecordingPush {
            fail: true,
            ..RecordingPush::default()
        });
        let user = UserId::new();
        let _ = f
            .prefs
            .update(
                user,
                &PreferencesPatch {
                    push_enabled: Some(true),
                    ..PreferencesPatch::default()
                },
            )
            .await;

        for _ in 0..2 {
            f.dispatcher
                .dispatch_match_event(&goal(MatchId::new()), Some(user))
                .await;
        }

        assert_eq!(f.store.notification_count().await, 2);
        let Ok(shown) = f.toast.shown.lock() else {
            panic!("toast lock poisoned");
        };
        assert!(shown.iter().all(|t| t.title != "Notifications blocked"));
    }

    #[test]
    fn malformed_push_payload_falls_back_to_text() {
        let payload = PushPayload::from_raw("{not json");
        assert_eq!(payload.title, "Notification");
        assert_eq!(payload.body, "{not json");

        let parsed = PushPayload::from_raw(r#"{"title":"Goal!","body":"1-0"}"#);
        assert_eq!(parsed.title, "Goal!");
    }

    #[test]
    fn click_routing_maps_types_to_views() {
        let payload = PushPayload {
            title: String::new(),
            body: String::new(),
            icon: None,
            badge: None,
            tag: None,
            data: serde_json::json!({ "match_id": "m-1", "order_id": "o-9" }),
        };
        assert_eq!(payload.target_url(NotificationType::Goal), "/matches/m-1");
        assert_eq!(
            payload.target_url(NotificationType::Merchandise),
            "/shop/orders/o-9"
        );
        assert_eq!(payload.target_url(NotificationType::News), "/news");
    }

    #[test]
    fn headline_mentions_the_scoring_side() {
        let event = goal(MatchId::new());
        assert_eq!(headline(&event), "Goal for the home side!");
    }
}
