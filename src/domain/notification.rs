//! Stored notifications and per-user notification preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{NotificationId, UserId};
use super::match_event::MatchEventType;

/// Classification of a notification.
///
/// The match-event kinds plus the portal's commerce classes. The string
/// form is what the `notifications.notification_type` column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A goal was scored.
    Goal,
    /// A yellow card was shown.
    YellowCard,
    /// A red card was shown.
    RedCard,
    /// A player substitution.
    Substitution,
    /// The match kicked off.
    KickOff,
    /// Half-time break started.
    HalfTime,
    /// The final whistle.
    FullTime,
    /// Free-form commentary line.
    Commentary,
    /// Ticket purchase or availability update.
    Ticket,
    /// A news article was published.
    News,
    /// Merchandise order update.
    Merchandise,
    /// Payment status update.
    Payment,
}

impl NotificationType {
    /// Returns the type as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::YellowCard => "yellow_card",
            Self::RedCard => "red_card",
            Self::Substitution => "substitution",
            Self::KickOff => "kick_off",
            Self::HalfTime => "half_time",
            Self::FullTime => "full_time",
            Self::Commentary => "commentary",
            Self::Ticket => "ticket",
            Self::News => "news",
            Self::Merchandise => "merchandise",
            Self::Payment => "payment",
        }
    }

    /// Parses the string form stored in the database.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "goal" => Some(Self::Goal),
            "yellow_card" => Some(Self::YellowCard),
            "red_card" => Some(Self::RedCard),
            "substitution" => Some(Self::Substitution),
            "kick_off" => Some(Self::KickOff),
            "half_time" => Some(Self::HalfTime),
            "full_time" => Some(Self::FullTime),
            "commentary" => Some(Self::Commentary),
            "ticket" => Some(Self::Ticket),
            "news" => Some(Self::News),
            "merchandise" => Some(Self::Merchandise),
            "payment" => Some(Self::Payment),
            _ => None,
        }
    }

    /// Returns the preference category that gates this type.
    #[must_use]
    pub const fn category(self) -> NotificationCategory {
        match self {
            Self::Goal => NotificationCategory::Goals,
            Self::YellowCard | Self::RedCard => NotificationCategory::Cards,
            Self::Substitution
            | Self::KickOff
            | Self::HalfTime
            | Self::FullTime
            | Self::Commentary => NotificationCategory::MatchStatus,
            Self::Ticket => NotificationCategory::Tickets,
            Self::News => NotificationCategory::News,
            Self::Merchandise => NotificationCategory::Orders,
            Self::Payment => NotificationCategory::Payments,
        }
    }
}

impl From<MatchEventType> for NotificationType {
    fn from(kind: MatchEventType) -> Self {
        match kind {
            MatchEventType::Goal => Self::Goal,
            MatchEventType::YellowCard => Self::YellowCard,
            MatchEventType::RedCard => Self::RedCard,
            MatchEventType::Substitution => Self::Substitution,
            MatchEventType::KickOff => Self::KickOff,
            MatchEventType::HalfTime => Self::HalfTime,
            MatchEventType::FullTime => Self::FullTime,
            MatchEventType::Commentary => Self::Commentary,
        }
    }
}

/// Preference category: one boolean flag per category in
/// [`NotificationPreferences`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    /// Goal alerts.
    Goals,
    /// Yellow and red card alerts.
    Cards,
    /// Kick-off, half-time, full-time, substitutions, commentary.
    MatchStatus,
    /// Published news articles.
    News,
    /// Ticketing updates.
    Tickets,
    /// Merchandise order updates.
    Orders,
    /// Payment status updates.
    Payments,
}

/// A stored notification row, owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Row identity.
    pub id: NotificationId,
    /// Owning user; the only user allowed to mutate or delete the row.
    pub user_id: UserId,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Classification used for routing and preference gating.
    pub notification_type: NotificationType,
    /// Arbitrary structured payload (match id, order id, …).
    pub data: serde_json::Value,
    /// Whether the owning user has read the notification.
    pub is_read: bool,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Creates an unread notification with a fresh identity.
    #[must_use]
    pub fn new(
        user_id: UserId,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            title: title.into(),
            message: message.into(),
            notification_type,
            data,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// Per-user notification preference flags, one row per user.
///
/// Created lazily on first access with [`NotificationPreferences::defaults`]:
/// every alert category enabled, push disabled until the user explicitly
/// grants browser permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Owning user.
    pub user_id: UserId,
    /// Goal alerts.
    pub goal_alerts: bool,
    /// Card alerts.
    pub card_alerts: bool,
    /// Match status alerts (kick-off, half-time, full-time, …).
    pub match_alerts: bool,
    /// News alerts.
    pub news_alerts: bool,
    /// Ticketing alerts.
    pub ticket_alerts: bool,
    /// Merchandise order alerts.
    pub order_alerts: bool,
    /// Payment alerts.
    pub payment_alerts: bool,
    /// Master switch for browser push delivery.
    pub push_enabled: bool,
}

impl NotificationPreferences {
    /// Default flags for a user with no stored row.
    #[must_use]
    pub const fn defaults(user_id: UserId) -> Self {
        Self {
            user_id,
            goal_alerts: true,
            card_alerts: true,
            match_alerts: true,
            news_alerts: true,
            ticket_alerts: true,
            order_alerts: true,
            payment_alerts: true,
            push_enabled: false,
        }
    }

    /// Returns the flag governing the given category.
    #[must_use]
    pub const fn allows(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Goals => self.goal_alerts,
            NotificationCategory::Cards => self.card_alerts,
            NotificationCategory::MatchStatus => self.match_alerts,
            NotificationCategory::News => self.news_alerts,
            NotificationCategory::Tickets => self.ticket_alerts,
            NotificationCategory::Orders => self.order_alerts,
            NotificationCategory::Payments => self.payment_alerts,
        }
    }

    /// Converts the full record into a patch that sets every field.
    #[must_use]
    pub const fn as_patch(&self) -> PreferencesPatch {
        PreferencesPatch {
            goal_alerts: Some(self.goal_alerts),
            card_alerts: Some(self.card_alerts),
            match_alerts: Some(self.match_alerts),
            news_alerts: Some(self.news_alerts),
            ticket_alerts: Some(self.ticket_alerts),
            order_alerts: Some(self.order_alerts),
            payment_alerts: Some(self.payment_alerts),
            push_enabled: Some(self.push_enabled),
        }
    }
}

/// Partial preference update; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    /// Goal alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_alerts: Option<bool>,
    /// Card alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_alerts: Option<bool>,
    /// Match status alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_alerts: Option<bool>,
    /// News alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news_alerts: Option<bool>,
    /// Ticketing alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_alerts: Option<bool>,
    /// Merchandise order alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_alerts: Option<bool>,
    /// Payment alerts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_alerts: Option<bool>,
    /// Push master switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_enabled: Option<bool>,
}

impl PreferencesPatch {
    /// Applies the patch to an existing record, returning the merged result.
    #[must_use]
    pub fn apply_to(&self, prefs: &NotificationPreferences) -> NotificationPreferences {
        NotificationPreferences {
            user_id: prefs.user_id,
            goal_alerts: self.goal_alerts.unwrap_or(prefs.goal_alerts),
            card_alerts: self.card_alerts.unwrap_or(prefs.card_alerts),
            match_alerts: self.match_alerts.unwrap_or(prefs.match_alerts),
            news_alerts: self.news_alerts.unwrap_or(prefs.news_alerts),
            ticket_alerts: self.ticket_alerts.unwrap_or(prefs.ticket_alerts),
            order_alerts: self.order_alerts.unwrap_or(prefs.order_alerts),
            payment_alerts: self.payment_alerts.unwrap_or(prefs.payment_alerts),
            push_enabled: self.push_enabled.unwrap_or(prefs.push_enabled),
        }
    }
}
