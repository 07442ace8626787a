//! Domain layer: identifiers, match events, match state, and notifications.
//!
//! These are the row shapes that travel through the change feed. The
//! server-side store owns them; everything client-side is an
//! eventually-consistent projection.

pub mod ids;
pub mod match_event;
pub mod match_state;
pub mod notification;

pub use ids::{EventId, MatchId, NotificationId, UserId};
pub use match_event::{MatchEvent, MatchEventType, TeamSide};
pub use match_state::{MatchState, MatchStatus};
pub use notification::{
    Notification, NotificationCategory, NotificationPreferences, NotificationType,
    PreferencesPatch,
};
