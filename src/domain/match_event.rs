//! Match event rows from the append-only event store.
//!
//! A [`MatchEvent`] is created by privileged admin actions when something
//! happens on the pitch (goal, card, substitution, status change) and is
//! immutable afterwards except for rare admin corrections, which arrive
//! through the change feed as UPDATE or DELETE records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, MatchId};

/// Kind of on-pitch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEventType {
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
}

impl MatchEventType {
    /// Returns the event type as a static string slice.
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
        }
    }
}

/// Which side of the fixture an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    /// The home team.
    Home,
    /// The away team.
    Away,
}

/// A single row in the append-only match event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Row identity; the reducer's deduplication key.
    pub id: EventId,
    /// Match this event belongs to.
    pub match_id: MatchId,
    /// Kind of event.
    pub event_type: MatchEventType,
    /// Match-clock minute the event occurred at.
    pub event_time: u32,
    /// Human-readable description shown in the commentary feed.
    pub description: String,
    /// Player involved, when applicable.
    pub player_name: Option<String>,
    /// Side the event is attributed to, when applicable.
    pub team: Option<TeamSide>,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl MatchEvent {
    /// Creates an event with a fresh identity and the current timestamp.
    #[must_use]
    pub fn new(
        match_id: MatchId,
        event_type: MatchEventType,
        event_time: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            match_id,
            event_type,
            event_time,
            description: description.into(),
            player_name: None,
            team: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the player name.
    #[must_use]
    pub fn with_player(mut self, player: impl Into<String>) -> Self {
        self.player_name = Some(player.into());
        self
    }

    /// Sets the team side.
    #[must_use]
    pub const fn with_team(mut self, team: TeamSide) -> Self {
        self.team = Some(team);
        self
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings() {
        assert_eq!(MatchEventType::Goal.as_str(), "goal");
        assert_eq!(MatchEventType::YellowCard.as_str(), "yellow_card");
        assert_eq!(MatchEventType::FullTime.as_str(), "full_time");
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        let event = MatchEvent::new(MatchId::new(), MatchEventType::RedCard, 88, "sent off")
            .with_player("N. Ramirez")
            .with_team(TeamSide::Away);
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("red_card"));
        assert!(json.contains("away"));
    }

    #[test]
    fn row_round_trips_through_json() {
        let event = MatchEvent::new(MatchId::new(), MatchEventType::Goal, 12, "header from a corner");
        let value = serde_json::to_value(&event).unwrap_or_default();
        let back: MatchEvent = serde_json::from_value(value).ok().unwrap_or_else(|| {
            panic!("deserialization failed");
        });
        assert_eq!(event, back);
    }
}
