//! Mutable "current match state" record.
//!
//! [`MatchState`] is mutated server-side by timer logic and admin actions
//! and read by every subscribed client. Clients receive whole-row UPDATE
//! snapshots through the change feed and validate them against the
//! monotonicity invariants before accepting them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::MatchId;
use crate::error::PipelineError;

/// Lifecycle status of a match.
///
/// Transitions are monotonic: `scheduled → live → finished`, with
/// `cancelled` reachable from any non-finished state. `finished` and
/// `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Fixture announced, not yet started.
    Scheduled,
    /// Match in progress.
    Live,
    /// Match over.
    Finished,
    /// Match called off.
    Cancelled,
}

impl MatchStatus {
    /// Returns `true` if a transition from `self` to `next` is allowed.
    ///
    /// A same-status update is always allowed (score/minute changes travel
    /// on the same row).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Scheduled, Self::Scheduled)
            | (Self::Scheduled, Self::Live)
            | (Self::Scheduled, Self::Cancelled)
            | (Self::Live, Self::Live)
            | (Self::Live, Self::Finished)
            | (Self::Live, Self::Cancelled)
            | (Self::Finished, Self::Finished)
            | (Self::Cancelled, Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Returns the status as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one match: scoreline, clock, and lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    /// Match this row describes.
    pub match_id: MatchId,
    /// Home team score.
    pub home_score: u32,
    /// Away team score.
    pub away_score: u32,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Match-clock minute.
    pub current_minute: u32,
    /// Added minutes beyond the regular period.
    pub extra_time: u32,
    /// Whether the server-side match clock is running.
    pub is_timer_active: bool,
    /// Whether the match is in the half-time break.
    pub half_time_break: bool,
}

impl MatchState {
    /// Creates a fresh `scheduled` state with a 0–0 scoreline.
    #[must_use]
    pub const fn new(match_id: MatchId) -> Self {
        Self {
            match_id,
            home_score: 0,
            away_score: 0,
            status: MatchStatus::Scheduled,
            current_minute: 0,
            extra_time: 0,
            is_timer_active: false,
            half_time_break: false,
        }
    }

    /// Validates and applies an incoming whole-row snapshot.
    ///
    /// Rejects status regressions and clock regressions while the timer is
    /// running. The server row is authoritative, so a rejected update means
    /// "keep the previous value and let a later snapshot win".
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStatusTransition`] for a disallowed
    /// status change and [`PipelineError::StaleStateUpdate`] when the match
    /// clock would move backwards while active.
    pub fn apply_update(&mut self, next: Self) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next.status) {
            return Err(PipelineError::InvalidStatusTransition {
                from: self.status,
                to: next.status,
            });
        }
        if self.is_timer_active
            && next.status == self.status
            && next.current_minute < self.current_minute
        {
            return Err(PipelineError::StaleStateUpdate(self.match_id));
        }
        *self = next;
        Ok(())
    }
}
