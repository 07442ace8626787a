//! Pipeline error types.
//!
//! [`PipelineError`] is the central error type of the crate. Nothing in
//! this pipeline is fatal to the host application: every failure path
//! degrades to a logged no-op or a passive connection-state indicator, so
//! these errors carry context for logs rather than for user-facing output.

use crate::domain::{MatchId, MatchStatus};

/// Transport-level fault on a change-feed channel.
///
/// Each variant is recoverable through the subscription reconnect policy;
/// none of them crosses the subscription boundary to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The underlying connection dropped mid-stream.
    #[error("connection lost")]
    ConnectionLost,

    /// Opening the channel (the subscription handshake) failed.
    #[error("subscribe failed: {0}")]
    Connect(String),

    /// The receiver fell behind the hub's ring buffer.
    #[error("receiver lagged by {0} messages")]
    Lagged(u64),

    /// The feed shut down for good; no reconnect will succeed.
    #[error("feed closed")]
    Closed,
}

/// Central error enum for the fan-out pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport fault surfaced by a change-feed stream.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// The browser denied (or revoked) push notification permission.
    #[error("push permission denied")]
    PushPermissionDenied,

    /// Notification or preference store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Notification row missing or not owned by the requesting user.
    #[error("notification not found: {0}")]
    NotificationNotFound(uuid::Uuid),

    /// A payload that should have been JSON failed to parse.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A match-state snapshot would regress the status sequence.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Status currently held.
        from: MatchStatus,
        /// Status the rejected snapshot carried.
        to: MatchStatus,
    },

    /// A match-state snapshot would move the clock backwards while the
    /// timer is active.
    #[error("stale state update for match {0}")]
    StaleStateUpdate(MatchId),
}
