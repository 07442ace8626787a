//! # matchwire
//!
//! Realtime match-event fan-out and notification pipeline for a football
//! fan portal.
//!
//! The backend data store emits a change record for every write to a
//! watched table. This crate subscribes to those records, keeps a bounded
//! live view of each match (recent events plus validated current state),
//! and fans the interesting ones out to presentation surfaces: in-session
//! toasts, sound cues, and stored/push notifications filtered through
//! per-user preferences.
//!
//! ## Architecture
//!
//! ```text
//! Change feed (feed/)
//!     │
//!     ├── SubscriptionManager (subscription/)
//!     │       one reconnecting channel per topic
//!     │
//!     ├── LiveTopic / LiveMatch (live.rs)
//!     │       RecentList reducer (reducer.rs)
//!     │       MatchState validation (domain/)
//!     │
//!     ├── NotificationDispatcher (dispatch/)
//!     │       PreferenceCache (prefs.rs)
//!     │
//!     └── NotificationStore (persistence/)
//!             PostgreSQL or in-memory
//! ```

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod feed;
pub mod live;
pub mod persistence;
pub mod prefs;
pub mod reducer;
pub mod subscription;
