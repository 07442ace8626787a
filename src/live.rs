//! Live topic views: bounded, self-healing projections of feed topics.
//!
//! A [`LiveTopic`] owns the pump task between one subscription channel and
//! a [`RecentList`] window published through a `watch` channel. The pump
//! decodes raw rows at the edge, folds them into the window, and watches
//! connection-state transitions so it can re-fetch a snapshot after a
//! reconnect gap (records published while the channel was down are gone,
//! not buffered).
//!
//! [`LiveMatch`] composes the two topics a match view needs: the event log
//! (reduced into a commentary window, with each fresh insert handed to the
//! notification dispatcher) and the current match state (validated against
//! the monotonicity rules before being accepted).

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::PipelineConfig;
use crate::dispatch::NotificationDispatcher;
use crate::domain::{MatchEvent, MatchId, MatchState, UserId};
use crate::error::PipelineError;
use crate::feed::{ChangeFeed, ChangeOp, ChangeRecord, FeedTable, FilterSpec};
use crate::persistence::NotificationStore;
use crate::reducer::{Identified, RecentList};
use crate::subscription::{ConnectionState, SubscriptionControl, SubscriptionManager};

/// Fetches the authoritative recent-rows window for a topic, newest first.
///
/// Called after a reconnect gap to replace the local window, since records
/// published while the channel was down were never delivered.
pub type SnapshotFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<Vec<T>, PipelineError>> + Send + Sync>;

/// Side-effect hook invoked for every insert that changed the window.
pub type InsertHook<T> = Box<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional behaviors of a live topic pump.
pub struct TopicHooks<T> {
    /// Snapshot re-fetch after a reconnect gap; `None` tolerates the gap.
    pub snapshot: Option<SnapshotFn<T>>,
    /// Per-insert side effect, e.g. notification dispatch.
    pub on_insert: Option<InsertHook<T>>,
}

impl<T> Default for TopicHooks<T> {
    fn default() -> Self {
        Self {
            snapshot: None,
            on_insert: None,
        }
    }
}

impl<T> fmt::Debug for TopicHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicHooks")
            .field("snapshot", &self.snapshot.is_some())
            .field("on_insert", &self.on_insert.is_some())
            .finish()
    }
}

/// A bounded live view over one feed topic.
pub struct LiveTopic<T> {
    items: watch::Receiver<Vec<T>>,
    state: watch::Receiver<ConnectionState>,
    control: SubscriptionControl,
}

impl<T> LiveTopic<T>
where
    T: Identified + PartialEq + Clone + DeserializeOwned + Send + Sync + 'static,
{
    /// Subscribes to `topic` and spawns the pump task.
    ///
    /// The returned view stays consistent across reconnects; when the
    /// channel is abandoned or disposed the window freezes at its last
    /// contents.
    pub fn spawn<F: ChangeFeed>(
        manager: &SubscriptionManager<F>,
        topic: &str,
        filter: FilterSpec,
        capacity: usize,
        hooks: TopicHooks<T>,
    ) -> Self {
        let sub = manager.subscribe(topic, filter);
        let control = sub.control();
        let state = sub.state_watch();
        let (items_tx, items_rx) = watch::channel(Vec::new());

        let pump = TopicPump {
            sub,
            list: RecentList::new(capacity),
            items: items_tx,
            hooks,
        };
        tokio::spawn(pump.run());

        Self {
            items: items_rx,
            state,
            control,
        }
    }
}

impl<T: Clone> LiveTopic<T> {
    /// Current window contents, newest first.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.items.borrow().clone()
    }

    /// Watch receiver for window updates.
    #[must_use]
    pub fn items_watch(&self) -> watch::Receiver<Vec<T>> {
        self.items.clone()
    }

    /// Current connection state of the underlying channel.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch receiver for connection-state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disposes the underlying channel. Idempotent; dropping the view has
    /// the same effect.
    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }
}

impl<T> Drop for LiveTopic<T> {
    fn drop(&mut self) {
        self.control.unsubscribe();
    }
}

impl<T> fmt::Debug for LiveTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTopic")
            .field("topic", &self.control.topic())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Pump between one subscription and its published window.
struct TopicPump<T> {
    sub: crate::subscription::Subscription,
    list: RecentList<T>,
    items: watch::Sender<Vec<T>>,
    hooks: TopicHooks<T>,
}

impl<T> TopicPump<T>
where
    T: Identified + PartialEq + Clone + DeserializeOwned + Send + Sync + 'static,
{
    async fn run(mut self) {
        let topic = self.sub.topic().to_string();
        let mut state = self.sub.state_watch();
        let mut was_reconnecting = false;

        loop {
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    match current {
                        ConnectionState::Reconnecting => {
                            was_reconnecting = true;
                        }
                        ConnectionState::Subscribed if was_reconnecting => {
                            was_reconnecting = false;
                            self.refetch(&topic).await;
                        }
                        current if current.is_terminal() => {
                            // Apply whatever was delivered before the channel
                            // went down, then freeze the window.
                            let mut changed = false;
                            while let Some(record) = self.sub.try_next_buffered() {
                                changed |= self.fold(&topic, &record).is_some();
                            }
                            if changed {
                                let _ = self.items.send(self.list.snapshot());
                            }
                            break;
                        }
                        _ => {}
                    }
                }
                record = self.sub.next() => {
                    let Some(record) = record else { break };
                    let Some(inserted) = self.fold(&topic, &record) else {
                        continue;
                    };
                    // Side effects first: by the time subscribers observe the
                    // updated window, dispatch for this record has completed.
                    if let Some(row) = inserted
                        && let Some(on_insert) = &self.hooks.on_insert
                    {
                        on_insert(row).await;
                    }
                    let _ = self.items.send(self.list.snapshot());
                }
            }
        }
    }

    /// Decodes and folds one record into the window.
    ///
    /// Returns `None` when the window did not change; otherwise the inner
    /// option carries the decoded row for fresh inserts (the hook's input).
    fn fold(&mut self, topic: &str, record: &ChangeRecord) -> Option<Option<T>> {
        let raw = record.row()?;
        let row: T = match serde_json::from_value(raw.clone()) {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "undecodable row; skipping record");
                return None;
            }
        };
        let inserted = (record.op == ChangeOp::Insert).then(|| row.clone());
        self.list.apply(record.op, row).then_some(inserted)
    }

    async fn refetch(&mut self, topic: &str) {
        let Some(snapshot) = &self.hooks.snapshot else {
            tracing::debug!(topic = %topic, "reconnected without snapshot source; gap tolerated");
            return;
        };
        match snapshot().await {
            Ok(rows) => {
                tracing::debug!(topic = %topic, rows = rows.len(), "window replaced from snapshot");
                self.list.replace_all(rows);
                let _ = self.items.send(self.list.snapshot());
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "snapshot re-fetch failed; keeping stale window");
            }
        }
    }
}

/// The live view of one match: commentary window plus validated state.
pub struct LiveMatch {
    match_id: MatchId,
    events: LiveTopic<MatchEvent>,
    state: watch::Receiver<MatchState>,
    state_connection: watch::Receiver<ConnectionState>,
    state_control: SubscriptionControl,
}

impl LiveMatch {
    /// Subscribes to both match topics and spawns their pumps.
    ///
    /// Every fresh event insert is handed to `dispatcher`; when
    /// `target_user` is set the persisted/push notification path fires for
    /// that user as well. State snapshots that fail validation are logged
    /// and dropped, keeping the previous value. The event window is bounded
    /// by `config.retention_limit`, and `snapshot` is consulted after a
    /// reconnect gap only when `config.refetch_on_reconnect` is set.
    pub fn spawn<F, S>(
        manager: &SubscriptionManager<F>,
        dispatcher: Arc<NotificationDispatcher<S>>,
        initial_state: MatchState,
        target_user: Option<UserId>,
        config: &PipelineConfig,
        snapshot: Option<SnapshotFn<MatchEvent>>,
    ) -> Self
    where
        F: ChangeFeed,
        S: NotificationStore,
    {
        let match_id = initial_state.match_id;
        let snapshot = if config.refetch_on_reconnect {
            snapshot
        } else {
            None
        };

        let on_insert: InsertHook<MatchEvent> = Box::new(move |event| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                dispatcher.dispatch_match_event(&event, target_user).await;
            })
        });
        let events = LiveTopic::spawn(
            manager,
            &format!("match-events:{match_id}"),
            FilterSpec::table(FeedTable::MatchEvents).row_eq("match_id", match_id.to_string()),
            config.retention_limit,
            TopicHooks {
                snapshot,
                on_insert: Some(on_insert),
            },
        );

        let mut state_sub = manager.subscribe(
            &format!("match-state:{match_id}"),
            FilterSpec::table(FeedTable::MatchState).row_eq("match_id", match_id.to_string()),
        );
        let state_control = state_sub.control();
        let state_connection = state_sub.state_watch();
        let (state_tx, state_rx) = watch::channel(initial_state.clone());
        tokio::spawn(async move {
            let mut current = initial_state;
            while let Some(record) = state_sub.next().await {
                let Some(raw) = record.row() else { continue };
                let next: MatchState = match serde_json::from_value(raw.clone()) {
                    Ok(next) => next,
                    Err(err) => {
                        tracing::warn!(match_id = %current.match_id, error = %err, "undecodable state row");
                        continue;
                    }
                };
                match current.apply_update(next) {
                    Ok(()) => {
                        let _ = state_tx.send(current.clone());
                    }
                    Err(err) => {
                        tracing::warn!(match_id = %current.match_id, error = %err, "rejected state snapshot");
                    }
                }
            }
        });

        Self {
            match_id,
            events,
            state: state_rx,
            state_connection,
            state_control,
        }
    }

    /// Match this view follows.
    #[must_use]
    pub const fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// Recent events, newest first.
    #[must_use]
    pub fn events(&self) -> Vec<MatchEvent> {
        self.events.items()
    }

    /// Watch receiver for the event window.
    #[must_use]
    pub fn events_watch(&self) -> watch::Receiver<Vec<MatchEvent>> {
        self.events.items_watch()
    }

    /// Connection state of the event channel.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.events.connection_state()
    }

    /// Watch receiver for event-channel state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.events.state_watch()
    }

    /// Watch receiver for state-channel transitions.
    #[must_use]
    pub fn state_connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_connection.clone()
    }

    /// Last accepted match state.
    #[must_use]
    pub fn match_state(&self) -> MatchState {
        self.state.borrow().clone()
    }

    /// Watch receiver for accepted match-state snapshots.
    #[must_use]
    pub fn match_state_watch(&self) -> watch::Receiver<MatchState> {
        self.state.clone()
    }

    /// Disposes both channels. Idempotent; dropping the view has the same
    /// effect.
    pub fn unsubscribe(&self) {
        self.events.unsubscribe();
        self.state_control.unsubscribe();
    }
}

// The event channel is disposed by the inner view's own drop.
impl Drop for LiveMatch {
    fn drop(&mut self) {
        self.state_control.unsubscribe();
    }
}

impl fmt::Debug for LiveMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveMatch")
            .field("match_id", &self.match_id)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
