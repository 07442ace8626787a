//! Subscription manager: one live channel per topic, kept alive across
//! transient transport failure.
//!
//! [`SubscriptionManager`] owns the mapping from topic name to channel.
//! Subscribing to a topic that already has a live channel first fully
//! disposes the old one, so a topic never delivers twice. Each channel is
//! driven by a background task that opens the change feed, forwards
//! records into the [`Subscription`] stream, and reconnects with capped
//! exponential backoff on transport faults.
//!
//! Disposal wins every race: the alive flag is re-checked after every
//! suspension point, so a subscription disposed while a backoff timer is
//! pending can never re-open a channel.

pub mod retry;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::{Notify, mpsc, watch};

use crate::feed::{ChangeFeed, ChangeRecord, FilterSpec};

/// Delivery buffer between a channel driver and its subscriber.
const DELIVERY_BUFFER: usize = 64;

/// Connection state of one subscription channel.
///
/// `CONNECTING → SUBSCRIBED ⟲ RECONNECTING → SUBSCRIBED | ABANDONED`;
/// `DISPOSED` is reachable from every state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial handshake in progress.
    Connecting,
    /// Channel live; records flowing.
    Subscribed,
    /// Transport fault seen; backoff timer pending.
    Reconnecting,
    /// Retries exhausted; the topic is silent until re-subscribed.
    Abandoned,
    /// Explicitly disposed; terminal.
    Disposed,
}

impl ConnectionState {
    /// Returns the state as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
            Self::Abandoned => "abandoned",
            Self::Disposed => "disposed",
        }
    }

    /// Returns `true` for the terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Abandoned | Self::Disposed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cloneable disposer for one subscription.
///
/// [`SubscriptionControl::unsubscribe`] is idempotent and safe to call
/// from any state, including mid-backoff.
#[derive(Debug, Clone)]
pub struct SubscriptionControl {
    topic: Arc<str>,
    alive: Arc<AtomicBool>,
    cancel: Arc<Notify>,
}

impl SubscriptionControl {
    fn new(topic: &str) -> Self {
        Self {
            topic: Arc::from(topic),
            alive: Arc::new(AtomicBool::new(true)),
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Topic name this control belongs to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns `true` until the subscription is disposed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Disposes the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            tracing::debug!(topic = %self.topic, "subscription disposed");
        }
        // notify_one stores a permit, so a driver that has not yet reached
        // its cancellation point still observes the disposal.
        self.cancel.notify_one();
    }

    async fn cancelled(&self) {
        self.cancel.notified().await;
    }
}

/// A live subscription: a stream of change records plus connection state.
///
/// Implements [`Stream`]; the reducer folds over it directly. Dropping the
/// `Subscription` without calling [`Subscription::unsubscribe`] leaves the
/// driver running until it notices the closed receiver on the next record.
#[derive(Debug)]
pub struct Subscription {
    control: SubscriptionControl,
    rx: mpsc::Receiver<ChangeRecord>,
    state: watch::Receiver<ConnectionState>,
}

impl Subscription {
    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.control.topic()
    }

    /// Returns a cloneable disposer.
    #[must_use]
    pub fn control(&self) -> SubscriptionControl {
        self.control.clone()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch receiver for connection-state transitions.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disposes the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }

    /// Non-blocking receive for draining buffered records.
    pub fn try_next_buffered(&mut self) -> Option<ChangeRecord> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ChangeRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Owner of all topic channels for one client session.
///
/// Construct one at session scope and pass it to everything that needs to
/// subscribe; drop it (or call [`SubscriptionManager::shutdown`]) at
/// teardown to dispose every channel.
pub struct SubscriptionManager<F> {
    feed: Arc<F>,
    retry: RetryPolicy,
    channels: Mutex<HashMap<String, SubscriptionControl>>,
}

impl<F: ChangeFeed> SubscriptionManager<F> {
    /// Creates a manager over the given feed.
    #[must_use]
    pub fn new(feed: Arc<F>, retry: RetryPolicy) -> Self {
        Self {
            feed,
            retry,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Opens (or replaces) the channel for `topic`.
    ///
    /// A live channel with the same topic name is fully disposed before
    /// the new one is created, so re-subscribing never duplicates
    /// delivery. Topic names must be unique per logical topic; derive them
    /// from the subject's identity (e.g. `match-events:{match_id}`).
    pub fn subscribe(&self, topic: &str, filter: FilterSpec) -> Subscription {
        let control = SubscriptionControl::new(topic);
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        {
            let mut channels = self.channels_lock();
            if let Some(old) = channels.insert(topic.to_string(), control.clone()) {
                tracing::debug!(topic, "replacing live channel");
                old.unsubscribe();
            }
        }

        let driver = ChannelDriver {
            feed: Arc::clone(&self.feed),
            filter,
            control: control.clone(),
            tx,
            state: state_tx,
            retry: self.retry,
        };
        tokio::spawn(driver.run());

        Subscription {
            control,
            rx,
            state: state_rx,
        }
    }

    /// Disposes the channel for `topic`, if any. Returns `true` if one
    /// was live.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let removed = self.channels_lock().remove(topic);
        match removed {
            Some(control) => {
                control.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Number of registered channels (including abandoned ones not yet
    /// replaced).
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels_lock().len()
    }

    /// Disposes every channel.
    pub fn shutdown(&self) {
        let mut channels = self.channels_lock();
        for (_, control) in channels.drain() {
            control.unsubscribe();
        }
    }
}

impl<F> SubscriptionManager<F> {
    fn channels_lock(&self) -> MutexGuard<'_, HashMap<String, SubscriptionControl>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<F> Drop for SubscriptionManager<F> {
    fn drop(&mut self) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, control) in channels.drain() {
            control.unsubscribe();
        }
    }
}

impl<F> fmt::Debug for SubscriptionManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("channels", &self.channels_lock().len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Background task driving one topic channel.
struct ChannelDriver<F> {
    feed: Arc<F>,
    filter: FilterSpec,
    control: SubscriptionControl,
    tx: mpsc::Sender<ChangeRecord>,
    state: watch::Sender<ConnectionState>,
    retry: RetryPolicy,
}

impl<F: ChangeFeed> ChannelDriver<F> {
    async fn run(self) {
        let topic = self.control.topic().to_string();
        // current_retries: scheduled reconnects since the last successful
        // handshake.
        let mut retries: u32 = 0;

        loop {
            if !self.control.is_alive() {
                self.enter(ConnectionState::Disposed);
                return;
            }

            match self.feed.open(&self.filter).await {
                Ok(mut stream) => {
                    if !self.control.is_alive() {
                        self.enter(ConnectionState::Disposed);
                        return;
                    }
                    self.enter(ConnectionState::Subscribed);
                    retries = 0;
                    tracing::debug!(topic = %topic, "channel subscribed");

                    loop {
                        tokio::select! {
                            () = self.control.cancelled() => {
                                self.enter(ConnectionState::Disposed);
                                return;
                            }
                            item = stream.next() => match item {
                                Some(Ok(record)) => {
                                    if !self.control.is_alive() {
                                        self.enter(ConnectionState::Disposed);
                                        return;
                                    }
                                    if self.tx.send(record).await.is_err() {
                                        // Subscriber dropped its receiver.
                                        tracing::debug!(topic = %topic, "subscriber gone; disposing channel");
                                        self.control.unsubscribe();
                                        self.enter(ConnectionState::Disposed);
                                        return;
                                    }
                                }
                                Some(Err(err)) => {
                                    tracing::warn!(topic = %topic, error = %err, "transport fault");
                                    break;
                                }
                                None => {
                                    tracing::debug!(topic = %topic, "feed stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(topic = %topic, error = %err, "subscribe handshake failed");
                }
            }

            if !self.control.is_alive() {
                self.enter(ConnectionState::Disposed);
                return;
            }
            if !self.retry.allows(retries) {
                tracing::warn!(topic = %topic, retries, "retries exhausted; abandoning subscription");
                self.enter(ConnectionState::Abandoned);
                return;
            }

            let delay = self.retry.delay(retries);
            retries += 1;
            self.enter(ConnectionState::Reconnecting);
            tracing::debug!(topic = %topic, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            tokio::select! {
                () = self.control.cancelled() => {
                    self.enter(ConnectionState::Disposed);
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            // The loop head re-checks the alive flag before re-opening, so
            // a disposal that raced the timer still wins.
        }
    }

    fn enter(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::feed::memory::InMemoryFeed;
    use crate::feed::{ChangeRecord, FeedTable};
    use serde_json::json;
    use std::time::Duration;

    fn manager(feed: &Arc<InMemoryFeed>) -> SubscriptionManager<InMemoryFeed> {
        SubscriptionManager::new(Arc::clone(feed), RetryPolicy::default())
    }

    fn filter(match_id: &str) -> FilterSpec {
        FilterSpec::table(FeedTable::MatchEvents).row_eq("match_id", match_id)
    }

    fn record(match_id: &str, minute: u32) -> ChangeRecord {
        ChangeRecord::insert(
            FeedTable::MatchEvents,
            json!({ "match_id": match_id, "minute": minute }),
        )
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        wanted: ConnectionState,
    ) {
        let reached = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if *rx.borrow_and_update() == wanted {
                    return;
                }
                assert!(rx.changed().await.is_ok(), "state channel closed early");
            }
        })
        .await;
        assert!(reached.is_ok(), "timed out waiting for state {wanted}");
    }

    #[tokio::test]
    async fn delivers_matching_records() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let mut sub = manager.subscribe("match-events:m1", filter("m1"));
        let mut state = sub.state_watch();
        wait_for_state(&mut state, ConnectionState::Subscribed).await;

        feed.publish(record("m2", 1));
        feed.publish(record("m1", 2));

        let Some(received) = sub.next().await else {
            panic!("expected a record");
        };
        assert_eq!(
            received.row().and_then(|r| r.get("minute")),
            Some(&json!(2))
        );
    }

    #[tokio::test]
    async fn resubscribe_replaces_old_channel() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);

        let old = manager.subscribe("match-events:m1", filter("m1"));
        let mut old_state = old.state_watch();
        wait_for_state(&mut old_state, ConnectionState::Subscribed).await;

        let new = manager.subscribe("match-events:m1", filter("m1"));
        let mut new_state = new.state_watch();
        wait_for_state(&mut old_state, ConnectionState::Disposed).await;
        wait_for_state(&mut new_state, ConnectionState::Subscribed).await;

        assert!(!old.control().is_alive());
        assert!(new.control().is_alive());
        assert_eq!(manager.channel_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transport_fault() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let mut sub = manager.subscribe("match-events:m1", filter("m1"));
        let mut state = sub.state_watch();
        wait_for_state(&mut state, ConnectionState::Subscribed).await;
        assert_eq!(feed.opens(), 1);

        feed.disconnect_all();
        wait_for_state(&mut state, ConnectionState::Reconnecting).await;
        wait_for_state(&mut state, ConnectionState::Subscribed).await;
        assert_eq!(feed.opens(), 2);

        feed.publish(record("m1", 7));
        let Some(received) = sub.next().await else {
            panic!("expected post-reconnect delivery");
        };
        assert_eq!(received.row().and_then(|r| r.get("minute")), Some(&json!(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_wins_race_with_pending_backoff() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let sub = manager.subscribe("match-events:m1", filter("m1"));
        let mut state = sub.state_watch();
        wait_for_state(&mut state, ConnectionState::Subscribed).await;
        assert_eq!(feed.opens(), 1);

        feed.disconnect_all();
        wait_for_state(&mut state, ConnectionState::Reconnecting).await;

        // Dispose while the backoff timer is pending; the timer firing
        // afterwards must not re-open a channel.
        sub.unsubscribe();
        wait_for_state(&mut state, ConnectionState::Disposed).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(feed.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_after_max_retries() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let sub = manager.subscribe("match-events:m1", filter("m1"));
        let mut state = sub.state_watch();
        wait_for_state(&mut state, ConnectionState::Subscribed).await;

        let faulted_at = tokio::time::Instant::now();
        feed.fail_opens(true);
        feed.disconnect_all();
        wait_for_state(&mut state, ConnectionState::Abandoned).await;

        // Initial open plus three failed retries at 1 s, 2 s, 4 s.
        assert_eq!(feed.opens(), 4);
        assert!(faulted_at.elapsed() >= Duration::from_secs(7));

        // Abandoned is terminal: no further timer is scheduled.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(feed.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_retry_counter() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let sub = manager.subscribe("match-events:m1", filter("m1"));
        let mut state = sub.state_watch();
        wait_for_state(&mut state, ConnectionState::Subscribed).await;

        // Three separate faults, each healed by an immediate reconnect.
        // With the counter resetting on success, none of them abandons.
        for _ in 0..3 {
            feed.disconnect_all();
            wait_for_state(&mut state, ConnectionState::Reconnecting).await;
            wait_for_state(&mut state, ConnectionState::Subscribed).await;
        }
        assert_eq!(feed.opens(), 4);
        assert_eq!(sub.connection_state(), ConnectionState::Subscribed);
    }

    #[tokio::test]
    async fn shutdown_disposes_all_channels() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let a = manager.subscribe("match-events:m1", filter("m1"));
        let b = manager.subscribe("match-events:m2", filter("m2"));
        let mut state_a = a.state_watch();
        let mut state_b = b.state_watch();
        wait_for_state(&mut state_a, ConnectionState::Subscribed).await;
        wait_for_state(&mut state_b, ConnectionState::Subscribed).await;

        manager.shutdown();
        wait_for_state(&mut state_a, ConnectionState::Disposed).await;
        wait_for_state(&mut state_b, ConnectionState::Disposed).await;
        assert_eq!(manager.channel_count(), 0);
    }

    #[tokio::test]
    async fn debug_output_reports_channel_count() {
        let feed = Arc::new(InMemoryFeed::new(64));
        let manager = manager(&feed);
        let _sub = manager.subscribe("match-events:m1", filter("m1"));
        let rendered = format!("{manager:?}");
        assert!(rendered.contains("channels: 1"), "unexpected debug output: {rendered}");
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let control = SubscriptionControl::new("match-events:m1");
        assert!(control.is_alive());
        control.unsubscribe();
        control.unsubscribe();
        assert!(!control.is_alive());
    }
}
