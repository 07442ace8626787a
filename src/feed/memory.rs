//! In-process change feed backed by a broadcast channel.
//!
//! [`InMemoryFeed`] plays the role of the managed change feed in tests and
//! local runs: writes are published into a `tokio::broadcast` ring buffer
//! and every open stream receives the records matching its filter. It also
//! carries the fault-injection hooks the reconnect tests need:
//! [`InMemoryFeed::disconnect_all`] drops every open stream with a
//! transport fault, and [`InMemoryFeed::fail_opens`] makes subsequent
//! handshakes fail.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::{broadcast, watch};

use super::{ChangeFeed, ChangeRecord, ChangeStream, FilterSpec};
use crate::error::FeedError;

/// In-process hub implementing [`ChangeFeed`].
///
/// When the ring buffer is full, the oldest records are dropped for
/// lagging receivers, which surfaces as a [`FeedError::Lagged`] transport
/// fault on the affected stream.
pub struct InMemoryFeed {
    tx: broadcast::Sender<ChangeRecord>,
    generation: watch::Sender<u64>,
    opens: AtomicUsize,
    fail_opens: AtomicBool,
}

impl InMemoryFeed {
    /// Creates a new feed with the given ring-buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (generation, _) = watch::channel(0);
        Self {
            tx,
            generation,
            opens: AtomicUsize::new(0),
            fail_opens: AtomicBool::new(false),
        }
    }

    /// Publishes a change record to all open streams.
    ///
    /// Returns the number of receivers the record was delivered to. With
    /// no open streams the record is silently dropped.
    pub fn publish(&self, record: ChangeRecord) -> usize {
        self.tx.send(record).unwrap_or(0)
    }

    /// Simulates a transport failure: every open stream yields one
    /// [`FeedError::ConnectionLost`] and then ends.
    pub fn disconnect_all(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Makes subsequent [`ChangeFeed::open`] calls fail with
    /// [`FeedError::Connect`] until switched off again.
    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Number of handshake attempts so far, including failed ones.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of currently open streams.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

struct StreamState {
    rx: broadcast::Receiver<ChangeRecord>,
    generation: watch::Receiver<u64>,
    filter: FilterSpec,
    faulted: bool,
}

impl ChangeFeed for InMemoryFeed {
    async fn open(&self, filter: &FilterSpec) -> Result<ChangeStream, FeedError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(FeedError::Connect("handshake refused".to_string()));
        }

        let state = StreamState {
            rx: self.tx.subscribe(),
            generation: self.generation.subscribe(),
            filter: filter.clone(),
            faulted: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.faulted {
                return None;
            }
            loop {
                tokio::select! {
                    changed = state.generation.changed() => {
                        state.faulted = true;
                        let err = if changed.is_ok() {
                            FeedError::ConnectionLost
                        } else {
                            FeedError::Closed
                        };
                        return Some((Err(err), state));
                    }
                    msg = state.rx.recv() => match msg {
                        Ok(record) if state.filter.matches(&record) => {
                            return Some((Ok(record), state));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            state.faulted = true;
                            return Some((Err(FeedError::Lagged(n)), state));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed();

        Ok(stream)
    }
}

impl fmt::Debug for InMemoryFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryFeed")
            .field("opens", &self.opens())
            .field("receivers", &self.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::feed::FeedTable;
    use serde_json::json;

    fn record(match_id: &str) -> ChangeRecord {
        ChangeRecord::insert(FeedTable::MatchEvents, json!({ "match_id": match_id }))
    }

    #[test]
    fn publish_without_streams_returns_zero() {
        let feed = InMemoryFeed::new(16);
        assert_eq!(feed.publish(record("m1")), 0);
    }

    #[tokio::test]
    async fn stream_receives_matching_records_only() {
        let feed = InMemoryFeed::new(16);
        let filter = FilterSpec::table(FeedTable::MatchEvents).row_eq("match_id", "m1");
        let stream = feed.open(&filter).await;
        let Ok(mut stream) = stream else {
            panic!("open failed");
        };

        feed.publish(record("m2"));
        feed.publish(record("m1"));

        let item = stream.next().await;
        let Some(Ok(received)) = item else {
            panic!("expected a record");
        };
        assert_eq!(received.row().and_then(|r| r.get("match_id")), Some(&json!("m1")));
    }

    #[tokio::test]
    async fn disconnect_all_faults_open_streams() {
        let feed = InMemoryFeed::new(16);
        let filter = FilterSpec::table(FeedTable::MatchEvents);
        let Ok(mut stream) = feed.open(&filter).await else {
            panic!("open failed");
        };

        feed.disconnect_all();

        assert!(matches!(
            stream.next().await,
            Some(Err(FeedError::ConnectionLost))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn fail_opens_refuses_handshakes() {
        let feed = InMemoryFeed::new(16);
        feed.fail_opens(true);
        let result = feed.open(&FilterSpec::table(FeedTable::MatchEvents)).await;
        assert!(matches!(result, Err(FeedError::Connect(_))));
        assert_eq!(feed.opens(), 1);

        feed.fail_opens(false);
        assert!(feed.open(&FilterSpec::table(FeedTable::MatchEvents)).await.is_ok());
        assert_eq!(feed.opens(), 2);
    }
}
