//! matchwire demo: replays a scripted match through the full pipeline.
//!
//! Wires the in-memory change feed to a live match view and a logging set
//! of presentation surfaces, then publishes a short match script so the
//! reducer, dispatcher, and preference gating can be watched in the logs.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use matchwire::config::PipelineConfig;
use matchwire::dispatch::{NotificationDispatcher, PushPayload, PushSink, SoundSink, Toast, ToastSink};
use matchwire::domain::{
    MatchEvent, MatchEventType, MatchId, MatchState, MatchStatus, NotificationType,
    PreferencesPatch, TeamSide, UserId,
};
use matchwire::error::PipelineError;
use matchwire::feed::memory::InMemoryFeed;
use matchwire::feed::{ChangeRecord, FeedTable};
use matchwire::live::LiveMatch;
use matchwire::persistence::NotificationStore;
use matchwire::persistence::memory::MemoryNotificationStore;
use matchwire::persistence::postgres::PgNotificationStore;
use matchwire::prefs::PreferenceCache;
use matchwire::subscription::{ConnectionState, SubscriptionManager};

struct LogToast;

impl ToastSink for LogToast {
    fn show(&self, toast: &Toast) {
        tracing::info!(kind = toast.kind.as_str(), title = %toast.title, body = %toast.body, "toast");
    }
}

struct LogSound;

impl SoundSink for LogSound {
    fn play(&self, kind: NotificationType) {
        tracing::info!(kind = kind.as_str(), "sound cue");
    }
}

struct LogPush;

impl PushSink for LogPush {
    fn push(&self, payload: &PushPayload) -> Result<(), PipelineError> {
        tracing::info!(title = %payload.title, body = %payload.body, "push");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_env();
    tracing::info!(
        retention = config.retention_limit,
        max_retries = config.max_retries,
        persistence = config.persistence_enabled,
        "starting matchwire demo"
    );

    if config.persistence_enabled {
        match PgNotificationStore::connect(&config).await {
            Ok(store) => return run_demo(Arc::new(store), &config).await,
            Err(err) => {
                tracing::warn!(error = %err, "database unavailable; falling back to the in-memory store");
            }
        }
    }
    run_demo(Arc::new(MemoryNotificationStore::new()), &config).await
}

async fn run_demo<S: NotificationStore>(
    store: Arc<S>,
    config: &PipelineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let feed = Arc::new(InMemoryFeed::new(config.feed_capacity));
    let manager = SubscriptionManager::new(Arc::clone(&feed), config.retry_policy());

    let prefs = Arc::new(PreferenceCache::new(Arc::clone(&store)));
    let dispatcher = Arc::new(
        NotificationDispatcher::new(
            Arc::clone(&prefs),
            Arc::clone(&store),
            Arc::new(LogToast) as Arc<dyn ToastSink>,
        )
        .with_sound(Arc::new(LogSound) as Arc<dyn SoundSink>)
        .with_push(Arc::new(LogPush) as Arc<dyn PushSink>),
    );

    // The demo fan has push on and card alerts off, so the yellow card
    // below toasts but is never stored or pushed.
    let fan = UserId::new();
    let _ = prefs
        .update(
            fan,
            &PreferencesPatch {
                card_alerts: Some(false),
                push_enabled: Some(true),
                ..PreferencesPatch::default()
            },
        )
        .await;

    let mut state = MatchState::new(MatchId::new());
    let live = LiveMatch::spawn(
        &manager,
        Arc::clone(&dispatcher),
        state.clone(),
        Some(fan),
        config,
        None,
    );

    let mut conn = live.state_watch();
    while *conn.borrow_and_update() != ConnectionState::Subscribed {
        conn.changed().await?;
    }
    let mut state_conn = live.state_connection_watch();
    while *state_conn.borrow_and_update() != ConnectionState::Subscribed {
        state_conn.changed().await?;
    }

    let match_id = live.match_id();
    let script = [
        MatchEvent::new(match_id, MatchEventType::KickOff, 1, "We are under way"),
        MatchEvent::new(match_id, MatchEventType::Goal, 23, "Header from a corner")
            .with_player("D. Okafor")
            .with_team(TeamSide::Home),
        MatchEvent::new(match_id, MatchEventType::YellowCard, 41, "Late challenge in midfield")
            .with_player("R. Sousa")
            .with_team(TeamSide::Away),
        MatchEvent::new(match_id, MatchEventType::FullTime, 90, "Full-time, 1-0"),
    ];

    for event in script {
        let row = serde_json::to_value(&event)?;
        feed.publish(ChangeRecord::insert(FeedTable::MatchEvents, row));

        if event.event_type == MatchEventType::Goal {
            let previous = serde_json::to_value(&state)?;
            state.status = MatchStatus::Live;
            state.home_score = 1;
            state.current_minute = event.event_time;
            let next = serde_json::to_value(&state)?;
            feed.publish(ChangeRecord::update(FeedTable::MatchState, previous, next));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let view = live.match_state();
    tracing::info!(
        home = view.home_score,
        away = view.away_score,
        events = live.events().len(),
        "final view"
    );
    for notification in store.list(fan, 10).await? {
        tracing::info!(
            kind = notification.notification_type.as_str(),
            title = %notification.title,
            "stored notification"
        );
    }

    live.unsubscribe();
    manager.shutdown();
    Ok(())
}
