//! Stream Monitor service implementation.
//!
//! The StreamMonitor runs one reconciliation tick: it reads the subscribed
//! channel set, checks it upstream in batches, diffs the answer against the
//! session tracker, fans out go-live notifications, counts sessions for the
//! leaderboard and persists the new live set.
//!
//! Ordering within a tick:
//! 1. Everything that can fail on storage (channel list, subscriber lookup)
//!    happens before the first delivery, so an aborted tick changes nothing.
//! 2. A new session is dispatched, then counted, then marked notified.
//! 3. State is committed and persisted before the tick releases the
//!    tracker, so the next tick always starts from it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::{LiveSessionRepository, SubscriptionRepository};
use crate::domain::{ChannelName, Subscriber};
use crate::leaderboard::LeaderboardAggregator;
use crate::notification::{NotificationCleanup, NotificationDispatcher};

use super::backoff::UpstreamBackoff;
use super::batch_detector::BatchDetector;
use super::events::{MonitorEvent, MonitorEventBroadcaster};
use super::query::EngineStats;
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use super::source::{LiveStatusSource, StreamSnapshot};
use super::tracker::{SessionTracker, TrackerTransition};

/// Configuration for the stream monitor.
#[derive(Debug, Clone)]
pub struct StreamMonitorConfig {
    /// Poll interval; also the base of the upstream backoff.
    pub check_interval: Duration,
    /// Names per upstream call, capped by the source.
    pub max_batch_size: usize,
    pub max_concurrent_batches: usize,
    pub rate_limit: RateLimiterConfig,
}

impl Default for StreamMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(crate::config::DEFAULT_CHECK_INTERVAL_SECS),
            max_batch_size: crate::config::MAX_BATCH_SIZE,
            max_concurrent_batches: 4,
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Another tick held the tracker; nothing was done.
    pub skipped: bool,
    /// Distinct subscribed channels.
    pub channels: usize,
    pub checked: usize,
    /// Channels whose batch failed; their state was carried over.
    pub unchecked: usize,
    pub upstream_calls: usize,
    pub went_live: Vec<ChannelName>,
    pub went_offline: Vec<ChannelName>,
    /// Live channels dropped because nobody subscribes any more.
    pub retired: Vec<ChannelName>,
    pub deliveries: usize,
    pub failed_deliveries: usize,
    /// Whether the live set reached the store this tick.
    pub persisted: bool,
    pub duration: Duration,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// A newly live channel ready for fan-out.
struct GoLive {
    snapshot: StreamSnapshot,
    subscribers: Vec<Subscriber>,
}

/// The Stream Monitor service.
pub struct StreamMonitor {
    subscriptions: Arc<dyn SubscriptionRepository>,
    live_sessions: Arc<dyn LiveSessionRepository>,
    tracker: Arc<SessionTracker>,
    detector: BatchDetector,
    dispatcher: Arc<NotificationDispatcher>,
    leaderboard: Arc<LeaderboardAggregator>,
    cleanup: NotificationCleanup,
    event_broadcaster: MonitorEventBroadcaster,
    stats: RwLock<EngineStats>,
    /// Detached offline cleanups.
    background: TaskTracker,
}

impl StreamMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamMonitorConfig,
        source: Arc<dyn LiveStatusSource>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        live_sessions: Arc<dyn LiveSessionRepository>,
        tracker: Arc<SessionTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        leaderboard: Arc<LeaderboardAggregator>,
        cleanup: NotificationCleanup,
    ) -> Self {
        let backoff = Arc::new(UpstreamBackoff::new(config.check_interval));
        let detector = BatchDetector::new(source, backoff)
            .with_max_batch_size(config.max_batch_size)
            .with_max_concurrent_batches(config.max_concurrent_batches)
            .with_rate_limiter(RateLimiter::new(config.rate_limit));

        Self {
            subscriptions,
            live_sessions,
            tracker,
            detector,
            dispatcher,
            leaderboard,
            cleanup,
            event_broadcaster: MonitorEventBroadcaster::new(),
            stats: RwLock::new(EngineStats::default()),
            background: TaskTracker::new(),
        }
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn event_broadcaster(&self) -> &MonitorEventBroadcaster {
        &self.event_broadcaster
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.read().clone();
        stats.channels_live = self.tracker.snapshot().live_count();
        stats
    }

    /// Run one reconciliation tick.
    ///
    /// Returns a skipped report if another tick is still running. On error
    /// the tracker is left exactly as it was.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let started = Instant::now();

        let Some(mut transition) = self.tracker.try_begin() else {
            debug!("Previous tick still running, skipping");
            self.stats.write().ticks_skipped += 1;
            return Ok(TickReport::skipped());
        };

        let result = self.reconcile(&mut transition).await;
        drop(transition);

        match result {
            Ok(mut report) => {
                report.duration = started.elapsed();
                self.record_success(&report);
                Ok(report)
            }
            Err(e) => {
                warn!("Tick aborted: {}", e);
                self.record_failure(&e, started.elapsed());
                let _ = self.event_broadcaster.publish(MonitorEvent::TickFailed {
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    async fn reconcile(&self, transition: &mut TrackerTransition<'_>) -> Result<TickReport> {
        let channels = self.subscriptions.list_distinct_channels().await?;
        let mut report = TickReport {
            channels: channels.len(),
            ..Default::default()
        };

        report.retired = transition.retain_channels(&channels);
        for channel in &report.retired {
            debug!(channel = %channel, "Retired unsubscribed channel");
        }

        let names: Vec<ChannelName> = channels.into_iter().collect();
        let outcome = self.detector.check_all(&names).await;
        report.checked = outcome.checked.len();
        report.unchecked = outcome.failed_channel_count();
        report.upstream_calls = outcome.calls;
        if !outcome.is_complete() {
            debug!(
                failed_batches = outcome.failures.len(),
                "Carrying over state for unchecked channels"
            );
        }

        // Diff checked channels only; unchecked ones keep their state.
        let mut newly_live = Vec::new();
        for channel in names.iter().filter(|c| outcome.checked.contains(*c)) {
            match outcome.live.get(channel) {
                Some(snapshot) if transition.is_live(channel) => {
                    transition.mark_live(snapshot.clone());
                }
                Some(snapshot) => newly_live.push(snapshot.clone()),
                None => {
                    if transition.mark_offline(channel).is_some() {
                        report.went_offline.push(channel.clone());
                    }
                }
            }
        }

        let go_live = self.resolve_subscribers(newly_live).await?;

        // Past this point nothing aborts the tick.
        let timestamp = Utc::now();
        for item in &go_live {
            transition.mark_live(item.snapshot.clone());
        }

        let dispatches = join_all(
            go_live
                .iter()
                .map(|item| self.dispatcher.dispatch(&item.snapshot, &item.subscribers)),
        )
        .await;

        let mut live_events = Vec::with_capacity(go_live.len());
        for (item, dispatch) in go_live.iter().zip(dispatches) {
            let channel = &item.snapshot.channel;
            let guild_ids: Vec<i64> = item.subscribers.iter().map(|s| s.guild_id).collect();
            if let Err(e) = self
                .leaderboard
                .record_session(channel, &guild_ids, timestamp)
                .await
            {
                warn!(channel = %channel, "Failed to record leaderboard session: {}", e);
            }
            transition.mark_notified(channel);

            report.deliveries += dispatch.attempts();
            report.failed_deliveries += dispatch.failed();
            report.went_live.push(channel.clone());
            live_events.push(MonitorEvent::ChannelLive {
                channel: channel.clone(),
                title: item.snapshot.title.clone(),
                category: item.snapshot.category.clone(),
                started_at: item.snapshot.started_at,
                deliveries: dispatch.attempts(),
                timestamp,
            });
        }

        if transition.commit() {
            match self.live_sessions.replace_all(&transition.to_db_models()).await {
                Ok(()) => {
                    self.tracker.mark_persisted();
                    report.persisted = true;
                }
                Err(e) => warn!("Failed to persist live sessions, retrying next tick: {}", e),
            }
        }

        for channel in &report.went_offline {
            self.spawn_cleanup(channel.clone());
        }

        for event in live_events {
            let _ = self.event_broadcaster.publish(event);
        }
        for channel in &report.went_offline {
            let _ = self.event_broadcaster.publish(MonitorEvent::ChannelOffline {
                channel: channel.clone(),
                timestamp,
            });
        }
        let _ = self.event_broadcaster.publish(MonitorEvent::TickCompleted {
            checked: report.checked,
            unchecked: report.unchecked,
            went_live: report.went_live.len(),
            went_offline: report.went_offline.len(),
            timestamp,
        });

        if !report.went_live.is_empty() || !report.went_offline.is_empty() {
            info!(
                live = report.went_live.len(),
                offline = report.went_offline.len(),
                deliveries = report.deliveries,
                failed = report.failed_deliveries,
                "Tick applied live-state changes"
            );
        }

        Ok(report)
    }

    /// Look up every new session's subscribers before anything is sent.
    async fn resolve_subscribers(&self, newly_live: Vec<StreamSnapshot>) -> Result<Vec<GoLive>> {
        let mut go_live = Vec::with_capacity(newly_live.len());
        for snapshot in newly_live {
            let subscribers = self.subscriptions.list_subscribers(&snapshot.channel).await?;
            go_live.push(GoLive {
                snapshot,
                subscribers,
            });
        }
        Ok(go_live)
    }

    fn spawn_cleanup(&self, channel: ChannelName) {
        let cleanup = self.cleanup.clone();
        self.background.spawn(async move {
            if let Err(e) = cleanup.retract(&channel).await {
                warn!(channel = %channel, "Notification cleanup failed: {}", e);
            }
        });
    }

    fn record_success(&self, report: &TickReport) {
        let mut stats = self.stats.write();
        stats.channels_tracked = report.channels;
        stats.ticks_completed += 1;
        stats.notifications_sent += (report.deliveries - report.failed_deliveries) as u64;
        stats.notifications_failed += report.failed_deliveries as u64;
        stats.last_tick_at = Some(Utc::now());
        stats.last_tick_duration = Some(report.duration);
        stats.last_tick_error = None;
    }

    fn record_failure(&self, error: &crate::Error, duration: Duration) {
        let mut stats = self.stats.write();
        stats.ticks_failed += 1;
        stats.last_tick_at = Some(Utc::now());
        stats.last_tick_duration = Some(duration);
        stats.last_tick_error = Some(error.to_string());
    }

    /// Live channels as of the last committed tick.
    pub fn known_live_set(&self) -> BTreeSet<ChannelName> {
        self.tracker.known_live_set()
    }

    /// Wait for detached cleanups to finish.
    pub async fn shutdown(&self) {
        self.background.close();
        self.background.wait().await;
        debug!("Stream monitor background tasks finished");
    }
}
