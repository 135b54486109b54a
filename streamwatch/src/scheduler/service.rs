//! Scheduler service implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_CHECK_INTERVAL_SECS;
use crate::monitor::StreamMonitor;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between tick starts.
    pub check_interval: Duration,
    /// Run the first tick immediately instead of after one interval.
    pub tick_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            tick_on_start: true,
        }
    }
}

/// Drives [`StreamMonitor::run_tick`] on a fixed interval.
pub struct Scheduler {
    monitor: Arc<StreamMonitor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(monitor: Arc<StreamMonitor>, config: SchedulerConfig) -> Self {
        Self { monitor, config }
    }

    pub fn start(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(token).await;
        })
    }

    /// Run until `token` is cancelled.
    ///
    /// Cancellation is only observed between ticks; a running tick always
    /// completes, persisting its state, before this returns.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting scheduler with a {:?} check interval",
            self.config.check_interval
        );

        let start = if self.config.tick_on_start {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + self.config.check_interval
        };
        let mut interval = tokio::time::interval_at(start, self.config.check_interval);
        // A slow tick delays the next one instead of triggering a burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Scheduler received cancellation signal");
                    break;
                }
                _ = interval.tick() => {}
            }

            match self.monitor.run_tick().await {
                Ok(report) if report.skipped => {
                    warn!("Tick skipped: previous tick still running");
                }
                Ok(report) => {
                    debug!(
                        channels = report.channels,
                        checked = report.checked,
                        unchecked = report.unchecked,
                        calls = report.upstream_calls,
                        "Tick finished in {:?}",
                        report.duration
                    );
                    if report.unchecked > 0 {
                        warn!(
                            "{} of {} channels could not be checked this tick",
                            report.unchecked, report.channels
                        );
                    }
                }
                Err(e) => {
                    error!("Tick failed, retrying next interval: {}", e);
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{
        SqlxLeaderboardRepository, SqlxLiveSessionRepository, SqlxNotificationRepository,
        SqlxSubscriptionRepository, SubscriptionRepository,
    };
    use crate::database::test_pool;
    use crate::domain::ChannelName;
    use crate::leaderboard::LeaderboardAggregator;
    use crate::monitor::testing::FakeSource;
    use crate::monitor::{RateLimiterConfig, SessionTracker, StreamMonitorConfig};
    use crate::notification::testing::RecordingTransport;
    use crate::notification::{NotificationCleanup, NotificationDispatcher};

    async fn monitor(source: Arc<FakeSource>) -> (Arc<StreamMonitor>, Arc<SqlxSubscriptionRepository>) {
        let pool = test_pool().await;
        let subscriptions = Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
        let notifications = Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let transport = Arc::new(RecordingTransport::new());
        let monitor = StreamMonitor::new(
            StreamMonitorConfig {
                rate_limit: RateLimiterConfig::with_rps(1000.0).unwrap(),
                ..Default::default()
            },
            source,
            subscriptions.clone(),
            Arc::new(SqlxLiveSessionRepository::new(pool.clone())),
            Arc::new(SessionTracker::new()),
            Arc::new(NotificationDispatcher::new(
                transport.clone(),
                notifications.clone(),
                4,
            )),
            Arc::new(LeaderboardAggregator::new(Arc::new(
                SqlxLeaderboardRepository::new(pool),
            ))),
            NotificationCleanup::new(transport, notifications),
        );
        (Arc::new(monitor), subscriptions)
    }

    #[tokio::test]
    async fn test_ticks_until_cancelled() {
        let source = Arc::new(FakeSource::new());
        let (monitor, subscriptions) = monitor(source.clone()).await;
        subscriptions
            .add_subscription(1, &ChannelName::from_trusted("alpha"), 10, None, None)
            .await
            .unwrap();

        let scheduler = Arc::new(Scheduler::new(
            monitor.clone(),
            SchedulerConfig {
                check_interval: Duration::from_millis(20),
                tick_on_start: true,
            },
        ));
        let token = CancellationToken::new();
        let handle = scheduler.start(token.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let ticks = monitor.stats().ticks_completed;
        assert!(ticks >= 2, "expected several ticks, got {ticks}");
        assert_eq!(source.batch_sizes().len() as u64, ticks);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let source = Arc::new(FakeSource::new());
        let (monitor, _) = monitor(source).await;
        let scheduler = Scheduler::new(
            monitor.clone(),
            SchedulerConfig {
                check_interval: Duration::from_secs(3600),
                tick_on_start: false,
            },
        );
        let token = CancellationToken::new();
        token.cancel();
        scheduler.run(token).await;
        assert_eq!(monitor.stats().ticks_completed, 0);
    }
}
