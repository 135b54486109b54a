//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::database::repositories::{
    LeaderboardRepository, LiveSessionRepository, NotificationRepository,
    SqlxLeaderboardRepository, SqlxLiveSessionRepository, SqlxNotificationRepository,
    SqlxSubscriptionRepository, SubscriptionRepository,
};
use crate::database::{DbPool, MaintenanceConfig, MaintenanceScheduler};
use crate::leaderboard::LeaderboardAggregator;
use crate::monitor::{
    EngineStats, LiveQuery, LiveStatusSource, MonitorEvent, SessionTracker, StreamMonitor,
    StreamMonitorConfig, TwitchClient,
};
use crate::notification::{
    DeliveryTransport, DiscordTransport, NotificationCleanup, NotificationDispatcher,
};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::utils::http_client::{DEFAULT_REQUEST_TIMEOUT, build_http_client};
use crate::{Error, Result};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: DbPool,
    /// Subscription store, shared with command handlers.
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    /// Notification log and retained messages.
    pub notifications: Arc<dyn NotificationRepository>,
    pub leaderboard: Arc<LeaderboardAggregator>,
    pub tracker: Arc<SessionTracker>,
    pub monitor: Arc<StreamMonitor>,
    /// `/live` query path.
    pub live_query: Arc<LiveQuery>,
    live_sessions: Arc<dyn LiveSessionRepository>,
    scheduler: Arc<Scheduler>,
    maintenance: Arc<MaintenanceScheduler>,
    restore_live_state: bool,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Create a container talking to Twitch and Discord.
    pub fn new(pool: DbPool, config: &AppConfig) -> Result<Self> {
        let client = build_http_client(DEFAULT_REQUEST_TIMEOUT)
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        let source = Arc::new(TwitchClient::new(
            client.clone(),
            config.twitch_client_id.clone(),
            config.twitch_client_secret.clone(),
        ));
        let transport = Arc::new(DiscordTransport::new(client, config.discord_token.clone()));

        Ok(Self::with_components(pool, config, source, transport))
    }

    /// Create a container with explicit upstream and delivery components.
    pub fn with_components(
        pool: DbPool,
        config: &AppConfig,
        source: Arc<dyn LiveStatusSource>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        info!("Initializing service container");

        // Create repositories
        let subscriptions: Arc<dyn SubscriptionRepository> =
            Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
        let live_sessions: Arc<dyn LiveSessionRepository> =
            Arc::new(SqlxLiveSessionRepository::new(pool.clone()));
        let notifications: Arc<dyn NotificationRepository> =
            Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let leaderboard_repo: Arc<dyn LeaderboardRepository> =
            Arc::new(SqlxLeaderboardRepository::new(pool.clone()));

        let tracker = Arc::new(SessionTracker::new());
        let leaderboard = Arc::new(LeaderboardAggregator::new(leaderboard_repo.clone()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            transport.clone(),
            notifications.clone(),
            config.max_concurrent_deliveries,
        ));
        let cleanup = NotificationCleanup::new(transport, notifications.clone());

        let monitor = Arc::new(StreamMonitor::new(
            StreamMonitorConfig {
                check_interval: config.check_interval,
                max_batch_size: config.max_batch_size,
                max_concurrent_batches: config.max_concurrent_batches,
                ..Default::default()
            },
            source,
            subscriptions.clone(),
            live_sessions.clone(),
            tracker.clone(),
            dispatcher,
            leaderboard.clone(),
            cleanup,
        ));

        let scheduler = Arc::new(Scheduler::new(
            monitor.clone(),
            SchedulerConfig {
                check_interval: config.check_interval,
                ..Default::default()
            },
        ));

        let maintenance = Arc::new(MaintenanceScheduler::new(
            leaderboard_repo,
            notifications.clone(),
            MaintenanceConfig {
                notification_log_retention_days: config.notification_log_retention_days,
                ..Default::default()
            },
        ));

        let live_query = Arc::new(LiveQuery::new(tracker.clone(), subscriptions.clone()));

        debug!("Service container initialized");

        Self {
            pool,
            subscriptions,
            notifications,
            leaderboard,
            tracker,
            monitor,
            live_query,
            live_sessions,
            scheduler,
            maintenance,
            restore_live_state: config.restore_live_state,
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Load the persisted live set into the tracker, if enabled.
    ///
    /// Restored sessions count as already notified.
    pub async fn restore_live_state(&self) -> Result<usize> {
        if !self.restore_live_state {
            info!("Live state restore disabled; every live channel will be announced");
            return Ok(0);
        }
        let rows = self.live_sessions.load_all().await?;
        let restored = self.tracker.restore(rows).await;
        info!("Restored {} live sessions", restored);
        Ok(restored)
    }

    /// Start background services.
    pub fn start(&self) {
        let token = self.cancellation_token.clone();
        let mut tasks = self.tasks.lock();

        tasks.push(self.scheduler.clone().start(token.clone()));
        tasks.push(self.maintenance.clone().start(token.clone()));
        tasks.push(Self::spawn_event_logger(self.monitor.subscribe(), token));

        info!("Services started");
    }

    /// Log monitor events until cancelled.
    fn spawn_event_logger(
        mut receiver: broadcast::Receiver<MonitorEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event @ (MonitorEvent::ChannelLive { .. } | MonitorEvent::ChannelOffline { .. })) => {
                            info!("{}", event.description());
                        }
                        Ok(event) => debug!("{}", event.description()),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event logger lagged {} monitor events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// An in-flight tick is allowed to finish and persist within `timeout`.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Signal all background tasks to stop
        self.cancellation_token.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let monitor = self.monitor.clone();
        let shutdown_result = tokio::time::timeout(timeout, async move {
            for result in futures::future::join_all(tasks).await {
                if let Err(e) = result {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
            monitor.shutdown().await;
        })
        .await;

        if shutdown_result.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        // Close database pool
        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Engine statistics for `/stats`.
    pub fn stats(&self) -> EngineStats {
        self.monitor.stats()
    }
}
