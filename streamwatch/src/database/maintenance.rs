//! Database maintenance operations.
//!
//! Runs hourly:
//! - Notification log trimming
//! - Leaderboard rows of past months

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::database::repositories::{LeaderboardRepository, NotificationRepository};
use crate::domain::MonthKey;

/// Configuration for the maintenance scheduler.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between runs (default: 1 hour).
    pub interval: Duration,
    /// Notification log retention in days (default: 30).
    pub notification_log_retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            notification_log_retention_days: 30,
        }
    }
}

/// What a single maintenance run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub log_rows_trimmed: u64,
    pub leaderboard_rows_purged: u64,
}

/// Database maintenance scheduler.
pub struct MaintenanceScheduler {
    leaderboard: Arc<dyn LeaderboardRepository>,
    notifications: Arc<dyn NotificationRepository>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        leaderboard: Arc<dyn LeaderboardRepository>,
        notifications: Arc<dyn NotificationRepository>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            leaderboard,
            notifications,
            config,
        }
    }

    /// Start the maintenance loop; it exits when `token` is cancelled.
    pub fn start(self: Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(token).await;
        })
    }

    async fn run_loop(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Maintenance scheduler stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_maintenance().await {
                tracing::error!("Maintenance error: {}", e);
            }
        }
    }

    /// Run all maintenance tasks once.
    pub async fn run_maintenance(&self) -> crate::Result<MaintenanceReport> {
        tracing::debug!("Starting database maintenance");

        let log_rows_trimmed = self
            .notifications
            .trim_log(self.config.notification_log_retention_days)
            .await?;
        if log_rows_trimmed > 0 {
            tracing::info!("Trimmed {} old notification log entries", log_rows_trimmed);
        }

        let current = MonthKey::current().to_string();
        let leaderboard_rows_purged = self.leaderboard.purge_before(&current).await?;
        if leaderboard_rows_purged > 0 {
            tracing::info!(
                "Purged {} leaderboard rows from months before {}",
                leaderboard_rows_purged,
                current
            );
        }

        Ok(MaintenanceReport {
            log_rows_trimmed,
            leaderboard_rows_purged,
        })
    }
}
