//! Logging setup with a reloadable filter and daily-rolling log files.
//!
//! - Runtime log level changes via `tracing_subscriber::reload`
//! - Log file retention cleanup (deletes logs older than 7 days)
//! - Local timezone timestamps

use chrono::{Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streamwatch=info,sqlx=warn";

/// Rolling log file prefix; files are named `streamwatch.log.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "streamwatch.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive (e.g. `streamwatch=debug,sqlx=warn`).
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start the daily log retention cleanup task.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    warn!(error = %e, "Failed to cleanup old logs");
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {}
                }
            }
        });
    }
}

/// Delete rolled log files older than `retention_days`. Returns how many were removed.
pub(crate) async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days);
    let prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
        else {
            continue;
        };

        let Ok(file_date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Initialize logging: console plus a daily-rolling file in `log_dir`.
///
/// Keep the returned guard alive for the lifetime of the process or buffered
/// file output is lost.
pub fn init_logging(log_dir: impl AsRef<Path>) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = log_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_path,
    });

    Ok((config, guard))
}
