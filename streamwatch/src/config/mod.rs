//! Process configuration loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default reconciliation interval.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 90;
/// Lowest interval accepted; lower values are clamped up to it.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 30;
/// Upstream cap on logins per `/streams` call.
pub const MAX_BATCH_SIZE: usize = 100;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub discord_token: String,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub check_interval: Duration,
    pub max_batch_size: usize,
    pub max_concurrent_batches: usize,
    pub max_concurrent_deliveries: usize,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub restore_live_state: bool,
    pub notification_log_retention_days: u32,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("discord_token", &"<redacted>")
            .field("twitch_client_id", &self.twitch_client_id)
            .field("twitch_client_secret", &"<redacted>")
            .field("check_interval", &self.check_interval)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_concurrent_batches", &self.max_concurrent_batches)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .field("database_url", &self.database_url)
            .field("log_dir", &self.log_dir)
            .field("restore_live_state", &self.restore_live_state)
            .field(
                "notification_log_retention_days",
                &self.notification_log_retention_days,
            )
            .finish()
    }
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("{key} must be set")))
        };

        let discord_token = required("DISCORD_TOKEN")?;
        let twitch_client_id = required("TWITCH_CLIENT_ID")?;
        let twitch_client_secret = required("TWITCH_CLIENT_SECRET")?;

        let mut interval_secs: u64 =
            parse_or(get("CHECK_INTERVAL_SECONDS"), "CHECK_INTERVAL_SECONDS", DEFAULT_CHECK_INTERVAL_SECS)?;
        if interval_secs < MIN_CHECK_INTERVAL_SECS {
            tracing::warn!(
                "CHECK_INTERVAL_SECONDS={} is below the minimum, using {}",
                interval_secs,
                MIN_CHECK_INTERVAL_SECS
            );
            interval_secs = MIN_CHECK_INTERVAL_SECS;
        }

        let max_batch_size: usize = parse_or(get("MAX_BATCH_SIZE"), "MAX_BATCH_SIZE", MAX_BATCH_SIZE)?;
        if !(1..=MAX_BATCH_SIZE).contains(&max_batch_size) {
            return Err(Error::config(format!(
                "MAX_BATCH_SIZE must be between 1 and {MAX_BATCH_SIZE}, got {max_batch_size}"
            )));
        }

        let max_concurrent_batches: usize =
            parse_or(get("MAX_CONCURRENT_BATCHES"), "MAX_CONCURRENT_BATCHES", 4)?;
        let max_concurrent_deliveries: usize =
            parse_or(get("MAX_CONCURRENT_DELIVERIES"), "MAX_CONCURRENT_DELIVERIES", 16)?;
        if max_concurrent_batches == 0 || max_concurrent_deliveries == 0 {
            return Err(Error::config("concurrency limits must be at least 1"));
        }

        let restore_live_state = match get("RESTORE_LIVE_STATE") {
            None => true,
            Some(v) => parse_bool(&v)
                .ok_or_else(|| Error::config(format!("RESTORE_LIVE_STATE: invalid boolean `{v}`")))?,
        };

        Ok(Self {
            discord_token,
            twitch_client_id,
            twitch_client_secret,
            check_interval: Duration::from_secs(interval_secs),
            max_batch_size,
            max_concurrent_batches,
            max_concurrent_deliveries,
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:streamwatch.db?mode=rwc".to_string()),
            log_dir: PathBuf::from(get("LOG_DIR").unwrap_or_else(|| "logs".to_string())),
            restore_live_state,
            notification_log_retention_days: parse_or(
                get("NOTIFICATION_LOG_RETENTION_DAYS"),
                "NOTIFICATION_LOG_RETENTION_DAYS",
                30,
            )?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| Error::config(format!("{key}: invalid value `{v}`"))),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
