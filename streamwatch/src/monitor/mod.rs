//! Stream Monitor module for detecting live status.
//!
//! The Stream Monitor is responsible for:
//! - Batch live-status checks against the upstream platform
//! - Rate limiting and backoff to respect upstream limits
//! - Tracking live sessions and their notification state
//! - Driving go-live fan-out and leaderboard counting
//! - Emitting events for observers

mod backoff;
mod batch_detector;
mod events;
mod query;
mod rate_limiter;
mod service;
mod source;
mod tracker;
mod twitch;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{MAX_BACKOFF, UpstreamBackoff, calculate_backoff};
pub use batch_detector::{BatchDetector, BatchFailure, BatchOutcome};
pub use events::{MonitorEvent, MonitorEventBroadcaster};
pub use query::{EngineStats, LiveChannel, LiveQuery};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use service::{StreamMonitor, StreamMonitorConfig, TickReport};
pub use source::{LiveStatusSource, SourceError, StreamSnapshot};
pub use tracker::{
    ChannelState, LiveSession, SessionTracker, TrackerSnapshot, TrackerTransition,
};
pub use twitch::{HELIX_MAX_BATCH, TwitchClient};
