//! Read side for command handlers.
//!
//! Answers from the last committed tick; never calls upstream.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::tracker::{LiveSession, SessionTracker};
use crate::Result;
use crate::database::repositories::SubscriptionRepository;
use crate::domain::{DeliveryTarget, Subscription};

/// A live channel one guild subscribes to.
#[derive(Debug, Clone, Serialize)]
pub struct LiveChannel {
    pub target: DeliveryTarget,
    pub session: LiveSession,
}

/// Counters for the `/stats` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Distinct subscribed channels at the last tick.
    pub channels_tracked: usize,
    pub channels_live: usize,
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub ticks_skipped: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_tick_duration: Option<Duration>,
    /// Error of the last tick, cleared by the next successful one.
    pub last_tick_error: Option<String>,
}

pub struct LiveQuery {
    tracker: Arc<SessionTracker>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl LiveQuery {
    pub fn new(tracker: Arc<SessionTracker>, subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self {
            tracker,
            subscriptions,
        }
    }

    /// Live channels among `guild_id`'s subscriptions, most viewers first.
    pub async fn live_for_guild(&self, guild_id: i64) -> Result<Vec<LiveChannel>> {
        let subscriptions = self.subscriptions.list_guild_subscriptions(guild_id).await?;
        let snapshot = self.tracker.snapshot();

        let mut live: Vec<LiveChannel> = subscriptions
            .iter()
            .filter_map(|sub: &Subscription| {
                snapshot.session(&sub.channel).map(|session| LiveChannel {
                    target: sub.target(),
                    session: session.clone(),
                })
            })
            .collect();

        live.sort_by(|a, b| {
            b.session
                .snapshot
                .viewer_count
                .cmp(&a.session.snapshot.viewer_count)
                .then_with(|| a.session.snapshot.channel.cmp(&b.session.snapshot.channel))
        });
        Ok(live)
    }
}
