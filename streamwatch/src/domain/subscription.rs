//! Subscription entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChannelName;

/// Default embed colour (Twitch purple).
pub const DEFAULT_EMBED_COLOR: u32 = 0x9146FF;

/// Where a guild wants notifications for one channel posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub guild_id: i64,
    pub channel_id: i64,
}

/// Per-guild display preferences applied to every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPreferences {
    pub embed_color: u32,
    pub auto_delete: bool,
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            embed_color: DEFAULT_EMBED_COLOR,
            auto_delete: false,
        }
    }
}

/// A guild's subscription to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub guild_id: i64,
    pub channel: ChannelName,
    /// Guild default channel at the time of subscribing (kept in sync by
    /// `set_notification_channel`).
    pub channel_id: i64,
    /// Per-streamer override; wins over `channel_id` when set.
    pub custom_channel_id: Option<i64>,
    pub added_at: DateTime<Utc>,
}

impl Subscription {
    pub fn target(&self) -> DeliveryTarget {
        DeliveryTarget {
            guild_id: self.guild_id,
            channel_id: self.custom_channel_id.unwrap_or(self.channel_id),
        }
    }
}

/// One recipient of a channel's go-live fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub guild_id: i64,
    pub target: DeliveryTarget,
    pub preferences: DisplayPreferences,
}

/// Guild-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: i64,
    pub notification_channel_id: Option<i64>,
    pub preferences: DisplayPreferences,
}

impl GuildSettings {
    pub fn defaults_for(guild_id: i64) -> Self {
        Self {
            guild_id,
            notification_channel_id: None,
            preferences: DisplayPreferences::default(),
        }
    }
}
