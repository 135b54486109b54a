//! Monitored streamer (subscription) database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::guild::color_from_db;
use crate::database::time::ms_to_datetime;
use crate::domain::{
    ChannelName, DEFAULT_EMBED_COLOR, DeliveryTarget, DisplayPreferences, Subscriber,
    Subscription,
};

/// One row of `monitored_streamers`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonitoredStreamerDbModel {
    pub id: i64,
    pub guild_id: i64,
    pub streamer_name: String,
    pub channel_id: i64,
    pub custom_channel_id: Option<i64>,
    pub added_by: Option<i64>,
    pub added_at: i64,
}

impl MonitoredStreamerDbModel {
    pub fn into_domain(self) -> Subscription {
        Subscription {
            guild_id: self.guild_id,
            channel: ChannelName::from_trusted(self.streamer_name),
            channel_id: self.channel_id,
            custom_channel_id: self.custom_channel_id,
            added_at: ms_to_datetime(self.added_at),
        }
    }
}

/// Subscription joined with the owning guild's display preferences.
///
/// Guilds that never touched their settings have no `guild_settings` row,
/// hence the optional preference columns.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriberRow {
    pub guild_id: i64,
    pub channel_id: i64,
    pub custom_channel_id: Option<i64>,
    pub embed_color: Option<i64>,
    pub auto_delete_notifications: Option<bool>,
}

impl SubscriberRow {
    pub fn into_domain(self) -> Subscriber {
        Subscriber {
            guild_id: self.guild_id,
            target: DeliveryTarget {
                guild_id: self.guild_id,
                channel_id: self.custom_channel_id.unwrap_or(self.channel_id),
            },
            preferences: DisplayPreferences {
                embed_color: self
                    .embed_color
                    .map(color_from_db)
                    .unwrap_or(DEFAULT_EMBED_COLOR),
                auto_delete: self.auto_delete_notifications.unwrap_or(false),
            },
        }
    }
}
