//! Guild settings database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{DisplayPreferences, GuildSettings};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GuildSettingsDbModel {
    pub guild_id: i64,
    pub notification_channel_id: Option<i64>,
    pub embed_color: i64,
    pub auto_delete_notifications: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GuildSettingsDbModel {
    pub fn into_domain(self) -> GuildSettings {
        GuildSettings {
            guild_id: self.guild_id,
            notification_channel_id: self.notification_channel_id,
            preferences: DisplayPreferences {
                embed_color: color_from_db(self.embed_color),
                auto_delete: self.auto_delete_notifications,
            },
        }
    }
}

/// Stored colours are 24-bit; anything else falls back to the default.
pub(crate) fn color_from_db(value: i64) -> u32 {
    u32::try_from(value)
        .ok()
        .filter(|c| *c <= 0xFF_FFFF)
        .unwrap_or(crate::domain::DEFAULT_EMBED_COLOR)
}
