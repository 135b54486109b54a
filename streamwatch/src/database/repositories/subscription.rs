//! Subscription store: monitored streamers and guild settings.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use crate::database::begin_immediate;
use crate::database::models::{GuildSettingsDbModel, MonitoredStreamerDbModel, SubscriberRow};
use crate::database::time::now_ms;
use crate::domain::{ChannelName, DEFAULT_EMBED_COLOR, GuildSettings, Subscriber, Subscription};
use crate::{Error, Result};

/// Subscription repository trait.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    // Subscriptions
    /// Returns `false` when the guild already follows the channel.
    async fn add_subscription(
        &self,
        guild_id: i64,
        channel: &ChannelName,
        channel_id: i64,
        custom_channel_id: Option<i64>,
        added_by: Option<i64>,
    ) -> Result<bool>;
    async fn remove_subscription(&self, guild_id: i64, channel: &ChannelName) -> Result<bool>;
    async fn list_guild_subscriptions(&self, guild_id: i64) -> Result<Vec<Subscription>>;
    async fn list_distinct_channels(&self) -> Result<BTreeSet<ChannelName>>;
    async fn list_subscribers(&self, channel: &ChannelName) -> Result<Vec<Subscriber>>;

    // Guild settings
    /// Returns how many subscriptions now point at the new channel.
    async fn set_notification_channel(&self, guild_id: i64, channel_id: i64) -> Result<u64>;
    async fn set_embed_color(&self, guild_id: i64, color: u32) -> Result<()>;
    async fn reset_embed_color(&self, guild_id: i64) -> Result<()>;
    async fn set_auto_delete(&self, guild_id: i64, enabled: bool) -> Result<()>;
    async fn get_settings(&self, guild_id: i64) -> Result<GuildSettings>;
    async fn remove_guild(&self, guild_id: i64) -> Result<()>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn ensure_settings_row(&self, guild_id: i64) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"
            INSERT INTO guild_settings (guild_id, created_at, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn add_subscription(
        &self,
        guild_id: i64,
        channel: &ChannelName,
        channel_id: i64,
        custom_channel_id: Option<i64>,
        added_by: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO monitored_streamers (guild_id, streamer_name, channel_id, custom_channel_id, added_by, added_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, streamer_name) DO NOTHING
            "#,
        )
        .bind(guild_id)
        .bind(channel.as_str())
        .bind(channel_id)
        .bind(custom_channel_id)
        .bind(added_by)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let added = result.rows_affected() > 0;
        if added {
            tracing::info!(guild_id, channel = %channel, ?custom_channel_id, "Added subscription");
        } else {
            tracing::debug!(guild_id, channel = %channel, "Subscription already exists");
        }
        Ok(added)
    }

    async fn remove_subscription(&self, guild_id: i64, channel: &ChannelName) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM monitored_streamers WHERE guild_id = ? AND streamer_name = ?")
                .bind(guild_id)
                .bind(channel.as_str())
                .execute(&self.pool)
                .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(guild_id, channel = %channel, "Removed subscription");
        }
        Ok(removed)
    }

    async fn list_guild_subscriptions(&self, guild_id: i64) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, MonitoredStreamerDbModel>(
            "SELECT * FROM monitored_streamers WHERE guild_id = ? ORDER BY streamer_name",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MonitoredStreamerDbModel::into_domain).collect())
    }

    async fn list_distinct_channels(&self) -> Result<BTreeSet<ChannelName>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT streamer_name FROM monitored_streamers")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name,)| ChannelName::from_trusted(name))
            .collect())
    }

    async fn list_subscribers(&self, channel: &ChannelName) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query_as::<_, SubscriberRow>(
            r#"
            SELECT ms.guild_id, ms.channel_id, ms.custom_channel_id,
                   gs.embed_color, gs.auto_delete_notifications
            FROM monitored_streamers ms
            LEFT JOIN guild_settings gs ON gs.guild_id = ms.guild_id
            WHERE ms.streamer_name = ?
            ORDER BY ms.guild_id
            "#,
        )
        .bind(channel.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SubscriberRow::into_domain).collect())
    }

    async fn set_notification_channel(&self, guild_id: i64, channel_id: i64) -> Result<u64> {
        let now = now_ms();
        let mut tx = begin_immediate(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO guild_settings (guild_id, notification_channel_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                notification_channel_id = excluded.notification_channel_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(guild_id)
        .bind(channel_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Per-streamer overrides keep their channel.
        let updated = sqlx::query(
            "UPDATE monitored_streamers SET channel_id = ? WHERE guild_id = ? AND custom_channel_id IS NULL",
        )
        .bind(channel_id)
        .bind(guild_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::info!(
            guild_id,
            channel_id,
            "Set notification channel (updated {} streamers)",
            updated
        );
        Ok(updated)
    }

    async fn set_embed_color(&self, guild_id: i64, color: u32) -> Result<()> {
        if color > 0xFF_FFFF {
            return Err(Error::validation(format!(
                "`{:#X}` is not a valid colour, use a hex value up to FFFFFF.",
                color
            )));
        }
        self.ensure_settings_row(guild_id).await?;
        sqlx::query("UPDATE guild_settings SET embed_color = ?, updated_at = ? WHERE guild_id = ?")
            .bind(i64::from(color))
            .bind(now_ms())
            .bind(guild_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(guild_id, "Set embed colour to {:#08X}", color);
        Ok(())
    }

    async fn reset_embed_color(&self, guild_id: i64) -> Result<()> {
        self.set_embed_color(guild_id, DEFAULT_EMBED_COLOR).await
    }

    async fn set_auto_delete(&self, guild_id: i64, enabled: bool) -> Result<()> {
        self.ensure_settings_row(guild_id).await?;
        sqlx::query(
            "UPDATE guild_settings SET auto_delete_notifications = ?, updated_at = ? WHERE guild_id = ?",
        )
        .bind(enabled)
        .bind(now_ms())
        .bind(guild_id)
        .execute(&self.pool)
        .await?;
        tracing::info!(guild_id, enabled, "Set auto-delete");
        Ok(())
    }

    async fn get_settings(&self, guild_id: i64) -> Result<GuildSettings> {
        let row = sqlx::query_as::<_, GuildSettingsDbModel>(
            "SELECT * FROM guild_settings WHERE guild_id = ?",
        )
        .bind(guild_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(GuildSettingsDbModel::into_domain)
            .unwrap_or_else(|| GuildSettings::defaults_for(guild_id)))
    }

    async fn remove_guild(&self, guild_id: i64) -> Result<()> {
        let mut tx = begin_immediate(&self.pool).await?;
        for table in ["monitored_streamers", "guild_settings", "notification_messages"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE guild_id = ?"))
                .bind(guild_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(guild_id, "Removed all data for guild");
        Ok(())
    }
}
