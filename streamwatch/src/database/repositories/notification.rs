//! Notification bookkeeping repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::begin_immediate;
use crate::database::models::{
    NewNotificationLog, NotificationLogDbModel, NotificationMessageDbModel,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{days_ago_ms, now_ms};

/// Notification repository trait.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    // Delivery log
    /// Record a fan-out's attempts, and retained messages, in one transaction.
    async fn record_attempts(&self, attempts: &[NewNotificationLog]) -> Result<()>;
    async fn list_log(
        &self,
        guild_id: i64,
        streamer_name: &str,
        limit: u32,
    ) -> Result<Vec<NotificationLogDbModel>>;
    async fn trim_log(&self, retention_days: u32) -> Result<u64>;

    // Retained messages
    async fn list_messages(&self, streamer_name: &str) -> Result<Vec<NotificationMessageDbModel>>;
    async fn delete_messages(&self, ids: &[i64]) -> Result<u64>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn record_attempts_once(&self, attempts: &[NewNotificationLog]) -> Result<()> {
        let now = now_ms();
        let mut tx = begin_immediate(&self.pool).await?;
        for attempt in attempts {
            sqlx::query(
                r#"
                INSERT INTO notification_log (guild_id, streamer_name, channel_id, status, error, sent_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(attempt.guild_id)
            .bind(&attempt.streamer_name)
            .bind(attempt.channel_id)
            .bind(attempt.status.as_str())
            .bind(&attempt.error)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if let Some(message_id) = attempt.retained_message_id {
                sqlx::query(
                    r#"
                    INSERT INTO notification_messages (guild_id, streamer_name, channel_id, message_id, sent_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(guild_id, streamer_name, message_id) DO NOTHING
                    "#,
                )
                .bind(attempt.guild_id)
                .bind(&attempt.streamer_name)
                .bind(attempt.channel_id)
                .bind(message_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn record_attempts(&self, attempts: &[NewNotificationLog]) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }
        retry_on_sqlite_busy("record_notification_attempts", || {
            self.record_attempts_once(attempts)
        })
        .await
    }

    async fn list_log(
        &self,
        guild_id: i64,
        streamer_name: &str,
        limit: u32,
    ) -> Result<Vec<NotificationLogDbModel>> {
        let rows = sqlx::query_as::<_, NotificationLogDbModel>(
            r#"
            SELECT * FROM notification_log
            WHERE guild_id = ? AND streamer_name = ?
            ORDER BY sent_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id)
        .bind(streamer_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn trim_log(&self, retention_days: u32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notification_log WHERE sent_at < ?")
            .bind(days_ago_ms(retention_days))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_messages(&self, streamer_name: &str) -> Result<Vec<NotificationMessageDbModel>> {
        let rows = sqlx::query_as::<_, NotificationMessageDbModel>(
            "SELECT * FROM notification_messages WHERE streamer_name = ? ORDER BY id",
        )
        .bind(streamer_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_messages(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM notification_messages WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
