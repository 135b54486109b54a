//! Live session repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::LiveSessionDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, begin_immediate};

/// Persisted mirror of the tracker's live set.
#[async_trait]
pub trait LiveSessionRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<LiveSessionDbModel>>;
    /// Replace the stored set with `sessions` in a single transaction.
    async fn replace_all(&self, sessions: &[LiveSessionDbModel]) -> Result<()>;
}

/// SQLx implementation of LiveSessionRepository.
pub struct SqlxLiveSessionRepository {
    pool: SqlitePool,
}

impl SqlxLiveSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn replace_all_once(pool: &DbPool, sessions: &[LiveSessionDbModel]) -> Result<()> {
    let mut tx = begin_immediate(pool).await?;

    sqlx::query("DELETE FROM live_sessions")
        .execute(&mut *tx)
        .await?;

    for session in sessions {
        sqlx::query(
            r#"
            INSERT INTO live_sessions (
                streamer_name, user_name, started_at, title, category, viewer_count,
                thumbnail_url, profile_image_url, notified, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.streamer_name)
        .bind(&session.user_name)
        .bind(session.started_at)
        .bind(&session.title)
        .bind(&session.category)
        .bind(session.viewer_count)
        .bind(&session.thumbnail_url)
        .bind(&session.profile_image_url)
        .bind(session.notified)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[async_trait]
impl LiveSessionRepository for SqlxLiveSessionRepository {
    async fn load_all(&self) -> Result<Vec<LiveSessionDbModel>> {
        let sessions = sqlx::query_as::<_, LiveSessionDbModel>(
            "SELECT * FROM live_sessions ORDER BY streamer_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn replace_all(&self, sessions: &[LiveSessionDbModel]) -> Result<()> {
        retry_on_sqlite_busy("replace_live_sessions", || {
            replace_all_once(&self.pool, sessions)
        })
        .await
    }
}
