//! Leaderboard repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::begin_immediate;
use crate::database::models::LeaderboardRankDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

/// Scope key for the cross-guild counter.
pub const GLOBAL_SCOPE: &str = "global";

/// Scope key for a guild's counter.
pub fn guild_scope(guild_id: i64) -> String {
    format!("guild:{guild_id}")
}

/// Monthly go-live counters.
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    /// Increment every `scopes` counter for `streamer_name` in one transaction.
    async fn increment(&self, scopes: &[String], streamer_name: &str, month_key: &str)
    -> Result<()>;
    async fn count(&self, scope: &str, streamer_name: &str, month_key: &str) -> Result<i64>;
    /// Ranked by count descending, then name ascending.
    async fn top_n(&self, scope: &str, month_key: &str, limit: u32)
    -> Result<Vec<LeaderboardRankDbModel>>;
    /// Delete rows of months strictly before `month_key`.
    async fn purge_before(&self, month_key: &str) -> Result<u64>;
}

/// SQLx implementation of LeaderboardRepository.
pub struct SqlxLeaderboardRepository {
    pool: SqlitePool,
}

impl SqlxLeaderboardRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn increment_once(&self, scopes: &[String], streamer_name: &str, month_key: &str) -> Result<()> {
        let now = now_ms();
        let mut tx = begin_immediate(&self.pool).await?;
        for scope in scopes {
            sqlx::query(
                r#"
                INSERT INTO leaderboard_counts (scope, streamer_name, month_key, live_count, updated_at)
                VALUES (?, ?, ?, 1, ?)
                ON CONFLICT(scope, streamer_name, month_key) DO UPDATE SET
                    live_count = live_count + 1,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(scope)
            .bind(streamer_name)
            .bind(month_key)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LeaderboardRepository for SqlxLeaderboardRepository {
    async fn increment(
        &self,
        scopes: &[String],
        streamer_name: &str,
        month_key: &str,
    ) -> Result<()> {
        retry_on_sqlite_busy("leaderboard_increment", || {
            self.increment_once(scopes, streamer_name, month_key)
        })
        .await
    }

    async fn count(&self, scope: &str, streamer_name: &str, month_key: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT live_count FROM leaderboard_counts WHERE scope = ? AND streamer_name = ? AND month_key = ?",
        )
        .bind(scope)
        .bind(streamer_name)
        .bind(month_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(c,)| c).unwrap_or(0))
    }

    async fn top_n(
        &self,
        scope: &str,
        month_key: &str,
        limit: u32,
    ) -> Result<Vec<LeaderboardRankDbModel>> {
        let rows = if scope == GLOBAL_SCOPE {
            sqlx::query_as::<_, LeaderboardRankDbModel>(
                r#"
                SELECT g.streamer_name, g.live_count,
                       (SELECT COUNT(*) FROM leaderboard_counts s
                        WHERE s.streamer_name = g.streamer_name
                          AND s.month_key = g.month_key
                          AND s.scope LIKE 'guild:%') AS server_count
                FROM leaderboard_counts g
                WHERE g.scope = ? AND g.month_key = ?
                ORDER BY g.live_count DESC, g.streamer_name ASC
                LIMIT ?
                "#,
            )
            .bind(scope)
            .bind(month_key)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, LeaderboardRankDbModel>(
                r#"
                SELECT streamer_name, live_count, NULL AS server_count
                FROM leaderboard_counts
                WHERE scope = ? AND month_key = ?
                ORDER BY live_count DESC, streamer_name ASC
                LIMIT ?
                "#,
            )
            .bind(scope)
            .bind(month_key)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows)
    }

    async fn purge_before(&self, month_key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM leaderboard_counts WHERE month_key < ?")
            .bind(month_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_increment_upserts() {
        let repo = SqlxLeaderboardRepository::new(test_pool().await);
        let scopes = vec![GLOBAL_SCOPE.to_string(), guild_scope(1), guild_scope(2)];

        repo.increment(&scopes, "alpha", "2025-03").await.unwrap();
        repo.increment(&scopes, "alpha", "2025-03").await.unwrap();

        assert_eq!(repo.count(GLOBAL_SCOPE, "alpha", "2025-03").await.unwrap(), 2);
        assert_eq!(repo.count(&guild_scope(1), "alpha", "2025-03").await.unwrap(), 2);
        assert_eq!(repo.count(GLOBAL_SCOPE, "alpha", "2025-04").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_top_n_ordering_and_server_count() {
        let repo = SqlxLeaderboardRepository::new(test_pool().await);
        let month = "2025-03";
        repo.increment(&[GLOBAL_SCOPE.to_string(), guild_scope(1)], "bravo", month)
            .await
            .unwrap();
        for _ in 0..2 {
            repo.increment(
                &[GLOBAL_SCOPE.to_string(), guild_scope(1), guild_scope(2)],
                "alpha",
                month,
            )
            .await
            .unwrap();
        }
        repo.increment(&[GLOBAL_SCOPE.to_string(), guild_scope(2)], "charlie", month)
            .await
            .unwrap();

        let global = repo.top_n(GLOBAL_SCOPE, month, 10).await.unwrap();
        let names: Vec<_> = global.iter().map(|r| r.streamer_name.as_str()).collect();
        assert_eq!(names, ["alpha", "bravo", "charlie"]);
        assert_eq!(global[0].live_count, 2);
        assert_eq!(global[0].server_count, Some(2));
        assert_eq!(global[1].server_count, Some(1));

        let guild = repo.top_n(&guild_scope(1), month, 1).await.unwrap();
        assert_eq!(guild.len(), 1);
        assert_eq!(guild[0].streamer_name, "alpha");
        assert_eq!(guild[0].server_count, None);
    }

    #[tokio::test]
    async fn test_purge_before() {
        let repo = SqlxLeaderboardRepository::new(test_pool().await);
        let scopes = vec![GLOBAL_SCOPE.to_string()];
        repo.increment(&scopes, "alpha", "2024-12").await.unwrap();
        repo.increment(&scopes, "alpha", "2025-01").await.unwrap();

        assert_eq!(repo.purge_before("2025-01").await.unwrap(), 1);
        assert_eq!(repo.count(GLOBAL_SCOPE, "alpha", "2025-01").await.unwrap(), 1);
    }
}
