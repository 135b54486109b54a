//! Monthly go-live leaderboard.
//!
//! Every new live session adds one to the global counter and one to the
//! counter of each subscribing guild. Counters are keyed by the UTC month
//! at increment time, so a new month starts from zero without a reset job.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::Result;
use crate::database::repositories::{GLOBAL_SCOPE, LeaderboardRepository, guild_scope};
use crate::domain::{ChannelName, MonthKey};

/// Which counter set to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LeaderboardScope {
    /// One count per session, however many guilds subscribe.
    Global,
    Guild(i64),
}

impl LeaderboardScope {
    fn key(self) -> String {
        match self {
            Self::Global => GLOBAL_SCOPE.to_string(),
            Self::Guild(id) => guild_scope(id),
        }
    }
}

impl fmt::Display for LeaderboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// One ranked leaderboard line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub channel: ChannelName,
    pub live_count: u64,
    /// Guilds that counted this channel in the month; global scope only.
    pub server_count: Option<u64>,
}

pub struct LeaderboardAggregator {
    repo: Arc<dyn LeaderboardRepository>,
}

impl LeaderboardAggregator {
    pub fn new(repo: Arc<dyn LeaderboardRepository>) -> Self {
        Self { repo }
    }

    /// Count one session of `channel` for the global scope and each guild.
    ///
    /// Must be called once per session, never per tick.
    pub async fn record_session(
        &self,
        channel: &ChannelName,
        guild_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<MonthKey> {
        let month = MonthKey::from_datetime(at);
        let guilds: BTreeSet<i64> = guild_ids.iter().copied().collect();

        let mut scopes = Vec::with_capacity(guilds.len() + 1);
        scopes.push(LeaderboardScope::Global.key());
        scopes.extend(guilds.into_iter().map(|id| LeaderboardScope::Guild(id).key()));

        self.repo
            .increment(&scopes, channel.as_str(), &month.to_string())
            .await?;
        debug!(channel = %channel, month = %month, scopes = scopes.len(), "Leaderboard session recorded");
        Ok(month)
    }

    pub async fn top_n(
        &self,
        scope: LeaderboardScope,
        month: MonthKey,
        n: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        let rows = self.repo.top_n(&scope.key(), &month.to_string(), n).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| LeaderboardEntry {
                rank: i + 1,
                channel: ChannelName::from_trusted(row.streamer_name),
                live_count: row.live_count.max(0) as u64,
                server_count: row.server_count.map(|c| c.max(0) as u64),
            })
            .collect())
    }

    pub async fn count(
        &self,
        scope: LeaderboardScope,
        channel: &ChannelName,
        month: MonthKey,
    ) -> Result<u64> {
        let count = self
            .repo
            .count(&scope.key(), channel.as_str(), &month.to_string())
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxLeaderboardRepository;
    use crate::database::test_pool;
    use chrono::TimeZone;

    async fn aggregator() -> LeaderboardAggregator {
        LeaderboardAggregator::new(Arc::new(SqlxLeaderboardRepository::new(test_pool().await)))
    }

    fn march() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_global_counts_sessions_not_guilds() {
        let board = aggregator().await;
        let alpha = ChannelName::from_trusted("alpha");

        let month = board.record_session(&alpha, &[1, 2], march()).await.unwrap();
        assert_eq!(month.to_string(), "2025-03");

        assert_eq!(board.count(LeaderboardScope::Global, &alpha, month).await.unwrap(), 1);
        assert_eq!(board.count(LeaderboardScope::Guild(1), &alpha, month).await.unwrap(), 1);
        assert_eq!(board.count(LeaderboardScope::Guild(2), &alpha, month).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_guild_ids_count_once() {
        let board = aggregator().await;
        let alpha = ChannelName::from_trusted("alpha");
        let month = board.record_session(&alpha, &[7, 7], march()).await.unwrap();
        assert_eq!(board.count(LeaderboardScope::Guild(7), &alpha, month).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_other_month_reads_zero() {
        let board = aggregator().await;
        let alpha = ChannelName::from_trusted("alpha");
        let month = board.record_session(&alpha, &[1], march()).await.unwrap();

        assert_eq!(
            board
                .count(LeaderboardScope::Global, &alpha, month.previous())
                .await
                .unwrap(),
            0
        );
        assert!(
            board
                .top_n(LeaderboardScope::Global, month.previous(), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_top_n_ranks() {
        let board = aggregator().await;
        let alpha = ChannelName::from_trusted("alpha");
        let bravo = ChannelName::from_trusted("bravo");
        board.record_session(&bravo, &[1], march()).await.unwrap();
        board.record_session(&alpha, &[1, 2], march()).await.unwrap();
        board.record_session(&alpha, &[1, 2], march()).await.unwrap();

        let month = MonthKey::from_datetime(march());
        let global = board.top_n(LeaderboardScope::Global, month, 10).await.unwrap();
        assert_eq!(global.len(), 2);
        assert_eq!(global[0].rank, 1);
        assert_eq!(global[0].channel, alpha);
        assert_eq!(global[0].live_count, 2);
        assert_eq!(global[0].server_count, Some(2));
        assert_eq!(global[1].channel, bravo);
        assert_eq!(global[1].server_count, Some(1));

        let guild2 = board.top_n(LeaderboardScope::Guild(2), month, 10).await.unwrap();
        assert_eq!(guild2.len(), 1);
        assert_eq!(guild2[0].server_count, None);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(LeaderboardScope::Global.to_string(), "global");
        assert_eq!(LeaderboardScope::Guild(42).to_string(), "guild:42");
    }
}
