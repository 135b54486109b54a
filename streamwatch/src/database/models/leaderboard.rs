//! Leaderboard database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Ranked leaderboard row as returned by `top_n`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LeaderboardRankDbModel {
    pub streamer_name: String,
    pub live_count: i64,
    /// Only populated for the global scope.
    pub server_count: Option<i64>,
}
