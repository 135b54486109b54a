//! Live session database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of `live_sessions`, the persisted mirror of the tracker's live set.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LiveSessionDbModel {
    pub streamer_name: String,
    pub user_name: String,
    pub started_at: i64,
    pub title: String,
    pub category: Option<String>,
    pub viewer_count: i64,
    pub thumbnail_url: Option<String>,
    pub profile_image_url: Option<String>,
    pub notified: bool,
    pub updated_at: i64,
}
