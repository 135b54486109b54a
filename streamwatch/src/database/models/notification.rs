//! Notification bookkeeping database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A sent message kept around so it can be deleted when the stream ends.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct NotificationMessageDbModel {
    pub id: i64,
    pub guild_id: i64,
    pub streamer_name: String,
    pub channel_id: i64,
    pub message_id: i64,
    pub sent_at: i64,
}

/// One delivery attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLogDbModel {
    pub id: i64,
    pub guild_id: i64,
    pub streamer_name: String,
    pub channel_id: i64,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: i64,
}

impl NotificationLogDbModel {
    pub fn status(&self) -> Option<NotificationStatus> {
        NotificationStatus::parse(&self.status)
    }
}

/// Delivery attempt outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Insert payload for a delivery attempt.
#[derive(Debug, Clone)]
pub struct NewNotificationLog {
    pub guild_id: i64,
    pub streamer_name: String,
    pub channel_id: i64,
    pub status: NotificationStatus,
    pub error: Option<String>,
    /// Present when the message should be retracted on offline.
    pub retained_message_id: Option<i64>,
}
