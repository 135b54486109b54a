//! Retraction of go-live messages once a stream ends.

use std::sync::Arc;

use tracing::{debug, warn};

use super::transport::{DeliveryTransport, MessageRef};
use crate::Result;
use crate::database::repositories::NotificationRepository;
use crate::domain::{ChannelName, DeliveryTarget};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    /// Messages kept for the next attempt.
    pub failed: usize,
}

/// Deletes retained notifications of a channel that went offline.
#[derive(Clone)]
pub struct NotificationCleanup {
    transport: Arc<dyn DeliveryTransport>,
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationCleanup {
    pub fn new(transport: Arc<dyn DeliveryTransport>, repo: Arc<dyn NotificationRepository>) -> Self {
        Self { transport, repo }
    }

    /// Delete every retained message for `channel`.
    ///
    /// Records are dropped only for messages the transport confirmed gone;
    /// the rest are retried on the channel's next offline transition.
    pub async fn retract(&self, channel: &ChannelName) -> Result<CleanupReport> {
        let messages = self.repo.list_messages(channel.as_str()).await?;
        if messages.is_empty() {
            return Ok(CleanupReport::default());
        }

        let mut removed = Vec::with_capacity(messages.len());
        let mut report = CleanupReport::default();

        for message in messages {
            let target = DeliveryTarget {
                guild_id: message.guild_id,
                channel_id: message.channel_id,
            };
            match self
                .transport
                .delete_notification(target, MessageRef(message.message_id))
                .await
            {
                Ok(()) => {
                    removed.push(message.id);
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        channel = %channel,
                        guild_id = message.guild_id,
                        message_id = message.message_id,
                        "Failed to delete notification: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        self.repo.delete_messages(&removed).await?;
        debug!(channel = %channel, deleted = report.deleted, failed = report.failed, "Notification cleanup finished");
        Ok(report)
    }
}
