//! Go-live fan-out.
//!
//! One task per subscriber, bounded by a shared semaphore. A failed or
//! panicked delivery is recorded and reported; it never affects siblings.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::transport::{DeliveryTransport, MessageRef};
use crate::database::models::{NewNotificationLog, NotificationStatus};
use crate::database::repositories::NotificationRepository;
use crate::domain::{ChannelName, DeliveryTarget, Subscriber};
use crate::monitor::StreamSnapshot;

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub target: DeliveryTarget,
    pub result: Result<MessageRef, String>,
}

/// Summary of a fan-out.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub channel: ChannelName,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchReport {
    pub fn attempts(&self) -> usize {
        self.outcomes.len()
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempts() - self.delivered()
    }
}

/// Fans a go-live notification out to every subscriber.
pub struct NotificationDispatcher {
    transport: Arc<dyn DeliveryTransport>,
    repo: Arc<dyn NotificationRepository>,
    permits: Arc<Semaphore>,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        repo: Arc<dyn NotificationRepository>,
        max_concurrent_deliveries: usize,
    ) -> Self {
        Self {
            transport,
            repo,
            permits: Arc::new(Semaphore::new(max_concurrent_deliveries.max(1))),
        }
    }

    /// Deliver `session` to each subscriber exactly once.
    ///
    /// Never fails: delivery errors are in the report, bookkeeping errors
    /// are logged.
    pub async fn dispatch(&self, session: &StreamSnapshot, subscribers: &[Subscriber]) -> DispatchReport {
        let channel = session.channel.clone();
        if subscribers.is_empty() {
            return DispatchReport {
                channel,
                outcomes: Vec::new(),
            };
        }

        let session = Arc::new(session.clone());
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(subscribers.len());

        for subscriber in subscribers.iter().cloned() {
            let transport = self.transport.clone();
            let permits = self.permits.clone();
            let session = session.clone();
            let target = subscriber.target;
            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                transport
                    .send_notification(subscriber.target, &session, &subscriber.preferences)
                    .await
                    .map_err(|e| e.to_string())
            });
            pending.insert(handle.id(), (target, subscriber.preferences.auto_delete));
        }

        let mut outcomes = Vec::with_capacity(subscribers.len());
        let mut log = Vec::with_capacity(subscribers.len());

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    error!(channel = %channel, "Delivery task failed: {}", e);
                    (e.id(), Err(format!("delivery task failed: {e}")))
                }
            };
            let Some((target, auto_delete)) = pending.remove(&id) else {
                continue;
            };

            match &result {
                Ok(message) => debug!(
                    channel = %channel,
                    guild_id = target.guild_id,
                    message_id = message.0,
                    "Notification delivered"
                ),
                Err(e) => warn!(
                    channel = %channel,
                    guild_id = target.guild_id,
                    channel_id = target.channel_id,
                    "Notification delivery failed: {}",
                    e
                ),
            }

            log.push(NewNotificationLog {
                guild_id: target.guild_id,
                streamer_name: channel.as_str().to_string(),
                channel_id: target.channel_id,
                status: if result.is_ok() {
                    NotificationStatus::Sent
                } else {
                    NotificationStatus::Failed
                },
                error: result.as_ref().err().cloned(),
                retained_message_id: match &result {
                    Ok(message) if auto_delete => Some(message.0),
                    _ => None,
                },
            });
            outcomes.push(DeliveryOutcome { target, result });
        }

        outcomes.sort_by_key(|o| (o.target.guild_id, o.target.channel_id));

        if let Err(e) = self.repo.record_attempts(&log).await {
            warn!(channel = %channel, "Failed to record delivery attempts: {}", e);
        }

        let report = DispatchReport { channel, outcomes };
        info!(
            channel = %report.channel,
            delivered = report.delivered(),
            failed = report.failed(),
            "Go-live notification dispatched"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxNotificationRepository;
    use crate::database::test_pool;
    use crate::domain::DisplayPreferences;
    use crate::notification::testing::RecordingTransport;
    use chrono::Utc;

    fn session(name: &str) -> StreamSnapshot {
        StreamSnapshot {
            channel: ChannelName::from_trusted(name),
            display_name: name.to_string(),
            title: "title".to_string(),
            category: None,
            viewer_count: 1,
            started_at: Utc::now(),
            thumbnail_url: None,
            profile_image_url: None,
        }
    }

    fn subscriber(guild_id: i64, auto_delete: bool) -> Subscriber {
        Subscriber {
            guild_id,
            target: DeliveryTarget {
                guild_id,
                channel_id: guild_id * 10,
            },
            preferences: DisplayPreferences {
                auto_delete,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_one_attempt_per_subscriber() {
        let pool = test_pool().await;
        let repo = Arc::new(SqlxNotificationRepository::new(pool));
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = NotificationDispatcher::new(transport.clone(), repo.clone(), 2);

        let subs = vec![subscriber(1, false), subscriber(2, false), subscriber(3, false)];
        let report = dispatcher.dispatch(&session("alpha"), &subs).await;

        assert_eq!(report.attempts(), 3);
        assert_eq!(report.delivered(), 3);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(repo.list_log(2, "alpha", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let pool = test_pool().await;
        let repo = Arc::new(SqlxNotificationRepository::new(pool));
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_channel(20);
        let dispatcher = NotificationDispatcher::new(transport.clone(), repo.clone(), 4);

        let subs = vec![subscriber(1, false), subscriber(2, false), subscriber(3, false)];
        let report = dispatcher.dispatch(&session("alpha"), &subs).await;

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.outcomes[1].result.is_err());

        let log = repo.list_log(2, "alpha", 10).await.unwrap();
        assert_eq!(log[0].status(), Some(NotificationStatus::Failed));
        assert!(log[0].error.is_some());
    }

    #[tokio::test]
    async fn test_auto_delete_retains_message() {
        let pool = test_pool().await;
        let repo = Arc::new(SqlxNotificationRepository::new(pool));
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = NotificationDispatcher::new(transport, repo.clone(), 4);

        let subs = vec![subscriber(1, true), subscriber(2, false)];
        dispatcher.dispatch(&session("alpha"), &subs).await;

        let retained = repo.list_messages("alpha").await.unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].guild_id, 1);
        assert_eq!(retained[0].channel_id, 10);
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let pool = test_pool().await;
        let repo = Arc::new(SqlxNotificationRepository::new(pool));
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = NotificationDispatcher::new(transport.clone(), repo, 4);

        let report = dispatcher.dispatch(&session("alpha"), &[]).await;
        assert_eq!(report.attempts(), 0);
        assert!(transport.sent().is_empty());
    }
}
