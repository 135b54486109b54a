//! Monitor events.
//!
//! Emitted by the reconciliation loop after each tick has committed its
//! state, so subscribers never observe a transition that was rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::ChannelName;

/// Events emitted by the Stream Monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// Channel started a new live session.
    ChannelLive {
        channel: ChannelName,
        title: String,
        category: Option<String>,
        started_at: DateTime<Utc>,
        /// Number of delivery attempts made for this session.
        deliveries: usize,
        timestamp: DateTime<Utc>,
    },
    /// Channel's live session ended.
    ChannelOffline {
        channel: ChannelName,
        timestamp: DateTime<Utc>,
    },
    /// A tick finished and its state was committed.
    TickCompleted {
        checked: usize,
        unchecked: usize,
        went_live: usize,
        went_offline: usize,
        timestamp: DateTime<Utc>,
    },
    /// A tick aborted before changing any state.
    TickFailed {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            MonitorEvent::ChannelLive { channel, title, .. } => {
                format!("{} is now live: {}", channel, title)
            }
            MonitorEvent::ChannelOffline { channel, .. } => {
                format!("{} went offline", channel)
            }
            MonitorEvent::TickCompleted {
                checked,
                unchecked,
                went_live,
                went_offline,
                ..
            } => {
                format!(
                    "tick checked {} channels ({} unknown): {} live, {} offline",
                    checked, unchecked, went_live, went_offline
                )
            }
            MonitorEvent::TickFailed { error, .. } => {
                format!("tick aborted: {}", error)
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MonitorEvent::ChannelLive { timestamp, .. }
            | MonitorEvent::ChannelOffline { timestamp, .. }
            | MonitorEvent::TickCompleted { timestamp, .. }
            | MonitorEvent::TickFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcaster for monitor events.
pub struct MonitorEventBroadcaster {
    sender: broadcast::Sender<MonitorEvent>,
}

impl MonitorEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Publish a monitor event.
    pub fn publish(
        &self,
        event: MonitorEvent,
    ) -> Result<usize, broadcast::error::SendError<MonitorEvent>> {
        self.sender.send(event)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MonitorEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MonitorEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_description() {
        let event = MonitorEvent::ChannelLive {
            channel: ChannelName::from_trusted("teststreamer"),
            title: "Playing Games".to_string(),
            category: Some("Gaming".to_string()),
            started_at: Utc::now(),
            deliveries: 2,
            timestamp: Utc::now(),
        };
        assert!(event.description().contains("teststreamer"));
        assert!(event.description().contains("Playing Games"));

        let failed = MonitorEvent::TickFailed {
            error: "database is locked".to_string(),
            timestamp: Utc::now(),
        };
        assert!(failed.description().contains("database is locked"));
    }

    #[tokio::test]
    async fn test_broadcaster() {
        let broadcaster = MonitorEventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        let event = MonitorEvent::ChannelOffline {
            channel: ChannelName::from_trusted("alpha_stream"),
            timestamp: Utc::now(),
        };
        broadcaster.publish(event.clone()).unwrap();

        assert_eq!(receiver.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_subscribers_errors() {
        let broadcaster = MonitorEventBroadcaster::default();
        let event = MonitorEvent::TickFailed {
            error: "x".to_string(),
            timestamp: Utc::now(),
        };
        assert!(broadcaster.publish(event).is_err());
    }
}
