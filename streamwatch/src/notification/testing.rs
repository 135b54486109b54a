//! In-memory transport for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::transport::{DeliveryError, DeliveryTransport, MessageRef};
use crate::domain::{DeliveryTarget, DisplayPreferences};
use crate::monitor::StreamSnapshot;

/// Records every call; fails for configured channel ids.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(DeliveryTarget, String, MessageRef)>>,
    deleted: Mutex<Vec<(DeliveryTarget, MessageRef)>>,
    failing: Mutex<HashSet<i64>>,
    next_id: AtomicI64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn fail_channel(&self, channel_id: i64) {
        self.failing.lock().insert(channel_id);
    }

    /// (target, channel name, message) per successful send.
    pub fn sent(&self) -> Vec<(DeliveryTarget, String, MessageRef)> {
        self.sent.lock().clone()
    }

    pub fn deleted(&self) -> Vec<(DeliveryTarget, MessageRef)> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn send_notification(
        &self,
        target: DeliveryTarget,
        session: &StreamSnapshot,
        _preferences: &DisplayPreferences,
    ) -> Result<MessageRef, DeliveryError> {
        if self.failing.lock().contains(&target.channel_id) {
            return Err(DeliveryError::MissingTarget {
                channel_id: target.channel_id,
            });
        }
        let message = MessageRef(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sent
            .lock()
            .push((target, session.channel.as_str().to_string(), message));
        Ok(message)
    }

    async fn delete_notification(
        &self,
        target: DeliveryTarget,
        message: MessageRef,
    ) -> Result<(), DeliveryError> {
        if self.failing.lock().contains(&target.channel_id) {
            return Err(DeliveryError::Http {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        self.deleted.lock().push((target, message));
        Ok(())
    }
}
