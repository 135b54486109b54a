//! Delivery transport boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DeliveryTarget, DisplayPreferences};
use crate::monitor::StreamSnapshot;

/// Errors from a delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("rate limited by transport (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The target channel is gone or not accessible.
    #[error("delivery target {channel_id} is missing or inaccessible")]
    MissingTarget { channel_id: i64 },

    #[error("unexpected transport response: {0}")]
    Decode(String),
}

/// Handle to a delivered message, used for later deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub i64);

/// Sends and retracts live notifications.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send_notification(
        &self,
        target: DeliveryTarget,
        session: &StreamSnapshot,
        preferences: &DisplayPreferences,
    ) -> Result<MessageRef, DeliveryError>;

    async fn delete_notification(
        &self,
        target: DeliveryTarget,
        message: MessageRef,
    ) -> Result<(), DeliveryError>;
}
