//! Live-status source abstraction.
//!
//! The engine only ever asks one question of the streaming platform: which
//! of these channels are live right now. Everything else (tokens, HTTP,
//! pagination) stays behind [`LiveStatusSource`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ChannelName;

/// Errors from a live-status lookup.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The app token was rejected; a refresh may fix it.
    #[error("upstream authentication expired")]
    AuthExpired,

    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("batch of {len} names exceeds the upstream limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
}

impl SourceError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Errors that are expected to clear up by themselves.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::AuthExpired | Self::Decode(_) | Self::BatchTooLarge { .. } => false,
        }
    }

    /// Upstream-provided wait before the next call, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Metadata of one live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub channel: ChannelName,
    pub display_name: String,
    pub title: String,
    pub category: Option<String>,
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
    pub profile_image_url: Option<String>,
}

/// Batch live-status lookup.
#[async_trait]
pub trait LiveStatusSource: Send + Sync {
    /// Hard cap on names per `get_live_status` call.
    fn max_batch_size(&self) -> usize {
        100
    }

    /// Return a snapshot for every live channel in `names`.
    ///
    /// Channels missing from the result are offline. Callers must not pass
    /// more than [`max_batch_size`](Self::max_batch_size) names.
    async fn get_live_status(
        &self,
        names: &[ChannelName],
    ) -> Result<Vec<StreamSnapshot>, SourceError>;

    /// Obtain fresh credentials after an [`SourceError::AuthExpired`].
    async fn refresh_auth(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SourceError::AuthExpired.is_auth());
        assert!(!SourceError::AuthExpired.is_transient());
        assert!(SourceError::RateLimited { retry_after: None }.is_transient());
        assert!(
            SourceError::Http {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !SourceError::Http {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!SourceError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn test_retry_after() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(SourceError::AuthExpired.retry_after(), None);
    }
}
