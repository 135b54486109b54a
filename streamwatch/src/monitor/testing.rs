//! Scriptable live-status source for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::source::{LiveStatusSource, SourceError, StreamSnapshot};
use crate::domain::ChannelName;

#[derive(Default)]
pub struct FakeSource {
    live: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    batch_sizes: Mutex<Vec<usize>>,
    auth_failures_left: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live set.
    pub fn set_live(&self, names: &[&str]) {
        *self.live.lock() = names.iter().map(|n| n.to_string()).collect();
    }

    /// Fail (HTTP 503) every batch that contains `name`.
    pub fn fail_batches_containing(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Answer the next `n` calls with `AuthExpired`.
    pub fn expire_auth_for_calls(&self, n: usize) {
        self.auth_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Size of every call made, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn snapshot_for(name: &str) -> StreamSnapshot {
        StreamSnapshot {
            channel: ChannelName::from_trusted(name),
            display_name: name.to_string(),
            title: format!("{name} live"),
            category: Some("Just Chatting".to_string()),
            viewer_count: 100,
            started_at: Utc::now(),
            thumbnail_url: None,
            profile_image_url: None,
        }
    }
}

#[async_trait]
impl LiveStatusSource for FakeSource {
    async fn get_live_status(
        &self,
        names: &[ChannelName],
    ) -> Result<Vec<StreamSnapshot>, SourceError> {
        self.batch_sizes.lock().push(names.len());

        let auth_failed = self
            .auth_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if auth_failed {
            return Err(SourceError::AuthExpired);
        }

        {
            let failing = self.failing.lock();
            if names.iter().any(|n| failing.contains(n.as_str())) {
                return Err(SourceError::Http {
                    status: 503,
                    body: "service unavailable".to_string(),
                });
            }
        }

        let live = self.live.lock();
        Ok(names
            .iter()
            .filter(|n| live.contains(n.as_str()))
            .map(|n| Self::snapshot_for(n.as_str()))
            .collect())
    }

    async fn refresh_auth(&self) -> Result<(), SourceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
