//! Batched live-status checks.
//!
//! Splits the channel set into upstream-sized chunks, runs them with bounded
//! concurrency and merges the answers. A failed chunk never turns into
//! "offline": its channels are simply absent from [`BatchOutcome::checked`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::backoff::UpstreamBackoff;
use super::rate_limiter::RateLimiter;
use super::source::{LiveStatusSource, SourceError, StreamSnapshot};
use crate::domain::ChannelName;

/// Merged result of one tick's upstream calls.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Live channels with their session metadata.
    pub live: HashMap<ChannelName, StreamSnapshot>,
    /// Every channel whose batch succeeded (live or not).
    pub checked: HashSet<ChannelName>,
    /// Chunks that could not be checked.
    pub failures: Vec<BatchFailure>,
    /// Upstream calls made, retries included.
    pub calls: usize,
}

impl BatchOutcome {
    pub fn failed_channel_count(&self) -> usize {
        self.failures.iter().map(|f| f.channels.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A chunk that could not be checked this tick.
#[derive(Debug)]
pub struct BatchFailure {
    pub channels: Vec<ChannelName>,
    pub error: String,
    pub transient: bool,
}

enum ChunkError {
    /// Upstream is in a backoff window; no call was made.
    Suppressed,
    Source(SourceError),
}

struct ChunkResult {
    channels: Vec<ChannelName>,
    calls: usize,
    result: Result<Vec<StreamSnapshot>, ChunkError>,
}

/// Batch detector for checking many channels at once.
pub struct BatchDetector {
    source: Arc<dyn LiveStatusSource>,
    rate_limiter: RateLimiter,
    backoff: Arc<UpstreamBackoff>,
    max_batch_size: usize,
    max_concurrent_batches: usize,
}

impl BatchDetector {
    pub fn new(source: Arc<dyn LiveStatusSource>, backoff: Arc<UpstreamBackoff>) -> Self {
        let max_batch_size = source.max_batch_size();
        Self {
            source,
            rate_limiter: RateLimiter::default(),
            backoff,
            max_batch_size,
            max_concurrent_batches: 4,
        }
    }

    /// Set the maximum batch size; never above what the source accepts.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, self.source.max_batch_size().max(1));
        self
    }

    pub fn with_max_concurrent_batches(mut self, n: usize) -> Self {
        self.max_concurrent_batches = n.max(1);
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Check every channel in `channels`.
    pub async fn check_all(&self, channels: &[ChannelName]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if channels.is_empty() {
            return outcome;
        }

        // Owned chunks keep the stream future `Send` for spawned ticks.
        let chunks: Vec<Vec<ChannelName>> = channels
            .chunks(self.max_batch_size)
            .map(<[ChannelName]>::to_vec)
            .collect();

        let chunk_results: Vec<ChunkResult> = stream::iter(chunks)
            .map(|chunk| async move { self.check_chunk(chunk).await })
            .buffer_unordered(self.max_concurrent_batches)
            .collect()
            .await;

        let mut transient_failure = false;
        for chunk in chunk_results {
            outcome.calls += chunk.calls;
            match chunk.result {
                Ok(snapshots) => {
                    let requested: HashSet<&ChannelName> = chunk.channels.iter().collect();
                    for snapshot in snapshots {
                        if requested.contains(&snapshot.channel) {
                            outcome.live.insert(snapshot.channel.clone(), snapshot);
                        } else {
                            debug!(channel = %snapshot.channel, "Ignoring unrequested channel in batch response");
                        }
                    }
                    outcome.checked.extend(chunk.channels);
                }
                Err(ChunkError::Suppressed) => {
                    outcome.failures.push(BatchFailure {
                        channels: chunk.channels,
                        error: "upstream backoff in effect".to_string(),
                        transient: true,
                    });
                }
                Err(ChunkError::Source(e)) => {
                    let transient = e.is_transient();
                    transient_failure |= transient;
                    warn!(
                        channels = chunk.channels.len(),
                        transient,
                        error = %e,
                        "Batch live-status check failed"
                    );
                    outcome.failures.push(BatchFailure {
                        channels: chunk.channels,
                        error: e.to_string(),
                        transient,
                    });
                }
            }
        }

        // Ticks that made no call say nothing about upstream health.
        if transient_failure {
            self.backoff.record_failure();
        } else if outcome.calls > 0 {
            self.backoff.record_success();
        }

        debug!(
            checked = outcome.checked.len(),
            live = outcome.live.len(),
            failed = outcome.failed_channel_count(),
            calls = outcome.calls,
            "Batch check complete"
        );

        outcome
    }

    async fn check_chunk(&self, channels: Vec<ChannelName>) -> ChunkResult {
        if let Some(remaining) = self.backoff.blocked_for() {
            debug!(remaining = ?remaining, "Skipping batch during upstream backoff");
            return ChunkResult {
                channels,
                calls: 0,
                result: Err(ChunkError::Suppressed),
            };
        }

        let mut calls = 1;
        let mut result = self.call(&channels).await;

        if matches!(result, Err(SourceError::AuthExpired)) {
            debug!("Upstream auth expired, refreshing and retrying batch once");
            result = match self.source.refresh_auth().await {
                Ok(()) => {
                    calls += 1;
                    self.call(&channels).await
                }
                Err(e) => Err(e),
            };
        }

        if let Err(e) = &result
            && let Some(retry_after) = e.retry_after()
        {
            self.backoff.note_rate_limit(retry_after);
        }

        ChunkResult {
            channels,
            calls,
            result: result.map_err(ChunkError::Source),
        }
    }

    async fn call(&self, chunk: &[ChannelName]) -> Result<Vec<StreamSnapshot>, SourceError> {
        let waited = self.rate_limiter.acquire().await;
        if !waited.is_zero() {
            debug!("Rate limited for {:?}", waited);
        }
        self.source.get_live_status(chunk).await
    }
}
