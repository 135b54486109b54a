//! Backoff for a misbehaving upstream.
//!
//! While blocked, the batch detector makes no upstream calls and every
//! channel is reported as unchecked for the tick.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Upper bound on the computed backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
struct BackoffState {
    consecutive_failed_ticks: u32,
    blocked_until: Option<Instant>,
}

/// Tracks consecutive failed ticks and the resulting quiet period.
#[derive(Debug)]
pub struct UpstreamBackoff {
    base: Duration,
    max: Duration,
    state: Mutex<BackoffState>,
}

impl UpstreamBackoff {
    /// `base` is normally the poll interval.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            max: MAX_BACKOFF,
            state: Mutex::new(BackoffState::default()),
        }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Remaining quiet period, if any.
    pub fn blocked_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        let until = state.blocked_until?;
        until.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failed_ticks
    }

    /// Honour an upstream-provided reset time right away.
    pub fn note_rate_limit(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after.min(self.max);
        let mut state = self.state.lock();
        if state.blocked_until.is_none_or(|current| current < until) {
            state.blocked_until = Some(until);
        }
        warn!(retry_after = ?retry_after, "Upstream rate limit hit, pausing calls");
    }

    /// Record a tick with no transient upstream failures.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_failed_ticks > 0 {
            debug!(
                "Upstream recovered after {} failed ticks",
                state.consecutive_failed_ticks
            );
        }
        state.consecutive_failed_ticks = 0;
    }

    /// Record a tick with at least one transient upstream failure.
    ///
    /// The first failure is absorbed (the next tick retries normally); from
    /// the second consecutive one, calls pause for `base * 2^(n-2)` with
    /// ±25% jitter, capped at the maximum. Returns the pause applied.
    pub fn record_failure(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        state.consecutive_failed_ticks = state.consecutive_failed_ticks.saturating_add(1);
        let failures = state.consecutive_failed_ticks;
        if failures < 2 {
            return None;
        }

        let delay = calculate_backoff(self.base, failures - 2, self.max);
        let until = Instant::now() + delay;
        if state.blocked_until.is_none_or(|current| current < until) {
            state.blocked_until = Some(until);
        }
        warn!(
            consecutive_failures = failures,
            "Upstream failing, pausing calls for {:?}",
            delay
        );
        Some(delay)
    }
}

/// Exponential delay with ±25% jitter, capped at `max`.
pub fn calculate_backoff(base: Duration, exponent: u32, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;
    let exponential = base_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(max_ms);

    let jitter_range = exponential / 4;
    let jitter: i64 = if jitter_range > 0 {
        let random_val = rand::random::<u64>() % jitter_range.saturating_mul(2).max(1);
        random_val as i64 - jitter_range as i64
    } else {
        0
    };

    Duration::from_millis(exponential.saturating_add_signed(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_backoff() {
        let base = Duration::from_secs(1);
        let delay0 = calculate_backoff(base, 0, MAX_BACKOFF);
        assert!(delay0 >= Duration::from_millis(750));
        assert!(delay0 <= Duration::from_millis(1250));

        let delay1 = calculate_backoff(base, 1, MAX_BACKOFF);
        assert!(delay1 >= Duration::from_millis(1500));
        assert!(delay1 <= Duration::from_millis(2500));

        assert!(calculate_backoff(base, 40, MAX_BACKOFF) <= MAX_BACKOFF);
    }

    #[test]
    fn test_first_failure_is_absorbed() {
        let backoff = UpstreamBackoff::new(Duration::from_secs(90));
        assert_eq!(backoff.record_failure(), None);
        assert!(backoff.blocked_for().is_none());

        let delay = backoff.record_failure().unwrap();
        assert!(delay >= Duration::from_millis(67_500));
        assert!(backoff.blocked_for().is_some());
    }

    #[test]
    fn test_success_resets_counter() {
        let backoff = UpstreamBackoff::new(Duration::from_secs(90));
        backoff.record_failure();
        backoff.record_success();
        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.record_failure(), None);
    }

    #[test]
    fn test_rate_limit_blocks_immediately() {
        let backoff = UpstreamBackoff::new(Duration::from_secs(90));
        backoff.note_rate_limit(Duration::from_secs(30));
        let remaining = backoff.blocked_for().unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(25));
    }

    #[test]
    fn test_zero_rate_limit_does_not_block() {
        let backoff = UpstreamBackoff::new(Duration::from_secs(90));
        backoff.note_rate_limit(Duration::ZERO);
        assert!(backoff.blocked_for().is_none());
    }
}
