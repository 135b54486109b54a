//! Token bucket pacing for upstream batch calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

/// Configuration for a rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens (burst capacity).
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Initial tokens.
    pub initial_tokens: u32,
}

impl Default for RateLimiterConfig {
    /// Helix allows 800 points per minute; stay well below it.
    fn default() -> Self {
        Self {
            max_tokens: 8,
            refill_rate: 4.0,
            initial_tokens: 8,
        }
    }
}

impl RateLimiterConfig {
    /// Config for a requests-per-second limit with a 2x burst.
    pub fn with_rps(rps: f64) -> Result<Self, crate::Error> {
        if !rps.is_finite() || rps <= 0.0 {
            return Err(crate::Error::config(format!(
                "rate limit must be a positive finite number, got {}",
                rps
            )));
        }

        let max_tokens = (rps * 2.0).ceil().max(1.0) as u32;

        Ok(Self {
            max_tokens,
            refill_rate: rps,
            initial_tokens: max_tokens,
        })
    }
}

/// Token bucket.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    max_tokens: u32,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            tokens: config.initial_tokens as f64,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate)
            .min(self.max_tokens as f64);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }
}

/// Shareable token bucket rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(Bucket::new(&config))),
        }
    }

    /// Returns `true` if a token was acquired.
    pub fn try_acquire(&self) -> bool {
        self.bucket.lock().try_take().is_ok()
    }

    /// Acquire a token, waiting if necessary. Returns the time waited.
    ///
    /// Cancel-safe: the lock is never held across the sleep, and a dropped
    /// future consumes no token.
    pub async fn acquire(&self) -> Duration {
        let mut total_wait = Duration::ZERO;

        loop {
            let wait = match self.bucket.lock().try_take() {
                Ok(()) => return total_wait,
                Err(wait) => wait,
            };

            trace!(wait = ?wait, "rate limited");
            tokio::time::sleep(wait).await;
            total_wait += wait;
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill();
        bucket.tokens
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
