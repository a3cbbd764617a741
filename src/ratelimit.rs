//! Token-bucket rate limiting for LLM calls.
//!
//! Single-consumer: the orchestrator serializes all calls, so the bucket
//! needs no interior locking. `acquire` never fails; it sleeps exactly as
//! long as needed for one token to become available.

use std::time::{Duration, Instant};

use tracing::debug;

/// Token bucket with burst capacity. Starts full.
#[derive(Debug)]
pub struct RateLimiter {
    tokens_per_interval: f64,
    interval: Duration,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Build a limiter that refills `tokens_per_interval` tokens every
    /// `interval`, holding at most `burst` tokens.
    #[must_use]
    pub fn new(tokens_per_interval: u32, interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            tokens_per_interval: f64::from(tokens_per_interval.max(1)),
            interval,
            burst,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    /// Limiter configured as requests-per-minute with burst.
    #[must_use]
    pub fn per_minute(requests: u32, burst: u32) -> Self {
        Self::new(requests, Duration::from_secs(60), burst)
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let wait = self.time_until_next_token();
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let gained = elapsed.as_secs_f64() / self.interval.as_secs_f64() * self.tokens_per_interval;
        if gained > 0.0 {
            self.tokens = (self.tokens + gained).min(self.burst);
            self.last_refill = now;
        }
    }

    /// Minimum time until the bucket holds at least one token.
    fn time_until_next_token(&self) -> Duration {
        let deficit = 1.0 - self.tokens;
        let seconds_per_token = self.interval.as_secs_f64() / self.tokens_per_interval;
        Duration::from_secs_f64((deficit * seconds_per_token).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_starts_full_and_burst_is_free() {
        let mut limiter = RateLimiter::per_minute(60, 3);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn exhausted_bucket_waits_for_refill() {
        // 20 tokens per 100 ms => one token every 5 ms.
        let mut limiter = RateLimiter::new(20, Duration::from_millis(100), 1);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(3));
    }

    #[tokio::test]
    async fn refill_is_capped_at_burst() {
        let mut limiter = RateLimiter::new(1000, Duration::from_millis(10), 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        // Third token cannot come from stored burst (capacity 2).
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
