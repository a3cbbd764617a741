//! Sliding-window error-rate breaker for the LLM client.
//!
//! Tracks timestamps of serious API errors (non-transient failures and
//! 5xx responses). When too many land inside the window, further calls
//! are refused until the window drains. This guards against systemic
//! provider trouble; the orchestrator's consecutive-failure breaker
//! separately guards against local streaks.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::limits;
use crate::error::{AppForgeError, Result};

#[derive(Debug)]
pub struct ErrorRateBreaker {
    window: Duration,
    limit: usize,
    events: VecDeque<Instant>,
}

impl Default for ErrorRateBreaker {
    fn default() -> Self {
        Self::new(limits::API_ERROR_RATE_WINDOW, limits::API_ERROR_RATE_LIMIT)
    }
}

impl ErrorRateBreaker {
    #[must_use]
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            events: VecDeque::new(),
        }
    }

    /// Refuse the next attempt if the window already holds `limit` errors.
    ///
    /// # Errors
    ///
    /// Returns `AppForgeError::CircuitBreaker` while open.
    pub fn check(&mut self) -> Result<()> {
        self.prune(Instant::now());
        if self.events.len() >= self.limit {
            return Err(AppForgeError::CircuitBreaker(format!(
                "API error rate too high: {} errors in the last {}s",
                self.events.len(),
                self.window.as_secs()
            )));
        }
        Ok(())
    }

    /// Record an error if it counts toward the window: non-transient
    /// failures and 5xx responses.
    pub fn record(&mut self, err: &AppForgeError) {
        if Self::counts(err) {
            self.events.push_back(Instant::now());
        }
    }

    fn counts(err: &AppForgeError) -> bool {
        match err {
            AppForgeError::Api {
                status, transient, ..
            } => !transient || status.is_some_and(|s| (500..600).contains(&s)),
            AppForgeError::Timeout(_) => false,
            _ => true,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of errors currently inside the window.
    #[must_use]
    pub fn window_len(&mut self) -> usize {
        self.prune(Instant::now());
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_limit() {
        let mut breaker = ErrorRateBreaker::new(Duration::from_secs(60), 3);
        for _ in 0..3 {
            breaker.record(&AppForgeError::api_transient(503, "down"));
        }
        assert!(breaker.check().is_err());
    }

    #[test]
    fn stays_closed_below_limit() {
        let mut breaker = ErrorRateBreaker::new(Duration::from_secs(60), 3);
        breaker.record(&AppForgeError::api_transient(500, "down"));
        breaker.record(&AppForgeError::api_fatal(Some(401), "denied"));
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn transient_non_5xx_errors_do_not_count() {
        let mut breaker = ErrorRateBreaker::new(Duration::from_secs(60), 1);
        breaker.record(&AppForgeError::api_transient(429, "limited"));
        breaker.record(&AppForgeError::Timeout(Duration::from_secs(120)));
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn old_events_fall_out_of_the_window() {
        let mut breaker = ErrorRateBreaker::new(Duration::from_millis(20), 1);
        breaker.record(&AppForgeError::api_transient(503, "down"));
        assert!(breaker.check().is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.window_len(), 0);
    }
}
