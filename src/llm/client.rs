//! Retrying LLM client.
//!
//! Layers the shared policies over a single-attempt backend: rate
//! limiting, the error-rate breaker, bounded retries with jittered
//! backoff, and per-agent usage attribution for the audit trail.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::limits;
use crate::error::{is_transient, AppForgeError, Result};
use crate::llm::breaker::ErrorRateBreaker;
use crate::llm::types::{ChatBackend, ChatOutcome, Message};
use crate::ratelimit::RateLimiter;
use crate::types::AgentKind;

/// LLM client used by all four agents.
pub struct LlmClient {
    backend: Box<dyn ChatBackend>,
    limiter: RateLimiter,
    breaker: ErrorRateBreaker,
    request_timeout: Duration,
}

impl LlmClient {
    #[must_use]
    pub fn new(
        backend: Box<dyn ChatBackend>,
        limiter: RateLimiter,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            limiter,
            breaker: ErrorRateBreaker::default(),
            request_timeout,
        }
    }

    /// Perform one chat round-trip with retries.
    ///
    /// Up to `MAX_RATE_LIMIT_RETRIES` attempts total. 429 responses back
    /// off along the 1s/2s/4s schedule; 5xx, timeouts, and network
    /// failures are retried at most once after the server delay. All
    /// delays get ±25% jitter and a 100 ms floor. Non-transient errors
    /// surface on the first attempt.
    ///
    /// # Errors
    ///
    /// The last `AppForgeError` once retries are exhausted, or
    /// `AppForgeError::CircuitBreaker` when the error-rate window is full.
    pub async fn chat(&mut self, messages: &[Message], agent: AgentKind) -> Result<ChatOutcome> {
        let mut server_retry_used = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;
            self.breaker.check()?;

            debug!(agent = %agent, attempt, "invoking LLM backend");
            match self.backend.send(messages, self.request_timeout).await {
                Ok(outcome) => {
                    debug!(
                        agent = %agent,
                        prompt_tokens = outcome.usage.prompt_tokens,
                        completion_tokens = outcome.usage.completion_tokens,
                        "LLM call completed"
                    );
                    return Ok(outcome);
                }
                Err(err) => {
                    self.breaker.record(&err);

                    if !is_transient(&err) {
                        return Err(err);
                    }

                    let retries_remain = attempt < limits::MAX_RATE_LIMIT_RETRIES;
                    if err.status_code() == Some(429) {
                        if !retries_remain {
                            return Err(err);
                        }
                        let base = rate_limit_delay(attempt);
                        let delay = jittered(base);
                        warn!(agent = %agent, attempt, delay_ms = delay.as_millis() as u64,
                            "rate limited, backing off");
                        tokio::time::sleep(delay).await;
                    } else {
                        // 5xx, timeout, or network failure: one retry.
                        if server_retry_used || !retries_remain {
                            return Err(err);
                        }
                        server_retry_used = true;
                        let delay = jittered(limits::SERVER_ERROR_DELAY);
                        warn!(agent = %agent, attempt, error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "transient provider failure, retrying once");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

}

/// Backoff delay for the given 1-based attempt number.
fn rate_limit_delay(attempt: u32) -> Duration {
    let index = (attempt as usize - 1).min(limits::RATE_LIMIT_BASE_DELAYS.len() - 1);
    limits::RATE_LIMIT_BASE_DELAYS[index]
}

/// Apply ±`JITTER_FRACTION` uniform jitter, clamped to the delay floor.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng()
        .gen_range(1.0 - limits::JITTER_FRACTION..=1.0 + limits::JITTER_FRACTION);
    let jittered = base.mul_f64(factor);
    jittered.max(limits::MIN_RETRY_DELAY)
}

/// Scripted backend for tests.
///
/// Test seam; not part of public API stability guarantees.
#[doc(hidden)]
pub mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::orchestrator::AbortFlag;
    use crate::types::TokenUsage;

    /// One scripted reply: either model text with usage, or an error.
    pub enum ScriptedReply {
        Content(String, TokenUsage),
        Error(fn() -> AppForgeError),
    }

    struct Inner {
        replies: Mutex<VecDeque<ScriptedReply>>,
        transcript: Mutex<Vec<Vec<Message>>>,
        abort_after: Option<(usize, AbortFlag)>,
    }

    /// Backend that pops pre-programmed replies in order and records the
    /// prompts it was sent. Panics when the script runs dry, which turns
    /// an unexpected extra call into a test failure. Clones share state,
    /// so a test can keep one handle to inspect the transcript.
    #[derive(Clone)]
    pub struct ScriptedBackend {
        inner: Arc<Inner>,
    }

    impl ScriptedBackend {
        #[must_use]
        pub fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                inner: Arc::new(Inner {
                    replies: Mutex::new(replies.into_iter().collect()),
                    transcript: Mutex::new(Vec::new()),
                    abort_after: None,
                }),
            }
        }

        /// Request abort on `flag` right after the `nth` (1-based) reply
        /// is served, simulating a signal landing mid-pipeline.
        #[must_use]
        pub fn with_abort_after(replies: Vec<ScriptedReply>, nth: usize, flag: AbortFlag) -> Self {
            Self {
                inner: Arc::new(Inner {
                    replies: Mutex::new(replies.into_iter().collect()),
                    transcript: Mutex::new(Vec::new()),
                    abort_after: Some((nth, flag)),
                }),
            }
        }

        /// Prompts received so far, one entry per call.
        #[must_use]
        pub fn transcript(&self) -> Vec<Vec<Message>> {
            self.inner.transcript.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn send(&self, messages: &[Message], _timeout: Duration) -> Result<ChatOutcome> {
            let call_index = {
                let mut transcript = self.inner.transcript.lock().unwrap();
                transcript.push(messages.to_vec());
                transcript.len()
            };

            let reply = self
                .inner
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted backend ran out of replies");

            if let Some((nth, flag)) = &self.inner.abort_after {
                if call_index == *nth {
                    flag.request();
                }
            }

            match reply {
                ScriptedReply::Content(content, usage) => Ok(ChatOutcome { content, usage }),
                ScriptedReply::Error(make) => Err(make()),
            }
        }
    }
}
