//! Runtime configuration and hard limits.
//!
//! Tunables come from environment variables (there is no config file);
//! hard limits that define the system's safety envelope are constants and
//! deliberately not overridable.

use std::time::Duration;

use crate::error::{AppForgeError, Result};

/// Environment variable carrying the LLM API key. Required for runs.
pub const API_KEY_ENV: &str = "APPFORGE_API_KEY";

/// Environment variable overriding the state root directory.
pub const STATE_ROOT_ENV: &str = "APPFORGE_STATE_ROOT";

/// Hard limits enforced by the orchestrator and the state store.
pub mod limits {
    use std::time::Duration;

    /// Maximum attempts for one step (Coder + Critic cycle).
    pub const MAX_STEP_RETRIES: u32 = 3;

    /// Consecutive transient failures before the failure breaker trips.
    pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

    /// Consecutive Critic rejections before the feedback-loop breaker
    /// trips (2 x `CONSECUTIVE_FAILURE_LIMIT`).
    pub const FEEDBACK_LOOP_LIMIT: u32 = 2 * CONSECUTIVE_FAILURE_LIMIT;

    /// Maximum LLM calls per task.
    pub const MAX_API_CALLS: u64 = 80;

    /// Maximum cumulative tokens (prompt + completion) per task.
    pub const MAX_TOTAL_TOKENS: u64 = 200_000;

    /// Wall-clock ceiling per task.
    pub const WALL_CLOCK_TIMEOUT: Duration = Duration::from_secs(90 * 60);

    /// Total attempts per LLM call, including the first.
    pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

    /// Backoff schedule for 429 responses, indexed by attempt.
    pub const RATE_LIMIT_BASE_DELAYS: [Duration; 3] = [
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4),
    ];

    /// Delay before the single retry after a 5xx, timeout, or network
    /// failure.
    pub const SERVER_ERROR_DELAY: Duration = Duration::from_secs(5);

    /// Uniform jitter applied to every backoff delay.
    pub const JITTER_FRACTION: f64 = 0.25;

    /// Floor for any jittered delay.
    pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Sliding window for the error-rate breaker.
    pub const API_ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

    /// Errors within the window before the error-rate breaker opens.
    pub const API_ERROR_RATE_LIMIT: usize = 5;

    /// Maximum size of one generated file.
    pub const MAX_FILE_SIZE_BYTES: usize = 50 * 1024;

    /// Fraction of the file-size limit at which a warning is logged.
    pub const FILE_SIZE_WARN_FRACTION: f64 = 0.8;

    /// Heartbeat write interval while a task is active.
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

    /// Minimum free disk space required at intake.
    pub const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024;
}

/// Default per-request deadline for LLM calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default chat-completions endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default model id.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default rate limiter settings: requests per minute and burst.
pub const DEFAULT_RATE_LIMIT_RPM: u32 = 30;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 5;

/// Default observer UI port.
pub const DEFAULT_UI_PORT: u16 = 7878;

/// Runtime configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the LLM provider.
    pub api_key: String,
    /// Chat-completions endpoint URL.
    pub api_base_url: String,
    /// Model id sent with every request.
    pub model: String,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Rate limiter refill rate, requests per minute.
    pub rate_limit_rpm: u32,
    /// Rate limiter burst capacity.
    pub rate_limit_burst: u32,
    /// Observer UI port.
    pub ui_port: u16,
    /// Raise log verbosity to debug.
    pub debug: bool,
}

impl Config {
    /// Resolve configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppForgeError::Validation` when the API key is missing or
    /// a numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            AppForgeError::Validation(format!(
                "LLM API key not found in environment variable '{API_KEY_ENV}'"
            ))
        })?;

        Ok(Self {
            api_key,
            api_base_url: std::env::var("APPFORGE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            model: std::env::var("APPFORGE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            request_timeout: Duration::from_secs(parse_env(
                "APPFORGE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
            rate_limit_rpm: parse_env("APPFORGE_RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?,
            rate_limit_burst: parse_env("APPFORGE_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?,
            ui_port: parse_env("APPFORGE_UI_PORT", DEFAULT_UI_PORT)?,
            debug: std::env::var("APPFORGE_DEBUG").is_ok_and(|v| v != "0" && !v.is_empty()),
        })
    }

    /// Configuration with placeholder credentials for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            api_key: "test-key".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_limit_rpm: 6000,
            rate_limit_burst: 100,
            ui_port: DEFAULT_UI_PORT,
            debug: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            AppForgeError::Validation(format!("Invalid value for {name}: '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}
