//! Closed error taxonomy for the pipeline.
//!
//! Every failure surfaced by a component is one of these kinds. The
//! `transient` notion drives retry decisions in the LLM client and the
//! orchestrator: transient errors are eligible for bounded retry, all
//! others fail the current operation immediately.

use std::time::Duration;
use thiserror::Error;

/// Budget dimension that was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    WallClock,
    ApiCalls,
    Tokens,
}

impl LimitType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WallClock => "wall_clock",
            Self::ApiCalls => "api_calls",
            Self::Tokens => "tokens",
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type returned by library operations.
#[derive(Error, Debug)]
pub enum AppForgeError {
    /// Input, plan, or path violates a stated contract. Fatal.
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP non-2xx or network failure from the LLM provider.
    #[error("API error{}: {message}", status_label(.status))]
    Api {
        status: Option<u16>,
        message: String,
        transient: bool,
    },

    /// Per-request deadline expired. Transient.
    #[error("Request timed out after {:?}", .0)]
    Timeout(Duration),

    /// A task budget was breached; carries the dimension.
    #[error("{message}")]
    LimitExceeded {
        limit_type: LimitType,
        message: String,
    },

    /// One of the three breakers tripped.
    #[error("Circuit breaker open: {0}")]
    CircuitBreaker(String),

    /// Strict-mode verification failed.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Signal- or operator-initiated abort.
    #[error("{0}")]
    Aborted(String),

    /// Another orchestrator holds the workspace lock.
    #[error("Another task is running (PID {pid})")]
    LockHeld { pid: u32 },

    /// Embedded database failure.
    #[error("State store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppForgeError {
    /// Build a transient API error for the given status.
    #[must_use]
    pub fn api_transient(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status: Some(status),
            message: message.into(),
            transient: true,
        }
    }

    /// Build a non-transient API error.
    #[must_use]
    pub fn api_fatal(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            transient: false,
        }
    }

    /// HTTP status carried by an API error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Short human message suitable for `Task.error_message`.
    #[must_use]
    pub fn short_message(&self) -> String {
        self.to_string()
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

/// Whether an error is eligible for retry.
///
/// API and timeout errors carry the flag directly. IO errors are
/// classified by inspecting well-known network failure substrings, since
/// the standard library does not tag them.
#[must_use]
pub fn is_transient(err: &AppForgeError) -> bool {
    match err {
        AppForgeError::Api { transient, .. } => *transient,
        AppForgeError::Timeout(_) => true,
        AppForgeError::Io(io) => {
            let text = io.to_string().to_lowercase();
            ["connection", "timed out", "reset by peer", "broken pipe", "network"]
                .iter()
                .any(|needle| text.contains(needle))
        }
        _ => false,
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppForgeError>;
