//! Message and response types for the LLM client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::types::TokenUsage;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Raw model text plus provider-reported token usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutcome {
    pub content: String,
    pub usage: TokenUsage,
}

/// One attempt against the provider. The retrying client layers rate
/// limiting, the error-rate breaker, and backoff on top of this.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Perform a single request with the given per-request deadline.
    ///
    /// # Errors
    ///
    /// `AppForgeError::Api` for non-2xx and network failures (classified
    /// transient per status), `AppForgeError::Timeout` when the deadline
    /// expires.
    async fn send(&self, messages: &[Message], timeout: Duration) -> Result<ChatOutcome>;
}
