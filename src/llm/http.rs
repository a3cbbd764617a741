//! HTTP chat-completions backend.
//!
//! One `reqwest` client configured per process, rustls TLS, bearer-token
//! auth. Each call is a single attempt: classification of non-2xx
//! statuses happens here, retry policy lives in the client layer.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppForgeError, Result};
use crate::llm::types::{ChatBackend, ChatOutcome, Message};
use crate::types::TokenUsage;

/// Connect timeout, independent of the per-request deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sampling parameters sent with every request.
const TEMPERATURE: f32 = 0.2;
const TOP_P: f32 = 0.9;
const MAX_COMPLETION_TOKENS: u32 = 4096;

/// HTTP backend for an OpenAI-compatible chat-completions endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpBackend {
    /// Build the backend from runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppForgeError::Validation` if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .build()
            .map_err(|e| {
                AppForgeError::Validation(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send(&self, messages: &[Message], timeout: Duration) -> Result<ChatOutcome> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            stream: false,
        };

        debug!(
            model = %self.model,
            message_count = messages.len(),
            timeout_secs = timeout.as_secs(),
            "issuing chat request"
        );

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text));
        }

        let envelope: ChatCompletionResponse = response.json().await.map_err(|e| {
            AppForgeError::api_fatal(None, format!("Failed to parse provider response: {e}"))
        })?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                AppForgeError::api_fatal(None, "Provider response contained no choices")
            })?;

        let usage = envelope
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ChatOutcome { content, usage })
    }
}

/// Map a reqwest transport failure onto the taxonomy.
fn classify_transport_error(err: &reqwest::Error, timeout: Duration) -> AppForgeError {
    if err.is_timeout() {
        AppForgeError::Timeout(timeout)
    } else {
        AppForgeError::Api {
            status: None,
            message: format!("network error: {err}"),
            transient: true,
        }
    }
}

/// Classify a non-2xx status per the retry policy table.
fn classify_status(status: StatusCode, body: &str) -> AppForgeError {
    let snippet: String = body.chars().take(200).collect();
    let code = status.as_u16();
    let transient = code == 429 || status.is_server_error();
    AppForgeError::Api {
        status: Some(code),
        message: format!("provider returned {status}: {snippet}"),
        transient,
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageBody>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct UsageBody {
    prompt_tokens: u64,
    completion_tokens: u64,
}
