//! Critic agent: reviews one generated file, verdict plus issues.
//!
//! The Critic fails open: malformed output and transport failures both
//! degrade to ACCEPT with a warning. A noisy model may cost review
//! quality but must never wedge the pipeline permanently.

use serde_json::Value;
use tracing::warn;

use crate::agents::parse::extract_json;
use crate::error::{AppForgeError, Result};
use crate::llm::{LlmClient, Message};
use crate::types::{
    AgentKind, CriticDecision, CriticIssue, CriticOutput, Step, TaskSpec, TokenUsage,
};

const SYSTEM_PROMPT: &str = "You are a strict Android code reviewer. Review the file for \
correctness, completeness against its purpose, and consistency with the app specification. \
Respond with JSON only: {\"decision\": \"ACCEPT\"|\"REJECT\", \"issues\": [{\"severity\": \
\"BLOCKER\"|\"MAJOR\"|\"MINOR\", \"line\": int|null, \"message\": string}]}.";

/// Stateless wrapper around one review round-trip.
pub struct Critic;

impl Critic {
    /// Review `content` for `step`.
    ///
    /// # Errors
    ///
    /// Only budget and breaker errors propagate; API transport failures
    /// and malformed output degrade to `{ACCEPT, []}`.
    pub async fn review_file(
        client: &mut LlmClient,
        path: &str,
        content: &str,
        step: &Step,
        spec: &TaskSpec,
    ) -> Result<(CriticOutput, TokenUsage)> {
        let messages = Self::build_prompt(path, content, step, spec);
        match client.chat(&messages, AgentKind::Critic).await {
            Ok(outcome) => {
                let parsed = Self::parse_response(&outcome.content);
                Ok((parsed, outcome.usage))
            }
            Err(err @ (AppForgeError::Api { .. } | AppForgeError::Timeout(_))) => {
                warn!(path, error = %err, "critic transport failure, accepting by default");
                Ok((Self::accept_default(), TokenUsage::default()))
            }
            Err(other) => Err(other),
        }
    }

    fn build_prompt(path: &str, content: &str, step: &Step, spec: &TaskSpec) -> Vec<Message> {
        let spec_json =
            serde_json::to_string_pretty(spec).unwrap_or_else(|_| "<unserializable>".to_string());
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "App specification:\n{spec_json}\n\nFile: {path}\nPurpose: {}\n\nContent:\n{content}",
                step.description
            )),
        ]
    }

    /// Parse the review. Any shape violation falls back to ACCEPT.
    fn parse_response(content: &str) -> CriticOutput {
        let Ok(value) = serde_json::from_str::<Value>(extract_json(content)) else {
            warn!("critic response is not JSON, accepting by default");
            return Self::accept_default();
        };

        let Some(decision) = value
            .get("decision")
            .and_then(Value::as_str)
            .and_then(CriticDecision::parse)
        else {
            warn!("critic response has no valid decision, accepting by default");
            return Self::accept_default();
        };

        let issues = match value.get("issues") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value::<CriticIssue>(item.clone()).ok())
                .collect(),
            Some(_) => {
                warn!("critic issues is not an array, accepting by default");
                return Self::accept_default();
            }
        };

        CriticOutput { decision, issues }
    }

    fn accept_default() -> CriticOutput {
        CriticOutput {
            decision: CriticDecision::Accept,
            issues: Vec::new(),
        }
    }
}
