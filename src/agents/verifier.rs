//! Verifier agent: whole-project review after all steps are accepted.

use tracing::warn;

use crate::agents::parse::extract_json;
use crate::error::Result;
use crate::llm::{LlmClient, Message};
use crate::types::{AgentKind, TaskSpec, TokenUsage, VerifierReport};

const SYSTEM_PROMPT: &str = "You are an Android project auditor. Given the generated file list \
and the app specification, report gaps. Respond with JSON only: {\"warnings\": [string], \
\"missing_items\": [string], \"quality_score\": number between 0 and 1}.";

/// Stateless wrapper around one verification round-trip.
pub struct Verifier;

impl Verifier {
    /// Audit the generated project.
    ///
    /// # Errors
    ///
    /// Propagates client errors. A malformed response degrades to the
    /// default report (`quality_score` 0.5, empty lists).
    pub async fn verify_project(
        client: &mut LlmClient,
        files: &[String],
        spec: &TaskSpec,
    ) -> Result<(VerifierReport, TokenUsage)> {
        let messages = Self::build_prompt(files, spec);
        let outcome = client.chat(&messages, AgentKind::Verifier).await?;
        let report = Self::parse_response(&outcome.content);
        Ok((report, outcome.usage))
    }

    fn build_prompt(files: &[String], spec: &TaskSpec) -> Vec<Message> {
        let spec_json =
            serde_json::to_string_pretty(spec).unwrap_or_else(|_| "<unserializable>".to_string());
        let listing = files.join("\n");
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "App specification:\n{spec_json}\n\nGenerated files:\n{listing}"
            )),
        ]
    }

    fn parse_response(content: &str) -> VerifierReport {
        match serde_json::from_str::<VerifierReport>(extract_json(content)) {
            Ok(mut report) => {
                report.quality_score = report.quality_score.clamp(0.0, 1.0);
                report
            }
            Err(e) => {
                warn!(error = %e, "verifier response malformed, using default report");
                VerifierReport::default()
            }
        }
    }
}
