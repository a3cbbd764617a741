//! Coder agent: one plan step in, raw file content out.

use tracing::warn;

use crate::config::limits::MAX_FILE_SIZE_BYTES;
use crate::error::Result;
use crate::llm::{LlmClient, Message};
use crate::types::{AgentKind, CriticIssue, Step, TaskSpec, TokenUsage};

const SYSTEM_PROMPT: &str = "You are an expert Android developer. You write the complete content \
of exactly one file. Respond with the raw file content only: no markdown fences, no commentary.";

/// Stateless wrapper around one file-generation round-trip.
pub struct Coder;

impl Coder {
    /// Generate the file for `step`. On retries the orchestrator passes
    /// the previous Critic issues, which are folded into the prompt to
    /// focus the next attempt.
    ///
    /// # Errors
    ///
    /// Propagates client errors unchanged; the orchestrator classifies
    /// them for retry.
    pub async fn generate_file(
        client: &mut LlmClient,
        step: &Step,
        spec: &TaskSpec,
        completed_files: &[String],
        prior_issues: Option<&[CriticIssue]>,
    ) -> Result<(String, TokenUsage)> {
        let messages = Self::build_prompt(step, spec, completed_files, prior_issues);
        let outcome = client.chat(&messages, AgentKind::Coder).await?;
        let content = Self::truncate_oversized(outcome.content, &step.file_path);
        Ok((content, outcome.usage))
    }

    fn build_prompt(
        step: &Step,
        spec: &TaskSpec,
        completed_files: &[String],
        prior_issues: Option<&[CriticIssue]>,
    ) -> Vec<Message> {
        let spec_json =
            serde_json::to_string_pretty(spec).unwrap_or_else(|_| "<unserializable>".to_string());

        let mut user = format!(
            "App specification:\n{spec_json}\n\nGenerate file '{}' ({:?}).\nPurpose: {}\n",
            step.file_path, step.file_type, step.description
        );

        if completed_files.is_empty() {
            user.push_str("\nNo files have been generated yet.\n");
        } else {
            user.push_str("\nAlready generated files:\n");
            for path in completed_files {
                user.push_str("- ");
                user.push_str(path);
                user.push('\n');
            }
        }

        if let Some(issues) = prior_issues.filter(|i| !i.is_empty()) {
            user.push_str("\nYour previous attempt was rejected. Fix these issues:\n");
            for issue in issues {
                match issue.line {
                    Some(line) => user.push_str(&format!(
                        "- [{:?}] line {line}: {}\n",
                        issue.severity, issue.message
                    )),
                    None => {
                        user.push_str(&format!("- [{:?}] {}\n", issue.severity, issue.message));
                    }
                }
            }
        }

        vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
    }

    /// Clamp oversized output to the file-size limit on a char boundary.
    fn truncate_oversized(content: String, path: &str) -> String {
        if content.len() <= MAX_FILE_SIZE_BYTES {
            return content;
        }
        warn!(
            path,
            bytes = content.len(),
            limit = MAX_FILE_SIZE_BYTES,
            "coder output exceeds file size limit, truncating"
        );
        let mut cut = MAX_FILE_SIZE_BYTES;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut truncated = content;
        truncated.truncate(cut);
        truncated
    }
}
