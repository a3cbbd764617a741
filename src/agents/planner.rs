//! Planner agent: task spec in, ordered file plan out.

use tracing::debug;

use crate::agents::parse::extract_json;
use crate::error::{AppForgeError, Result};
use crate::llm::{LlmClient, Message};
use crate::types::{AgentKind, Plan, TaskSpec, TokenUsage};

const SYSTEM_PROMPT: &str = "You are a senior Android architect. You break an app specification \
into an ordered list of file-generation steps. Respond with a JSON array only, no prose. Each \
element: {\"step_number\": int, \"phase\": \"SCAFFOLD\"|\"DATA\"|\"UI\"|\"WIRING\", \
\"file_path\": string (relative), \"file_type\": \"KOTLIN\"|\"XML\"|\"GRADLE\"|\"OTHER\", \
\"dependencies\": [int], \"description\": string}. Between 1 and 25 steps, numbered from 1, \
each dependency referring to an earlier step.";

/// Stateless wrapper around one planning round-trip.
pub struct Planner;

impl Planner {
    /// Ask the model for a plan and parse it strictly.
    ///
    /// # Errors
    ///
    /// Propagates client errors; a malformed response surfaces as
    /// `AppForgeError::Validation` (planning has no fail-open: every
    /// later stage depends on a well-formed plan).
    pub async fn create_plan(
        client: &mut LlmClient,
        spec: &TaskSpec,
    ) -> Result<(Plan, TokenUsage)> {
        let messages = Self::build_prompt(spec);
        let outcome = client.chat(&messages, AgentKind::Planner).await?;
        let plan = Self::parse_response(&outcome.content)?;
        debug!(steps = plan.len(), "planner produced plan");
        Ok((plan, outcome.usage))
    }

    fn build_prompt(spec: &TaskSpec) -> Vec<Message> {
        let spec_json =
            serde_json::to_string_pretty(spec).unwrap_or_else(|_| "<unserializable>".to_string());
        vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "Produce the generation plan for this app specification:\n{spec_json}"
            )),
        ]
    }

    fn parse_response(content: &str) -> Result<Plan> {
        serde_json::from_str(extract_json(content)).map_err(|e| {
            AppForgeError::Validation(format!("Planner returned a malformed plan: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_plan_array() {
        let content = "```json\n[{\"step_number\":1,\"phase\":\"SCAFFOLD\",\
            \"file_path\":\"build.gradle.kts\",\"file_type\":\"GRADLE\",\
            \"dependencies\":[],\"description\":\"root build\"}]\n```";
        let plan = Planner::parse_response(content).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn malformed_plan_is_a_validation_error() {
        let err = Planner::parse_response("not a plan").unwrap_err();
        assert!(matches!(err, AppForgeError::Validation(_)));
    }

    #[test]
    fn prompt_embeds_the_spec() {
        let spec = TaskSpec {
            app_name: "TodoApp".into(),
            features: vec!["add_task".into()],
            architecture: crate::types::Architecture::Mvvm,
            ui_system: crate::types::UiSystem::Compose,
            min_sdk: 24,
            target_sdk: 34,
            gradle_version: "8.2.0".into(),
            kotlin_version: "1.9.20".into(),
        };
        let messages = Planner::build_prompt(&spec);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("TodoApp"));
    }
}
