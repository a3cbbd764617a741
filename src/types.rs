//! Core domain types shared across the pipeline.
//!
//! Everything here is plain data: the task specification that enters the
//! system, the plan the Planner produces, and the persistent records the
//! state store keeps. Behavior lives in the components that consume them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable input describing the app to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// App identifier, at most 256 characters, not a reserved word.
    pub app_name: String,
    /// Ordered, distinct feature identifiers (1..=10 entries).
    pub features: Vec<String>,
    pub architecture: Architecture,
    pub ui_system: UiSystem,
    pub min_sdk: u32,
    pub target_sdk: u32,
    /// Semantic version triple, e.g. "8.2.0".
    pub gradle_version: String,
    /// Semantic version triple, e.g. "1.9.20".
    pub kotlin_version: String,
}

/// Architectural pattern for the generated app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "MVVM")]
    Mvvm,
    #[serde(rename = "MVI")]
    Mvi,
    #[serde(rename = "MVP")]
    Mvp,
}

/// UI toolkit for the generated app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiSystem {
    Compose,
    Views,
}

/// Advisory grouping for a plan step. Execution order ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepPhase {
    Scaffold,
    Data,
    Ui,
    Wiring,
}

/// Kind of file a step produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepFileType {
    Kotlin,
    Xml,
    Gradle,
    Other,
}

/// One unit of the plan: produce one file at a workspace-relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Positive and unique within the plan.
    pub step_number: u32,
    pub phase: StepPhase,
    /// Workspace-relative path; must pass the path-safety rule.
    pub file_path: String,
    pub file_type: StepFileType,
    /// Step numbers this step depends on; each must refer to a prior step.
    #[serde(default)]
    pub dependencies: Vec<u32>,
    pub description: String,
}

/// Ordered sequence of steps with unique numbers and a closed
/// dependency graph. Executed strictly in `step_number` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Lifecycle state of a task.
///
/// Transitions are monotonic: PLANNING → EXECUTING → VERIFYING →
/// (COMPLETED | COMPLETED_WITH_WARNINGS), with FAILED reachable from any
/// non-terminal state. Terminal states never mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Planning,
    Executing,
    Verifying,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl TaskState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Verifying => "VERIFYING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithWarnings | Self::Failed
        )
    }

    /// Parse the database representation back into a state.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLANNING" => Some(Self::Planning),
            "EXECUTING" => Some(Self::Executing),
            "VERIFYING" => Some(Self::Verifying),
            "COMPLETED" => Some(Self::Completed),
            "COMPLETED_WITH_WARNINGS" => Some(Self::CompletedWithWarnings),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent record of one end-to-end run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub state: TaskState,
    pub spec: TaskSpec,
    /// Null until planning succeeds.
    pub plan: Option<Plan>,
    pub api_call_count: u64,
    pub total_tokens: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// The four agents, used for attribution on API-call records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Planner,
    Coder,
    Critic,
    Verifier,
}

impl AgentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Critic => "critic",
            Self::Verifier => "verifier",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "coder" => Some(Self::Coder),
            "critic" => Some(Self::Critic),
            "verifier" => Some(Self::Verifier),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Critic's binding verdict on a Coder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriticDecision {
    Accept,
    Reject,
}

impl CriticDecision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACCEPT" => Some(Self::Accept),
            "REJECT" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Blocker,
    Major,
    Minor,
}

/// A single review finding from the Critic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticIssue {
    pub severity: IssueSeverity,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
}

/// Parsed Critic response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticOutput {
    pub decision: CriticDecision,
    #[serde(default)]
    pub issues: Vec<CriticIssue>,
}

/// Parsed Verifier response. Defaults apply field-by-field when the model
/// output is malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierReport {
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub missing_items: Vec<String>,
    #[serde(default = "default_quality_score")]
    pub quality_score: f64,
}

pub(crate) fn default_quality_score() -> f64 {
    0.5
}

impl Default for VerifierReport {
    fn default() -> Self {
        Self {
            warnings: Vec::new(),
            missing_items: Vec::new(),
            quality_score: default_quality_score(),
        }
    }
}

/// Token usage as reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub const fn total(self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Append-only audit record of one Coder attempt and its review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub task_id: String,
    pub step_number: u32,
    pub file_path: String,
    pub attempt: u32,
    pub coder_output: String,
    pub critic_decision: Option<CriticDecision>,
    pub critic_issues: Vec<CriticIssue>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit record of one LLM round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRecord {
    pub task_id: String,
    pub agent: AgentKind,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub timestamp: DateTime<Utc>,
}
