//! Task orchestration: the lifecycle state machine and driver.
//!
//! One task at a time, agents strictly in sequence. The driver owns the
//! state store and the LLM client; background activity is limited to the
//! heartbeat timer and the signal listener, both isolated behind the
//! abort flag and their own files.

mod budget;
mod heartbeat;
mod signals;
mod step;

pub use signals::AbortFlag;

use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{Planner, Verifier};
use crate::error::{AppForgeError, Result};
use crate::llm::LlmClient;
use crate::lock::PidFile;
use crate::store::StateStore;
use crate::types::{AgentKind, CriticIssue, TaskSpec, TaskState};
use crate::validation;
use heartbeat::Heartbeat;
use step::{FailureCounters, StepFailure};

/// Quality threshold separating COMPLETED from warning/failure paths.
const QUALITY_THRESHOLD: f64 = 0.5;

/// Summary of a finished task, returned to the CLI.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub state: TaskState,
    pub files: Vec<String>,
    pub api_call_count: u64,
    pub total_tokens: u64,
    pub quality_score: f64,
    pub warnings: Vec<String>,
}

/// Drives one task end to end.
pub struct Orchestrator {
    pub(crate) store: StateStore,
    pub(crate) client: LlmClient,
    strict_verification: bool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(store: StateStore, client: LlmClient, strict_verification: bool) -> Self {
        Self {
            store,
            client,
            strict_verification,
        }
    }

    /// Read access to the state store (observer and test hook).
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run a task with a fresh abort flag wired to INT/TERM.
    ///
    /// # Errors
    ///
    /// Any taxonomy error; the task row is sealed FAILED before the error
    /// surfaces.
    pub async fn run_task(&mut self, spec: TaskSpec) -> Result<TaskOutcome> {
        self.run_task_with_abort(spec, AbortFlag::new()).await
    }

    /// Run a task observing an externally owned abort flag.
    ///
    /// Intake order: validate spec, free-disk preflight, PID exclusion,
    /// task row + workspace, heartbeat, signal listener. Everything after
    /// intake runs under a guaranteed-exit scope that stops the
    /// heartbeat, cancels the listener, releases the PID file, and seals
    /// the task on failure.
    ///
    /// # Errors
    ///
    /// Any taxonomy error from intake or the pipeline.
    pub async fn run_task_with_abort(
        &mut self,
        spec: TaskSpec,
        abort: AbortFlag,
    ) -> Result<TaskOutcome> {
        validation::validate_task_spec(&spec)?;

        let root = crate::paths::state_root();
        crate::paths::ensure_dir_all(&root)?;
        budget::check_free_disk(root.as_std_path())?;

        let pid_lock = PidFile::acquire()?;
        let task_id = Uuid::new_v4().to_string();
        self.store.create_task(&task_id, &spec)?;

        let heartbeat = Heartbeat::start(task_id.clone());
        let signal_listener = signals::install(abort.clone());
        info!(task_id, app = %spec.app_name, "task started");

        let result = self.drive(&task_id, &spec, &abort).await;

        // Guaranteed-exit scope: every path through here.
        signal_listener.abort();
        heartbeat.stop();
        drop(pid_lock);

        match result {
            Ok(outcome) => {
                info!(task_id, state = %outcome.state, "task finished");
                Ok(outcome)
            }
            Err(err) => {
                self.seal_failed(&task_id, &err);
                Err(err)
            }
        }
    }

    /// The state machine proper: PLANNING → EXECUTING → VERIFYING →
    /// terminal.
    async fn drive(
        &mut self,
        task_id: &str,
        spec: &TaskSpec,
        abort: &AbortFlag,
    ) -> Result<TaskOutcome> {
        let started = Instant::now();

        // PLANNING
        self.pre_agent_checks(task_id, started, abort)?;
        let (plan, usage) = Planner::create_plan(&mut self.client, spec).await?;
        self.store.record_api_call(task_id, AgentKind::Planner, usage)?;
        validation::validate_plan(&plan)?;
        self.store.store_plan(task_id, &plan)?;
        self.store
            .update_task_state(task_id, TaskState::Executing, None)?;
        info!(task_id, steps = plan.len(), "plan accepted, executing");

        // EXECUTING: steps strictly in step_number order.
        let mut completed_files: Vec<String> = Vec::new();
        let mut counters = FailureCounters::default();
        for step in &plan.steps {
            let mut carried_issues: Option<Vec<CriticIssue>> = None;
            loop {
                match self
                    .run_step(
                        task_id,
                        spec,
                        step,
                        &completed_files,
                        &mut counters,
                        abort,
                        started,
                        carried_issues.take(),
                    )
                    .await
                {
                    Ok(()) => {
                        completed_files.push(step.file_path.clone());
                        break;
                    }
                    Err(StepFailure::Semantic { error, last_issues }) => {
                        // Semantic failures get a separate retry budget:
                        // re-enter the step with the Critic's feedback.
                        // The feedback-loop breaker bounds the streak.
                        warn!(
                            task_id,
                            step = step.step_number,
                            error = %error,
                            "re-entering step with critic feedback"
                        );
                        carried_issues = Some(last_issues);
                    }
                    Err(StepFailure::Fatal(err)) => return Err(err),
                }
            }
        }

        // VERIFYING
        self.store
            .update_task_state(task_id, TaskState::Verifying, None)?;
        self.pre_agent_checks(task_id, started, abort)?;
        let files = self.store.list_files(task_id)?;
        let (report, usage) = Verifier::verify_project(&mut self.client, &files, spec).await?;
        self.store
            .record_api_call(task_id, AgentKind::Verifier, usage)?;

        let final_state = if report.quality_score >= QUALITY_THRESHOLD {
            TaskState::Completed
        } else if self.strict_verification {
            return Err(AppForgeError::Verification(format!(
                "quality score {:.2} below threshold {QUALITY_THRESHOLD:.2}",
                report.quality_score
            )));
        } else {
            warn!(
                task_id,
                quality = report.quality_score,
                "verifier quality below threshold, completing with warnings"
            );
            TaskState::CompletedWithWarnings
        };
        self.store.update_task_state(task_id, final_state, None)?;

        let task = self.store.get_task(task_id)?;
        Ok(TaskOutcome {
            task_id: task_id.to_string(),
            state: final_state,
            files,
            api_call_count: task.api_call_count,
            total_tokens: task.total_tokens,
            quality_score: report.quality_score,
            warnings: report.warnings,
        })
    }

    /// Budget and abort checks ahead of the Planner and Verifier calls.
    /// (The step loop runs its own, richer checks.)
    fn pre_agent_checks(
        &self,
        task_id: &str,
        started: Instant,
        abort: &AbortFlag,
    ) -> Result<()> {
        let task = self.store.get_task(task_id)?;
        budget::check_budgets(&task, started)?;
        if abort.is_requested() {
            return Err(AppForgeError::Aborted("Manual abort requested".into()));
        }
        Ok(())
    }

    /// Best-effort terminal write; never masks the original error.
    fn seal_failed(&mut self, task_id: &str, err: &AppForgeError) {
        match self.store.get_task(task_id) {
            Ok(task) if !task.state.is_terminal() => {
                if let Err(seal_err) = self.store.update_task_state(
                    task_id,
                    TaskState::Failed,
                    Some(&err.short_message()),
                ) {
                    warn!(task_id, error = %seal_err, "failed to seal task as FAILED");
                }
            }
            Ok(_) => {}
            Err(load_err) => {
                warn!(task_id, error = %load_err, "cannot load task while sealing");
            }
        }
    }
}
