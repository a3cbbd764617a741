//! Per-step execution: the Coder↔Critic retry loop.
//!
//! Transient failures and Critic rejections are budgeted independently.
//! A transient streak trips the consecutive-failure breaker; a rejection
//! streak trips the feedback-loop breaker. Neither counter leaks into the
//! other, so a flaky network cannot mask a stuck model or vice versa.

use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

use crate::agents::{Coder, Critic};
use crate::config::limits;
use crate::error::{is_transient, AppForgeError};
use crate::orchestrator::signals::AbortFlag;
use crate::orchestrator::Orchestrator;
use crate::types::{CriticDecision, CriticIssue, Step, StepRecord, TaskSpec};

/// Failure streak state shared across all steps of one task.
///
/// `consecutive_failures` counts transient Coder failures and resets on
/// any accepted step. `consecutive_rejections` counts Critic REJECTs,
/// persists across attempt cycles and steps, and resets only on an
/// accepted step.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FailureCounters {
    pub consecutive_failures: u32,
    pub consecutive_rejections: u32,
}

/// How a step execution ended, seen from the task driver.
pub(crate) enum StepFailure {
    /// The attempt cycle exhausted on Critic rejections. The driver may
    /// re-enter the step with the carried issues while the feedback-loop
    /// breaker still has budget.
    Semantic {
        error: AppForgeError,
        last_issues: Vec<CriticIssue>,
    },
    /// Unrecoverable; fails the task.
    Fatal(AppForgeError),
}

impl Orchestrator {
    /// Run one attempt cycle (up to `MAX_STEP_RETRIES` attempts) for a
    /// step. On acceptance the file is written and both counters reset.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_step(
        &mut self,
        task_id: &str,
        spec: &TaskSpec,
        step: &Step,
        completed_files: &[String],
        counters: &mut FailureCounters,
        abort: &AbortFlag,
        started: Instant,
        initial_issues: Option<Vec<CriticIssue>>,
    ) -> Result<(), StepFailure> {
        let mut prior_issues = initial_issues;

        for attempt in 1..=limits::MAX_STEP_RETRIES {
            self.step_entry_checks(task_id, started, counters, abort)
                .map_err(StepFailure::Fatal)?;

            let (content, usage) = match Coder::generate_file(
                &mut self.client,
                step,
                spec,
                completed_files,
                prior_issues.as_deref(),
            )
            .await
            {
                Ok(out) => out,
                Err(err) if is_transient(&err) => {
                    counters.consecutive_failures += 1;
                    warn!(
                        step = step.step_number,
                        attempt,
                        streak = counters.consecutive_failures,
                        error = %err,
                        "transient coder failure"
                    );
                    if counters.consecutive_failures >= limits::CONSECUTIVE_FAILURE_LIMIT {
                        return Err(StepFailure::Fatal(AppForgeError::CircuitBreaker(format!(
                            "{} consecutive transient failures",
                            counters.consecutive_failures
                        ))));
                    }
                    if attempt < limits::MAX_STEP_RETRIES {
                        continue;
                    }
                    return Err(StepFailure::Fatal(err));
                }
                Err(err) => return Err(StepFailure::Fatal(err)),
            };

            self.store
                .record_api_call(task_id, crate::types::AgentKind::Coder, usage)
                .map_err(StepFailure::Fatal)?;

            self.step_entry_checks(task_id, started, counters, abort)
                .map_err(StepFailure::Fatal)?;

            let (review, critic_usage) =
                Critic::review_file(&mut self.client, &step.file_path, &content, step, spec)
                    .await
                    .map_err(StepFailure::Fatal)?;
            self.store
                .record_api_call(task_id, crate::types::AgentKind::Critic, critic_usage)
                .map_err(StepFailure::Fatal)?;

            self.store
                .record_step(&StepRecord {
                    task_id: task_id.to_string(),
                    step_number: step.step_number,
                    file_path: step.file_path.clone(),
                    attempt,
                    coder_output: content.clone(),
                    critic_decision: Some(review.decision),
                    critic_issues: review.issues.clone(),
                    timestamp: Utc::now(),
                })
                .map_err(StepFailure::Fatal)?;

            match review.decision {
                CriticDecision::Accept => {
                    self.store
                        .write_file(task_id, &step.file_path, &content)
                        .map_err(StepFailure::Fatal)?;
                    counters.consecutive_failures = 0;
                    counters.consecutive_rejections = 0;
                    info!(
                        step = step.step_number,
                        attempt,
                        path = %step.file_path,
                        "step accepted"
                    );
                    return Ok(());
                }
                CriticDecision::Reject => {
                    counters.consecutive_rejections += 1;
                    warn!(
                        step = step.step_number,
                        attempt,
                        streak = counters.consecutive_rejections,
                        issue_count = review.issues.len(),
                        "step rejected"
                    );
                    if counters.consecutive_rejections >= limits::FEEDBACK_LOOP_LIMIT {
                        return Err(StepFailure::Fatal(feedback_breaker_error()));
                    }
                    if attempt < limits::MAX_STEP_RETRIES {
                        prior_issues = Some(review.issues);
                        continue;
                    }
                    return Err(StepFailure::Semantic {
                        error: AppForgeError::Validation(format!(
                            "Step {} rejected after {} attempts: {}",
                            step.step_number,
                            limits::MAX_STEP_RETRIES,
                            summarize_issues(&review.issues)
                        )),
                        last_issues: review.issues,
                    });
                }
            }
        }

        unreachable!("attempt loop returns on every branch")
    }

    /// Re-entry checks at the top of every attempt: budgets, then the
    /// emergency-stop file, the feedback-loop breaker, the abort flag.
    fn step_entry_checks(
        &self,
        task_id: &str,
        started: Instant,
        counters: &FailureCounters,
        abort: &AbortFlag,
    ) -> crate::error::Result<()> {
        let task = self.store.get_task(task_id)?;
        super::budget::check_budgets(&task, started)?;

        let stop = crate::paths::emergency_stop_file();
        if stop.as_std_path().exists() {
            warn!(file = %stop, "emergency stop file present");
            return Err(AppForgeError::Aborted(format!(
                "Emergency stop requested via {stop}"
            )));
        }

        if counters.consecutive_rejections >= limits::FEEDBACK_LOOP_LIMIT {
            return Err(feedback_breaker_error());
        }

        if abort.is_requested() {
            return Err(AppForgeError::Aborted("Manual abort requested".into()));
        }

        Ok(())
    }
}

fn feedback_breaker_error() -> AppForgeError {
    AppForgeError::CircuitBreaker("Coder unable to satisfy Critic requirements".into())
}

/// First three issues, compressed into one line for an error message.
fn summarize_issues(issues: &[CriticIssue]) -> String {
    if issues.is_empty() {
        return "no issues reported".to_string();
    }
    issues
        .iter()
        .take(3)
        .map(|i| format!("[{:?}] {}", i.severity, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueSeverity;

    #[test]
    fn issue_summary_takes_first_three() {
        let issues: Vec<CriticIssue> = (0..5)
            .map(|i| CriticIssue {
                severity: IssueSeverity::Major,
                line: None,
                message: format!("issue {i}"),
            })
            .collect();
        let summary = summarize_issues(&issues);
        assert!(summary.contains("issue 0"));
        assert!(summary.contains("issue 2"));
        assert!(!summary.contains("issue 3"));
    }

    #[test]
    fn empty_issue_list_has_a_placeholder() {
        assert_eq!(summarize_issues(&[]), "no issues reported");
    }
}
