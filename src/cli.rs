//! Command-line interface.
//!
//! Thin layer over the library: argument parsing, wiring the production
//! backend into the orchestrator, and printing results. Exit-code
//! mapping lives in `exit_codes`; `main` applies it.

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{Config, DEFAULT_UI_PORT};
use crate::error::{AppForgeError, Result};
use crate::llm::{HttpBackend, LlmClient};
use crate::orchestrator::Orchestrator;
use crate::ratelimit::RateLimiter;
use crate::store::StateStore;
use crate::types::TaskSpec;

/// appforge - bounded multi-agent app scaffold generation
#[derive(Parser)]
#[command(name = "appforge")]
#[command(about = "Orchestrates a Planner/Coder/Critic/Verifier pipeline over an LLM provider")]
#[command(long_about = r#"
appforge turns a declarative task specification into a tree of generated
source files inside a per-task workspace, with hard budgets, retry and
circuit-breaking policies, and a durable audit trail.

EXAMPLES:
  # Run one generation task
  appforge agent --message 'build app: {"app_name":"TodoApp", ...}'

  # Fail instead of completing with warnings when quality is low
  appforge agent --message 'build app: {...}' --strict-verification

  # Abort the running task from another terminal
  appforge abort --task-id 6f1c9f0e-...

  # Remove workspaces of failed tasks older than 7 days
  appforge cleanup --older-than 7 --failed-only

  # Watch tasks from a browser
  appforge ui --port 7878

CONFIGURATION:
  APPFORGE_API_KEY is required for 'agent'. See the README for the other
  APPFORGE_* environment variables (state root, endpoint, timeouts, rate
  limits).
"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one generation task from a JSON task spec.
    Agent {
        /// Task message: 'build app: <JSON task spec>'.
        #[arg(long)]
        message: String,
        /// Fail the task when verification quality is below threshold.
        #[arg(long)]
        strict_verification: bool,
    },
    /// Signal the running orchestrator to abort its task.
    Abort {
        /// Id of the task to abort.
        #[arg(long)]
        task_id: String,
    },
    /// Remove workspaces of old terminal tasks.
    Cleanup {
        /// Age cutoff in days.
        #[arg(long, value_name = "DAYS")]
        older_than: u64,
        /// Only remove workspaces of FAILED tasks.
        #[arg(long)]
        failed_only: bool,
    },
    /// Serve the local read-only observer UI.
    Ui {
        /// Port to listen on (default from APPFORGE_UI_PORT or 7878).
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Execute the parsed command.
///
/// # Errors
///
/// Any taxonomy error; `main` maps it to the exit code.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Agent {
            message,
            strict_verification,
        } => run_agent(&message, strict_verification).await,
        Command::Abort { task_id } => run_abort(&task_id),
        Command::Cleanup {
            older_than,
            failed_only,
        } => {
            crate::logging::init(false);
            let report = crate::cleanup::run(older_than, failed_only)?;
            println!(
                "Removed {} workspace(s), kept {}",
                report.removed.len(),
                report.kept
            );
            for task_id in report.removed {
                println!("  removed {task_id}");
            }
            Ok(())
        }
        Command::Ui { port } => {
            crate::logging::init(false);
            let port = port.unwrap_or_else(|| {
                std::env::var("APPFORGE_UI_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_UI_PORT)
            });
            crate::ui::serve(port).await
        }
    }
}

async fn run_agent(message: &str, strict_verification: bool) -> Result<()> {
    let config = Config::from_env()?;
    crate::logging::init(config.debug);

    let spec = parse_task_message(message)?;

    let backend = HttpBackend::new(&config)?;
    let limiter = RateLimiter::per_minute(config.rate_limit_rpm, config.rate_limit_burst);
    let client = LlmClient::new(Box::new(backend), limiter, config.request_timeout);
    let store = StateStore::open_default()?;

    let mut orchestrator = Orchestrator::new(store, client, strict_verification);
    let outcome = orchestrator.run_task(spec).await?;

    println!("Task {} finished: {}", outcome.task_id, outcome.state);
    println!(
        "  {} file(s), {} API call(s), {} token(s), quality {:.2}",
        outcome.files.len(),
        outcome.api_call_count,
        outcome.total_tokens,
        outcome.quality_score
    );
    for warning in &outcome.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

fn run_abort(task_id: &str) -> Result<()> {
    crate::logging::init(false);

    // The task id names what the operator intends to stop; the PID file
    // names who is doing the stopping.
    let store = StateStore::open_default()?;
    let task = store.get_task(task_id)?;
    if task.state.is_terminal() {
        return Err(AppForgeError::Validation(format!(
            "task {task_id} already ended in state {}",
            task.state
        )));
    }

    #[cfg(unix)]
    {
        let pid = crate::lock::terminate_holder()?;
        info!(task_id, pid, "sent SIGTERM to orchestrator");
        println!("Sent TERM to orchestrator (PID {pid}) for task {task_id}");
        Ok(())
    }

    #[cfg(not(unix))]
    {
        Err(AppForgeError::Validation(
            "abort is only supported on unix platforms".into(),
        ))
    }
}

/// Accept either a bare JSON spec or the conversational
/// `build app: <JSON>` form.
fn parse_task_message(message: &str) -> Result<TaskSpec> {
    let trimmed = message.trim();
    let json = trimmed
        .strip_prefix("build app:")
        .map_or(trimmed, str::trim);
    serde_json::from_str(json)
        .map_err(|e| AppForgeError::Validation(format!("invalid task spec: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_JSON: &str = r#"{
        "app_name": "TodoApp",
        "features": ["add_task", "list_tasks", "complete_task"],
        "architecture": "MVVM",
        "ui_system": "Compose",
        "min_sdk": 24,
        "target_sdk": 34,
        "gradle_version": "8.2.0",
        "kotlin_version": "1.9.20"
    }"#;

    #[test]
    fn parses_bare_json_spec() {
        let spec = parse_task_message(SPEC_JSON).unwrap();
        assert_eq!(spec.app_name, "TodoApp");
    }

    #[test]
    fn parses_build_app_prefix() {
        let message = format!("build app: {SPEC_JSON}");
        let spec = parse_task_message(&message).unwrap();
        assert_eq!(spec.features.len(), 3);
    }

    #[test]
    fn garbage_message_is_a_validation_error() {
        let err = parse_task_message("make me an app please").unwrap_err();
        assert!(matches!(err, AppForgeError::Validation(_)));
    }

    #[test]
    fn cli_parses_agent_command() {
        let cli = Cli::try_parse_from([
            "appforge",
            "agent",
            "--message",
            "build app: {}",
            "--strict-verification",
        ])
        .unwrap();
        match cli.command {
            Command::Agent {
                strict_verification,
                ..
            } => assert!(strict_verification),
            _ => panic!("expected agent command"),
        }
    }

    #[test]
    fn cli_parses_cleanup_flags() {
        let cli =
            Cli::try_parse_from(["appforge", "cleanup", "--older-than", "7", "--failed-only"])
                .unwrap();
        match cli.command {
            Command::Cleanup {
                older_than,
                failed_only,
            } => {
                assert_eq!(older_than, 7);
                assert!(failed_only);
            }
            _ => panic!("expected cleanup command"),
        }
    }
}
