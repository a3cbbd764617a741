//! Workspace garbage collection.
//!
//! Removes workspace directories of terminal tasks older than a cutoff.
//! Refuses to run while an orchestrator holds the PID lock, so an active
//! task can never lose its workspace underneath it.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::error::{AppForgeError, Result};
use crate::lock::PidFile;
use crate::store::StateStore;
use crate::types::TaskState;

/// What a cleanup pass removed.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub kept: usize,
}

/// Remove workspaces of terminal tasks that ended more than
/// `older_than_days` ago. With `failed_only`, COMPLETED workspaces are
/// kept regardless of age.
///
/// # Errors
///
/// `AppForgeError::LockHeld` while a task is running; store and IO
/// errors propagate.
pub fn run(older_than_days: u64, failed_only: bool) -> Result<CleanupReport> {
    if let Some(pid) = PidFile::read_current()? {
        if crate::lock::is_process_running(pid) {
            return Err(AppForgeError::LockHeld { pid });
        }
    }

    let store = StateStore::open_default()?;
    let cutoff = Utc::now() - Duration::days(older_than_days as i64);
    let mut report = CleanupReport::default();

    for task in store.list_tasks()? {
        let eligible = task.state.is_terminal()
            && task.end_time.is_some_and(|end| end < cutoff)
            && (!failed_only || task.state == TaskState::Failed);

        if !eligible {
            report.kept += 1;
            continue;
        }

        let workspace = store.workspace_dir(&task.task_id);
        if !workspace.as_std_path().exists() {
            report.kept += 1;
            continue;
        }
        match std::fs::remove_dir_all(workspace.as_std_path()) {
            Ok(()) => {
                info!(task_id = %task.task_id, "workspace removed");
                report.removed.push(task.task_id);
            }
            Err(e) => warn!(task_id = %task.task_id, error = %e, "workspace removal failed"),
        }
    }

    Ok(report)
}
