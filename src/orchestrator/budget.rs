//! Budget enforcement for a running task.
//!
//! Budgets are checked before every agent invocation, reading the
//! persisted task counters so the audit trail and the enforcement can
//! never drift apart.

use std::path::Path;
use std::time::Instant;

use sysinfo::Disks;
use tracing::debug;

use crate::config::limits;
use crate::error::{AppForgeError, LimitType, Result};
use crate::types::Task;

/// Verify wall-clock, API-call, and token budgets for `task`.
///
/// # Errors
///
/// `AppForgeError::LimitExceeded` tagged with the breached dimension.
pub fn check_budgets(task: &Task, started: Instant) -> Result<()> {
    let elapsed = started.elapsed();
    if elapsed > limits::WALL_CLOCK_TIMEOUT {
        return Err(AppForgeError::LimitExceeded {
            limit_type: LimitType::WallClock,
            message: format!(
                "Wall clock limit exceeded: {}s elapsed of {}s allowed",
                elapsed.as_secs(),
                limits::WALL_CLOCK_TIMEOUT.as_secs()
            ),
        });
    }

    if task.api_call_count >= limits::MAX_API_CALLS {
        return Err(AppForgeError::LimitExceeded {
            limit_type: LimitType::ApiCalls,
            message: format!(
                "API call limit exceeded: {} of {} calls used",
                task.api_call_count,
                limits::MAX_API_CALLS
            ),
        });
    }

    if task.total_tokens >= limits::MAX_TOTAL_TOKENS {
        return Err(AppForgeError::LimitExceeded {
            limit_type: LimitType::Tokens,
            message: format!(
                "Token limit exceeded: {} of {} tokens used",
                task.total_tokens,
                limits::MAX_TOTAL_TOKENS
            ),
        });
    }

    Ok(())
}

/// Intake preflight: require 100 MB free on the disk holding the state
/// root. Skipped silently when the mount cannot be resolved.
///
/// # Errors
///
/// `AppForgeError::Validation` when free space is below the floor.
pub fn check_free_disk(state_root: &Path) -> Result<()> {
    let probe = state_root
        .canonicalize()
        .unwrap_or_else(|_| state_root.to_path_buf());

    let disks = Disks::new_with_refreshed_list();
    let best = disks
        .iter()
        .filter(|d| probe.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    let Some(disk) = best else {
        debug!(path = %probe.display(), "no disk matches state root, skipping space check");
        return Ok(());
    };

    if disk.available_space() < limits::MIN_FREE_DISK_BYTES {
        return Err(AppForgeError::Validation(format!(
            "insufficient free disk space: {} bytes available, {} required",
            disk.available_space(),
            limits::MIN_FREE_DISK_BYTES
        )));
    }
    Ok(())
}
