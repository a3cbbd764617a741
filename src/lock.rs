//! Single-instance enforcement via a PID file.
//!
//! One orchestrator per state root. The lock is advisory: it coordinates
//! well-behaved processes and recovers from crashes by detecting stale
//! PIDs, but it is not a security boundary.

use std::fs;
use std::path::PathBuf;
use std::process;

use tracing::{debug, warn};

use crate::error::{AppForgeError, Result};
use crate::paths;

/// Held PID lock. Dropping it removes the file if it still records our
/// own PID, so cleanup happens on every exit path that unwinds.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Acquire the process-wide lock at the state root.
    ///
    /// An existing file whose PID is alive rejects acquisition. A file
    /// with a dead PID or unparseable content is silently removed and
    /// acquisition proceeds.
    ///
    /// # Errors
    ///
    /// `AppForgeError::LockHeld` when another orchestrator is running;
    /// IO errors propagate.
    pub fn acquire() -> Result<Self> {
        let path = paths::pid_file().as_std_path().to_path_buf();

        if let Ok(content) = fs::read_to_string(&path) {
            match content.trim().parse::<u32>() {
                Ok(pid) if is_process_running(pid) => {
                    return Err(AppForgeError::LockHeld { pid });
                }
                Ok(pid) => {
                    debug!(pid, "removing stale PID file");
                    let _ = fs::remove_file(&path);
                }
                Err(_) => {
                    warn!("removing unparseable PID file");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if let Some(parent) = path.parent() {
            paths::ensure_dir_all(parent)?;
        }
        let pid = process::id();
        fs::write(&path, pid.to_string())?;
        debug!(pid, "PID lock acquired");

        Ok(Self { path, pid })
    }

    /// PID recorded in the lock file, if one exists and parses.
    ///
    /// # Errors
    ///
    /// IO errors other than absence propagate.
    pub fn read_current() -> Result<Option<u32>> {
        match fs::read_to_string(paths::pid_file().as_std_path()) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a running orchestrator currently holds the lock.
    #[must_use]
    pub fn is_held() -> bool {
        matches!(Self::read_current(), Ok(Some(pid)) if is_process_running(pid))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Remove only if the file still holds our PID; a successor may
        // have replaced a file we already gave up.
        if let Ok(content) = fs::read_to_string(&self.path) {
            if content.trim().parse::<u32>() == Ok(self.pid) {
                let _ = fs::remove_file(&self.path);
                debug!(pid = self.pid, "PID lock released");
            }
        }
    }
}

/// Signal-0 liveness probe.
#[must_use]
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill(pid, 0) probes existence without delivering a signal.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        // Conservative fallback: assume the process is alive.
        let _ = pid;
        true
    }
}

/// Send SIGTERM to the recorded orchestrator, for the abort command.
///
/// # Errors
///
/// `AppForgeError::Validation` when no live orchestrator holds the lock.
#[cfg(unix)]
pub fn terminate_holder() -> Result<u32> {
    let Some(pid) = PidFile::read_current()? else {
        return Err(AppForgeError::Validation(
            "no task is running (PID file absent)".into(),
        ));
    };
    if !is_process_running(pid) {
        return Err(AppForgeError::Validation(format!(
            "recorded process {pid} is no longer running"
        )));
    }
    let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if rc != 0 {
        return Err(AppForgeError::Io(std::io::Error::last_os_error()));
    }
    Ok(pid)
}
