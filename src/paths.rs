//! State-root layout.
//!
//! Everything the pipeline persists lives under one root directory:
//! the embedded database, daily logs, the PID file, the heartbeat file,
//! the emergency-stop file, and per-task workspaces.

use camino::Utf8PathBuf;
use std::cell::RefCell;

use crate::config::STATE_ROOT_ENV;

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_ROOT: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Resolve the state root:
/// 1) thread-local override (tests use this)
/// 2) env `APPFORGE_STATE_ROOT`
/// 3) default ".appforge"
#[must_use]
pub fn state_root() -> Utf8PathBuf {
    if let Some(tl) = THREAD_ROOT.with(|tl| tl.borrow().clone()) {
        return tl;
    }
    if let Ok(p) = std::env::var(STATE_ROOT_ENV) {
        return Utf8PathBuf::from(p);
    }
    Utf8PathBuf::from(".appforge")
}

/// Returns `<state root>/appforge.db`
#[must_use]
pub fn database_path() -> Utf8PathBuf {
    state_root().join("appforge.db")
}

/// Returns `<state root>/logs`
#[must_use]
pub fn logs_dir() -> Utf8PathBuf {
    state_root().join("logs")
}

/// Returns `<state root>/appforge.pid`
#[must_use]
pub fn pid_file() -> Utf8PathBuf {
    state_root().join("appforge.pid")
}

/// Returns `<state root>/heartbeat.json`
#[must_use]
pub fn heartbeat_file() -> Utf8PathBuf {
    state_root().join("heartbeat.json")
}

/// Returns `<state root>/STOP`. Its presence aborts the active task at
/// the next step-loop check.
#[must_use]
pub fn emergency_stop_file() -> Utf8PathBuf {
    state_root().join("STOP")
}

/// Returns `<state root>/workspaces`
#[must_use]
pub fn workspaces_dir() -> Utf8PathBuf {
    state_root().join("workspaces")
}

/// Returns `<state root>/workspaces/<task_id>`
#[must_use]
pub fn workspace_dir(task_id: &str) -> Utf8PathBuf {
    workspaces_dir().join(task_id)
}

/// mkdir -p; treat `AlreadyExists` as success (removes TOCTTOU races)
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match std::fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Override the state root for the calling thread.
///
/// Test seam; not part of public API stability guarantees. Tests point
/// this at a temp directory to avoid process-global env races.
pub fn set_thread_state_root(path: Utf8PathBuf) {
    THREAD_ROOT.with(|tl| *tl.borrow_mut() = Some(path));
}

/// Test helper: give the calling thread an isolated state root under the
/// system temp dir. Hold the `TempDir` for the test's duration so the
/// directory stays alive.
#[cfg(test)]
#[must_use]
pub fn with_isolated_root() -> tempfile::TempDir {
    let td = tempfile::TempDir::new().expect("create temp state root");
    let p = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
    set_thread_state_root(p);
    td
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_hangs_off_state_root() {
        let _root = with_isolated_root();
        let root = state_root();
        assert_eq!(database_path(), root.join("appforge.db"));
        assert_eq!(pid_file(), root.join("appforge.pid"));
        assert_eq!(heartbeat_file(), root.join("heartbeat.json"));
        assert_eq!(emergency_stop_file(), root.join("STOP"));
        assert_eq!(workspace_dir("t-1"), root.join("workspaces").join("t-1"));
    }

    #[test]
    fn ensure_dir_all_is_idempotent() {
        let _root = with_isolated_root();
        let dir = workspaces_dir();
        ensure_dir_all(&dir).unwrap();
        ensure_dir_all(&dir).unwrap();
        assert!(dir.as_std_path().is_dir());
    }
}
