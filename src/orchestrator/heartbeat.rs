//! Background heartbeat for external observers.
//!
//! While a task is active a small JSON document is rewritten every 30
//! seconds. This is the only background activity besides the signal
//! listener; it touches nothing but its own file.

use camino::Utf8PathBuf;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::limits::HEARTBEAT_INTERVAL;
use crate::paths;

#[derive(Serialize)]
struct HeartbeatDoc<'a> {
    task_id: &'a str,
    timestamp: String,
}

/// Running heartbeat writer. Dropping (or `stop`) cancels the timer.
#[derive(Debug)]
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Start writing heartbeats for `task_id`. The file path is resolved
    /// up front so the spawned task needs no ambient state.
    #[must_use]
    pub fn start(task_id: String) -> Self {
        let path = paths::heartbeat_file();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                write_heartbeat(&path, &task_id);
            }
        });
        Self { handle }
    }

    /// Stop the heartbeat.
    pub fn stop(self) {
        self.handle.abort();
        debug!("heartbeat stopped");
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn write_heartbeat(path: &Utf8PathBuf, task_id: &str) {
    let doc = HeartbeatDoc {
        task_id,
        timestamp: Utc::now().to_rfc3339(),
    };
    match serde_json::to_string(&doc) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path.as_std_path(), json) {
                warn!(error = %e, "heartbeat write failed");
            }
        }
        Err(e) => warn!(error = %e, "heartbeat serialization failed"),
    }
}
