//! Durable state store.
//!
//! Single SQLite connection (WAL, busy timeout) holding tasks, step
//! records, and API-call records, plus the per-task workspace file
//! operations. The orchestrator is the sole writer; the embedded engine
//! serializes transactions, so no locking is layered on top.

mod files;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppForgeError, Result};
use crate::paths;
use crate::types::{
    AgentKind, ApiCallRecord, CriticDecision, Plan, StepRecord, Task, TaskSpec, TaskState,
    TokenUsage,
};

/// Durable record of tasks, steps, and API calls, plus workspace files.
pub struct StateStore {
    conn: Connection,
    workspaces_dir: Utf8PathBuf,
}

impl StateStore {
    /// Open (or create) the store at the default state-root locations.
    ///
    /// # Errors
    ///
    /// Database and filesystem errors propagate.
    pub fn open_default() -> Result<Self> {
        let root = paths::state_root();
        paths::ensure_dir_all(&root)?;
        Self::open(paths::database_path().as_std_path(), paths::workspaces_dir())
    }

    /// Open (or create) the store at an explicit database path.
    ///
    /// # Errors
    ///
    /// Database and filesystem errors propagate.
    pub fn open(db_path: &Path, workspaces_dir: Utf8PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        // PRAGMA journal_mode returns a row; query_row ignores it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let store = Self {
            conn,
            workspaces_dir,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                plan_json TEXT,
                api_call_count INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                start_time TEXT NOT NULL,
                end_time TEXT,
                error_message TEXT
            );
            CREATE TABLE IF NOT EXISTS step_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL REFERENCES tasks(task_id),
                step_number INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                coder_output TEXT NOT NULL,
                critic_decision TEXT,
                critic_issues_json TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS api_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL REFERENCES tasks(task_id),
                agent TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_step_records_task
                ON step_records(task_id, step_number);
            CREATE INDEX IF NOT EXISTS idx_api_calls_task
                ON api_calls(task_id);",
        )?;
        Ok(())
    }

    /// Create the task row and its workspace directory as one unit.
    ///
    /// The directory is created first; if the row insert then fails, the
    /// empty directory is removed best-effort so no orphan remains.
    ///
    /// # Errors
    ///
    /// Database and filesystem errors propagate.
    pub fn create_task(&mut self, task_id: &str, spec: &TaskSpec) -> Result<Task> {
        let workspace = self.workspace_dir(task_id);
        let workspace_pre_existing = workspace.as_std_path().is_dir();
        paths::ensure_dir_all(&workspace)?;

        let start_time = Utc::now();
        let spec_json = serde_json::to_string(spec)
            .map_err(|e| AppForgeError::Validation(format!("unserializable task spec: {e}")))?;

        let inserted = self.conn.execute(
            "INSERT INTO tasks (task_id, state, spec_json, start_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task_id,
                TaskState::Planning.as_str(),
                spec_json,
                start_time.to_rfc3339()
            ],
        );

        if let Err(e) = inserted {
            if !workspace_pre_existing {
                let _ = std::fs::remove_dir(workspace.as_std_path());
            }
            return Err(e.into());
        }

        debug!(task_id, "task created");
        Ok(Task {
            task_id: task_id.to_string(),
            state: TaskState::Planning,
            spec: spec.clone(),
            plan: None,
            api_call_count: 0,
            total_tokens: 0,
            start_time,
            end_time: None,
            error_message: None,
        })
    }

    /// Advance a task's state. Terminal tasks are sealed: any further
    /// update is refused. Entering a terminal state stamps `end_time`.
    ///
    /// # Errors
    ///
    /// `AppForgeError::Validation` if the task is unknown or already
    /// terminal; database errors propagate.
    pub fn update_task_state(
        &mut self,
        task_id: &str,
        state: TaskState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let current = self.get_task(task_id)?;
        if current.state.is_terminal() {
            return Err(AppForgeError::Validation(format!(
                "task {task_id} is already terminal ({})",
                current.state
            )));
        }

        let end_time = state.is_terminal().then(|| Utc::now().to_rfc3339());
        self.conn.execute(
            "UPDATE tasks SET state = ?1, error_message = ?2, end_time = ?3 WHERE task_id = ?4",
            params![state.as_str(), error_message, end_time, task_id],
        )?;
        debug!(task_id, state = %state, "task state updated");
        Ok(())
    }

    /// Attach the validated plan to its task.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn store_plan(&mut self, task_id: &str, plan: &Plan) -> Result<()> {
        let plan_json = serde_json::to_string(plan)
            .map_err(|e| AppForgeError::Validation(format!("unserializable plan: {e}")))?;
        self.conn.execute(
            "UPDATE tasks SET plan_json = ?1 WHERE task_id = ?2",
            params![plan_json, task_id],
        )?;
        Ok(())
    }

    /// Append one step record.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn record_step(&mut self, record: &StepRecord) -> Result<()> {
        let issues_json = serde_json::to_string(&record.critic_issues)
            .map_err(|e| AppForgeError::Validation(format!("unserializable issues: {e}")))?;
        self.conn.execute(
            "INSERT INTO step_records
             (task_id, step_number, file_path, attempt, coder_output,
              critic_decision, critic_issues_json, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.task_id,
                record.step_number,
                record.file_path,
                record.attempt,
                record.coder_output,
                record.critic_decision.map(CriticDecision::as_str),
                issues_json,
                record.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Append one API-call record and bump the parent task's counters in
    /// the same transaction, keeping the counters equal to the sums over
    /// the records at all times.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn record_api_call(
        &mut self,
        task_id: &str,
        agent: AgentKind,
        usage: TokenUsage,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO api_calls (task_id, agent, prompt_tokens, completion_tokens, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_id,
                agent.as_str(),
                usage.prompt_tokens,
                usage.completion_tokens,
                Utc::now().to_rfc3339()
            ],
        )?;
        let updated = tx.execute(
            "UPDATE tasks
             SET api_call_count = api_call_count + 1,
                 total_tokens = total_tokens + ?1
             WHERE task_id = ?2",
            params![usage.total(), task_id],
        )?;
        if updated != 1 {
            return Err(AppForgeError::Validation(format!(
                "cannot record API call for unknown task {task_id}"
            )));
        }
        tx.commit()?;
        Ok(())
    }

    /// Load one task.
    ///
    /// # Errors
    ///
    /// `AppForgeError::Validation` for an unknown id; database errors
    /// propagate.
    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.conn
            .query_row(
                "SELECT task_id, state, spec_json, plan_json, api_call_count, total_tokens,
                        start_time, end_time, error_message
                 FROM tasks WHERE task_id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()?
            .ok_or_else(|| AppForgeError::Validation(format!("unknown task: {task_id}")))
    }

    /// All tasks, newest first. Used by the observer UI.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, state, spec_json, plan_json, api_call_count, total_tokens,
                    start_time, end_time, error_message
             FROM tasks ORDER BY start_time DESC",
        )?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Step records for one task, in append order.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn list_step_records(&self, task_id: &str) -> Result<Vec<StepRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, step_number, file_path, attempt, coder_output,
                    critic_decision, critic_issues_json, timestamp
             FROM step_records WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let decision: Option<String> = row.get(5)?;
            let issues_json: String = row.get(6)?;
            let timestamp: String = row.get(7)?;
            Ok(StepRecord {
                task_id: row.get(0)?,
                step_number: row.get(1)?,
                file_path: row.get(2)?,
                attempt: row.get(3)?,
                coder_output: row.get(4)?,
                critic_decision: decision.as_deref().and_then(CriticDecision::parse),
                critic_issues: serde_json::from_str(&issues_json).unwrap_or_default(),
                timestamp: parse_timestamp(&timestamp),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// API-call records for one task, in append order.
    ///
    /// # Errors
    ///
    /// Database errors propagate.
    pub fn list_api_calls(&self, task_id: &str) -> Result<Vec<ApiCallRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id, agent, prompt_tokens, completion_tokens, timestamp
             FROM api_calls WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            let agent: String = row.get(1)?;
            let timestamp: String = row.get(4)?;
            Ok(ApiCallRecord {
                task_id: row.get(0)?,
                agent: AgentKind::parse(&agent).unwrap_or(AgentKind::Planner),
                prompt_tokens: row.get(2)?,
                completion_tokens: row.get(3)?,
                timestamp: parse_timestamp(&timestamp),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Workspace directory for a task.
    #[must_use]
    pub fn workspace_dir(&self, task_id: &str) -> Utf8PathBuf {
        self.workspaces_dir.join(task_id)
    }

    /// Atomically write a generated file into the task workspace.
    ///
    /// # Errors
    ///
    /// `AppForgeError::Validation` for unsafe paths and oversized
    /// content; IO errors propagate.
    pub fn write_file(&self, task_id: &str, rel: &str, content: &str) -> Result<()> {
        files::write_file(self.workspace_dir(task_id).as_std_path(), rel, content)
    }

    /// Read a generated file back from the task workspace.
    ///
    /// # Errors
    ///
    /// `AppForgeError::Validation` for unsafe paths; IO errors propagate.
    pub fn read_file(&self, task_id: &str, rel: &str) -> Result<String> {
        files::read_file(self.workspace_dir(task_id).as_std_path(), rel)
    }

    /// List workspace files (dotfiles and `*.tmp` excluded).
    ///
    /// # Errors
    ///
    /// IO errors propagate.
    pub fn list_files(&self, task_id: &str) -> Result<Vec<String>> {
        files::list_files(self.workspace_dir(task_id).as_std_path())
    }

    /// Close the store, flushing the connection.
    pub fn close(self) {
        if let Err((_conn, e)) = self.conn.close() {
            warn!(error = %e, "state store close failed");
        }
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let state: String = row.get(1)?;
    let spec_json: String = row.get(2)?;
    let plan_json: Option<String> = row.get(3)?;
    let start_time: String = row.get(6)?;
    let end_time: Option<String> = row.get(7)?;
    Ok(Task {
        task_id: row.get(0)?,
        state: TaskState::parse(&state).unwrap_or(TaskState::Failed),
        spec: serde_json::from_str(&spec_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        plan: plan_json.as_deref().and_then(|j| serde_json::from_str(j).ok()),
        api_call_count: row.get(4)?,
        total_tokens: row.get(5)?,
        start_time: parse_timestamp(&start_time),
        end_time: end_time.as_deref().map(parse_timestamp),
        error_message: row.get(8)?,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Architecture, CriticIssue, IssueSeverity, UiSystem};
    use tempfile::TempDir;

    fn spec() -> TaskSpec {
        TaskSpec {
            app_name: "TodoApp".into(),
            features: vec!["add_task".into()],
            architecture: Architecture::Mvvm,
            ui_system: UiSystem::Compose,
            min_sdk: 24,
            target_sdk: 34,
            gradle_version: "8.2.0".into(),
            kotlin_version: "1.9.20".into(),
        }
    }

    fn open_store(tmp: &TempDir) -> StateStore {
        let ws = Utf8PathBuf::from_path_buf(tmp.path().join("workspaces")).unwrap();
        StateStore::open(&tmp.path().join("test.db"), ws).unwrap()
    }

    #[test]
    fn create_task_makes_row_and_workspace() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let task = store.create_task("t-1", &spec()).unwrap();
        assert_eq!(task.state, TaskState::Planning);
        assert!(store.workspace_dir("t-1").as_std_path().is_dir());

        let loaded = store.get_task("t-1").unwrap();
        assert_eq!(loaded.api_call_count, 0);
        assert_eq!(loaded.spec, spec());
    }

    #[test]
    fn duplicate_task_id_fails_and_removes_fresh_workspace() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();
        assert!(store.create_task("t-1", &spec()).is_err());
        // The original workspace must survive the failed duplicate.
        assert!(store.workspace_dir("t-1").as_std_path().is_dir());
    }

    #[test]
    fn api_call_counters_stay_in_sync_with_records() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();

        for (agent, p, c) in [
            (AgentKind::Planner, 100, 50),
            (AgentKind::Coder, 200, 80),
            (AgentKind::Critic, 150, 20),
        ] {
            store
                .record_api_call(
                    "t-1",
                    agent,
                    TokenUsage {
                        prompt_tokens: p,
                        completion_tokens: c,
                    },
                )
                .unwrap();
        }

        let task = store.get_task("t-1").unwrap();
        let calls = store.list_api_calls("t-1").unwrap();
        assert_eq!(task.api_call_count, calls.len() as u64);
        assert_eq!(
            task.total_tokens,
            calls
                .iter()
                .map(|c| c.prompt_tokens + c.completion_tokens)
                .sum::<u64>()
        );
        assert_eq!(task.total_tokens, 600);
    }

    #[test]
    fn api_call_for_unknown_task_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        let err = store
            .record_api_call("nope", AgentKind::Coder, TokenUsage::default())
            .unwrap_err();
        assert!(matches!(err, AppForgeError::Validation(_)));
    }

    #[test]
    fn terminal_tasks_are_sealed() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();
        store
            .update_task_state("t-1", TaskState::Failed, Some("boom"))
            .unwrap();

        let task = store.get_task("t-1").unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.end_time.is_some());
        assert_eq!(task.error_message.as_deref(), Some("boom"));

        let err = store
            .update_task_state("t-1", TaskState::Completed, None)
            .unwrap_err();
        assert!(matches!(err, AppForgeError::Validation(_)));
    }

    #[test]
    fn step_records_round_trip_in_append_order() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();

        for attempt in 1..=2 {
            store
                .record_step(&StepRecord {
                    task_id: "t-1".into(),
                    step_number: 3,
                    file_path: "a.kt".into(),
                    attempt,
                    coder_output: format!("attempt {attempt}"),
                    critic_decision: Some(if attempt == 2 {
                        crate::types::CriticDecision::Accept
                    } else {
                        crate::types::CriticDecision::Reject
                    }),
                    critic_issues: vec![CriticIssue {
                        severity: IssueSeverity::Major,
                        line: None,
                        message: "issue".into(),
                    }],
                    timestamp: Utc::now(),
                })
                .unwrap();
        }

        let records = store.list_step_records("t-1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[1].attempt, 2);
        assert_eq!(
            records[1].critic_decision,
            Some(crate::types::CriticDecision::Accept)
        );
        assert_eq!(records[0].critic_issues.len(), 1);
    }

    #[test]
    fn workspace_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();
        store.write_file("t-1", "src/Main.kt", "fun main() {}").unwrap();
        assert_eq!(store.read_file("t-1", "src/Main.kt").unwrap(), "fun main() {}");
        assert_eq!(store.list_files("t-1").unwrap(), vec!["src/Main.kt".to_string()]);
    }

    #[test]
    fn plan_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut store = open_store(&tmp);
        store.create_task("t-1", &spec()).unwrap();

        let plan: Plan = serde_json::from_str(
            r#"[{"step_number":1,"phase":"SCAFFOLD","file_path":"a.kt",
                 "file_type":"KOTLIN","dependencies":[],"description":"d"}]"#,
        )
        .unwrap();
        store.store_plan("t-1", &plan).unwrap();

        let task = store.get_task("t-1").unwrap();
        assert_eq!(task.plan.unwrap(), plan);
    }
}
