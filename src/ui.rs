//! Read-only observer UI.
//!
//! A small HTTP surface over the persisted state: task list, task
//! detail with step records, and the heartbeat document. Strictly
//! read-only; each request opens its own store connection, so the
//! observer never contends with the orchestrator's writer.

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::paths;
use crate::store::StateStore;
use crate::types::{StepRecord, Task};

#[derive(Clone)]
struct ObserverState {
    db_path: Utf8PathBuf,
    workspaces_dir: Utf8PathBuf,
    heartbeat_path: Utf8PathBuf,
}

impl ObserverState {
    fn open_store(&self) -> std::result::Result<StateStore, StatusCode> {
        StateStore::open(self.db_path.as_std_path(), self.workspaces_dir.clone())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[derive(Serialize)]
struct TaskSummary {
    task_id: String,
    state: String,
    app_name: String,
    api_call_count: u64,
    total_tokens: u64,
    start_time: String,
    end_time: Option<String>,
    error_message: Option<String>,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            state: task.state.as_str().to_string(),
            app_name: task.spec.app_name,
            api_call_count: task.api_call_count,
            total_tokens: task.total_tokens,
            start_time: task.start_time.to_rfc3339(),
            end_time: task.end_time.map(|t| t.to_rfc3339()),
            error_message: task.error_message,
        }
    }
}

#[derive(Serialize)]
struct TaskDetail {
    #[serde(flatten)]
    summary: TaskSummary,
    plan_steps: usize,
    step_records: Vec<StepRecord>,
}

/// Build the observer router.
fn router(state: ObserverState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/heartbeat", get(get_heartbeat))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn list_tasks(
    State(state): State<ObserverState>,
) -> std::result::Result<Json<Vec<TaskSummary>>, StatusCode> {
    let store = state.open_store()?;
    let tasks = store
        .list_tasks()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(tasks.into_iter().map(TaskSummary::from).collect()))
}

async fn get_task(
    State(state): State<ObserverState>,
    UrlPath(id): UrlPath<String>,
) -> std::result::Result<Json<TaskDetail>, StatusCode> {
    let store = state.open_store()?;
    let task = store.get_task(&id).map_err(|_| StatusCode::NOT_FOUND)?;
    let step_records = store
        .list_step_records(&id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(TaskDetail {
        plan_steps: task.plan.as_ref().map_or(0, crate::types::Plan::len),
        summary: TaskSummary::from(task),
        step_records,
    }))
}

async fn get_heartbeat(
    State(state): State<ObserverState>,
) -> std::result::Result<Json<Value>, StatusCode> {
    let content = std::fs::read_to_string(state.heartbeat_path.as_std_path())
        .map_err(|_| StatusCode::NOT_FOUND)?;
    serde_json::from_str(&content)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serve the observer on `127.0.0.1:<port>` until the process exits.
///
/// # Errors
///
/// IO errors from binding or serving propagate.
pub async fn serve(port: u16) -> Result<()> {
    let state = ObserverState {
        db_path: paths::database_path(),
        workspaces_dir: paths::workspaces_dir(),
        heartbeat_path: paths::heartbeat_file(),
    };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "observer UI listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Architecture, TaskSpec, UiSystem};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn seeded_state(tmp: &TempDir) -> ObserverState {
        let db_path = Utf8PathBuf::from_path_buf(tmp.path().join("test.db")).unwrap();
        let workspaces = Utf8PathBuf::from_path_buf(tmp.path().join("workspaces")).unwrap();
        let mut store = StateStore::open(db_path.as_std_path(), workspaces.clone()).unwrap();
        store
            .create_task(
                "t-1",
                &TaskSpec {
                    app_name: "TodoApp".into(),
                    features: vec!["add_task".into()],
                    architecture: Architecture::Mvvm,
                    ui_system: UiSystem::Compose,
                    min_sdk: 24,
                    target_sdk: 34,
                    gradle_version: "8.2.0".into(),
                    kotlin_version: "1.9.20".into(),
                },
            )
            .unwrap();
        drop(store);
        ObserverState {
            db_path,
            workspaces_dir: workspaces,
            heartbeat_path: Utf8PathBuf::from_path_buf(tmp.path().join("heartbeat.json"))
                .unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let tmp = TempDir::new().unwrap();
        let app = router(seeded_state(&tmp));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn task_list_includes_seeded_task() {
        let tmp = TempDir::new().unwrap();
        let app = router(seeded_state(&tmp));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/tasks")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["task_id"], "t-1");
        assert_eq!(json[0]["state"], "PLANNING");
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let tmp = TempDir::new().unwrap();
        let app = router(seeded_state(&tmp));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/tasks/nope")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_round_trips() {
        let tmp = TempDir::new().unwrap();
        let state = seeded_state(&tmp);
        std::fs::write(
            state.heartbeat_path.as_std_path(),
            r#"{"task_id":"t-1","timestamp":"2026-08-02T00:00:00Z"}"#,
        )
        .unwrap();
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/heartbeat")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["task_id"], "t-1");
    }
}
