//! `/api/workflow/*` handlers, one per collaborative verb
//! that isn't a plain collection CRUD operation: `move`, `block`,
//! `comment`, `resume`, `session/link`, `session/unlink`. Every handler
//! deserializes its request body, resolves the task reference, and calls
//! straight into `workflow.rs`/`session.rs` — the same functions the
//! CLI's direct path calls, so both paths stay identical by construction.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::WorkflowError;
use crate::http::SharedState;
use crate::resolver;
use crate::session;
use crate::store::models::{AgentTool, Actor, AuthorType, SessionStatus};
use crate::workflow;

#[derive(Deserialize)]
pub struct MoveRequest {
    pub task: String,
    pub column: String,
    #[serde(default)]
    pub position: Option<f64>,
}

pub async fn move_task(
    State(state): State<SharedState>,
    Json(body): Json<MoveRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let task = workflow::move_task(&state.store, &body.task, &body.column, body.position, Actor::Cli)?;
    Ok(Json(serde_json::to_value(task).expect("task serializes")))
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub task: String,
    pub question: String,
}

pub async fn block(
    State(state): State<SharedState>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let task = workflow::block(&state.store, &body.task, &body.question, Actor::Agent)?;
    Ok(Json(serde_json::to_value(task).expect("task serializes")))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub task: String,
    pub content: String,
    #[serde(default)]
    pub author_type: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
}

pub async fn comment(
    State(state): State<SharedState>,
    Json(body): Json<CommentRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let author_type = match body.author_type.as_deref() {
        Some(s) => AuthorType::from_str(s).map_err(WorkflowError::validation)?,
        None => AuthorType::Human,
    };
    let comment = workflow::comment(
        &state.store,
        &body.task,
        &body.content,
        author_type,
        body.author_id.as_deref(),
        Actor::User,
    )?;
    Ok(Json(serde_json::to_value(comment).expect("comment serializes")))
}

#[derive(Deserialize)]
pub struct ResumeRequest {
    pub task: String,
    #[serde(default)]
    pub exec: bool,
    #[serde(default)]
    pub minimal: bool,
}

pub async fn resume(
    State(state): State<SharedState>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let outcome = workflow::resume(&state.store, &body.task, body.exec, body.minimal, Actor::User).await?;
    let value = match outcome {
        workflow::ResumeOutcome::Printable(recipe) => {
            serde_json::json!({ "executed": false, "recipe": recipe })
        }
        workflow::ResumeOutcome::Executed(task) => {
            serde_json::json!({ "executed": true, "task": task })
        }
    };
    Ok(Json(value))
}

#[derive(Deserialize)]
pub struct SessionLinkRequest {
    pub task: String,
    pub tool: String,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub working_dir: Option<String>,
}

pub async fn session_link(
    State(state): State<SharedState>,
    Json(body): Json<SessionLinkRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let tool = AgentTool::from_str(&body.tool).map_err(WorkflowError::validation)?;
    let task = state.store.run_in_transaction(|tx| {
        let resolved = resolver::must_resolve(tx.conn, &body.task)?;
        session::link(tx, &resolved.id, tool, &body.reference, body.working_dir.as_deref())
    })?;
    Ok(Json(serde_json::to_value(task).expect("task serializes")))
}

#[derive(Deserialize)]
pub struct SessionUnlinkRequest {
    pub task: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn session_unlink(
    State(state): State<SharedState>,
    Json(body): Json<SessionUnlinkRequest>,
) -> Result<Json<Value>, WorkflowError> {
    let status = match body.status.as_deref() {
        Some(s) => SessionStatus::from_str(s).map_err(WorkflowError::validation)?,
        None => SessionStatus::Completed,
    };
    let task = state.store.run_in_transaction(|tx| {
        let resolved = resolver::must_resolve(tx.conn, &body.task)?;
        session::unlink(tx, &resolved.id, status)
    })?;
    Ok(Json(serde_json::to_value(task).expect("task serializes")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::broadcast::Bus;
    use crate::http::{AppState, build_router};
    use crate::store::Store;
    use crate::store::models::ResumeMode;
    use crate::store::{boards, tasks};

    fn test_state() -> Arc<AppState> {
        let bus = Bus::new();
        let store = Arc::new(Store::open_in_memory(bus.clone()).unwrap());
        Arc::new(AppState { store, bus })
    }

    #[tokio::test]
    async fn comment_on_unknown_task_is_not_found() {
        let state = test_state();
        let app = build_router(state);
        let body = serde_json::json!({"task": "nope", "content": "hi"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/workflow/comment")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn block_requires_need_input_column() {
        let state = test_state();
        let board = state
            .store
            .run_in_transaction(|tx| {
                boards::create(
                    tx,
                    "Work",
                    "WRK",
                    vec!["backlog".into(), "todo".into(), "done".into()],
                    None,
                    ResumeMode::Command,
                )
            })
            .unwrap();
        let task = state
            .store
            .run_in_transaction(|tx| {
                tasks::create(
                    tx,
                    &board.id,
                    tasks::NewTask {
                        title: "T".into(),
                        ..Default::default()
                    },
                )
            })
            .unwrap();

        let app = build_router(state);
        let body = serde_json::json!({"task": task.id, "question": "what now?"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/workflow/block")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
