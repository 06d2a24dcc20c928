//! Generic `/api/collections/<C>/records` handlers.
//!
//! A collection-generic path needs "one query per operation, no ORM"
//! texture across six collections, so this module dispatches on the
//! `collection` path segment with a `match` rather than a route per
//! entity. Every branch calls straight into `workflow.rs` (for `tasks`,
//! so history and the column state machine stay enforced) or the
//! relevant `store::*` module wrapped in `Store::run_in_transaction` (for
//! the collections with no dedicated workflow verb) — never raw SQL from
//! this file. The API implements no transactional logic of its own.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::errors::WorkflowError;
use crate::http::SharedState;
use crate::resolver;
use crate::store::models::{Actor, MatchMode, Priority, ResumeMode, TaskType};
use crate::store::{boards, comments, epics, sessions, tasks, views};
use crate::workflow;

pub async fn list_records(
    State(state): State<SharedState>,
    Path(collection): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, WorkflowError> {
    let records = match collection.as_str() {
        "boards" => {
            let boards = state.store.read::<_, WorkflowError, _>(|conn| Ok(boards::list(conn)?))?;
            serde_json::to_value(boards).expect("boards serialize")
        }
        "tasks" => {
            let filter = list_filter_from_params(&params)?;
            let tasks = workflow::list_tasks(&state.store, &filter)?;
            serde_json::to_value(tasks).expect("tasks serialize")
        }
        "comments" => {
            let task_id = params.get("task").ok_or_else(|| {
                WorkflowError::validation("comments list requires a ?task= filter")
            })?;
            let comments = state
                .store
                .read::<_, WorkflowError, _>(|conn| Ok(comments::list_for_task(conn, task_id)?))?;
            serde_json::to_value(comments).expect("comments serialize")
        }
        "epics" => {
            let board_id = params
                .get("board")
                .ok_or_else(|| WorkflowError::validation("epics list requires a ?board= filter"))?;
            let epics = state
                .store
                .read::<_, WorkflowError, _>(|conn| Ok(epics::list_for_board(conn, board_id)?))?;
            serde_json::to_value(epics).expect("epics serialize")
        }
        "sessions" => {
            let task_id = params.get("task").ok_or_else(|| {
                WorkflowError::validation("sessions list requires a ?task= filter")
            })?;
            let records = state
                .store
                .read::<_, WorkflowError, _>(|conn| Ok(sessions::history_for_task(conn, task_id)?))?;
            serde_json::to_value(records).expect("sessions serialize")
        }
        "views" => {
            let board_id = params
                .get("board")
                .ok_or_else(|| WorkflowError::validation("views list requires a ?board= filter"))?;
            let views = state
                .store
                .read::<_, WorkflowError, _>(|conn| Ok(views::list_for_board(conn, board_id)?))?;
            serde_json::to_value(views).expect("views serialize")
        }
        other => return Err(unknown_collection(other)),
    };
    Ok(Json(records))
}

pub async fn get_record(
    State(state): State<SharedState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, WorkflowError> {
    let record = match collection.as_str() {
        "boards" => {
            let board = state.store.read::<_, WorkflowError, _>(|conn| workflow::resolve_board(conn, &id))?;
            serde_json::to_value(board).expect("board serializes")
        }
        "tasks" => {
            let task = state.store.read::<_, WorkflowError, _>(|conn| resolver::must_resolve(conn, &id))?;
            serde_json::to_value(task).expect("task serializes")
        }
        "comments" => {
            let comment = state
                .store
                .read::<_, WorkflowError, _>(|conn| Ok(comments::find_by_id(conn, &id)?))?;
            serde_json::to_value(comment).expect("comment serializes")
        }
        "epics" => {
            let epic = state.store.read::<_, WorkflowError, _>(|conn| Ok(epics::find_by_id(conn, &id)?))?;
            serde_json::to_value(epic).expect("epic serializes")
        }
        "views" => {
            let view = state.store.read::<_, WorkflowError, _>(|conn| Ok(views::find_by_id(conn, &id)?))?;
            serde_json::to_value(view).expect("view serializes")
        }
        other => return Err(unknown_collection(other)),
    };
    Ok(Json(record))
}

pub async fn create_record(
    State(state): State<SharedState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), WorkflowError> {
    let record = match collection.as_str() {
        "boards" => {
            let name = field_str(&body, "name")?;
            let prefix = field_str(&body, "prefix")?;
            let columns = field_str_vec(&body, "columns");
            let color = field_opt_str(&body, "color");
            let resume_mode = match body.get("resume_mode").and_then(Value::as_str) {
                Some(s) => ResumeMode::from_str(s).map_err(WorkflowError::validation)?,
                None => ResumeMode::default(),
            };
            let board = state
                .store
                .run_in_transaction(|tx| boards::create(tx, &name, &prefix, columns, color, resume_mode))?;
            serde_json::to_value(board).expect("board serializes")
        }
        "tasks" => {
            let board_ref = field_str(&body, "board")?;
            let new = new_task_from_json(&body)?;
            let task = workflow::create_task(&state.store, &board_ref, new, Actor::Cli)?;
            serde_json::to_value(task).expect("task serializes")
        }
        "comments" => {
            let task_ref = field_str(&body, "task")?;
            let content = field_str(&body, "content")?;
            let author_type = match body.get("author_type").and_then(Value::as_str) {
                Some(s) => crate::store::models::AuthorType::from_str(s).map_err(WorkflowError::validation)?,
                None => crate::store::models::AuthorType::Human,
            };
            let author_id = field_opt_str(&body, "author_id");
            let comment = workflow::comment(
                &state.store,
                &task_ref,
                &content,
                author_type,
                author_id.as_deref(),
                Actor::Cli,
            )?;
            serde_json::to_value(comment).expect("comment serializes")
        }
        "epics" => {
            let board_id = field_str(&body, "board")?;
            let title = field_str(&body, "title")?;
            let description = body.get("description").and_then(Value::as_str).unwrap_or("").to_string();
            let color = field_opt_str(&body, "color");
            let epic = state
                .store
                .run_in_transaction(|tx| epics::create(tx, &board_id, &title, &description, color))?;
            serde_json::to_value(epic).expect("epic serializes")
        }
        "views" => {
            let board_id = field_str(&body, "board")?;
            let name = field_str(&body, "name")?;
            let filters = body
                .get("filters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let match_mode = match body.get("match_mode").and_then(Value::as_str) {
                Some(s) => MatchMode::from_str(s).map_err(WorkflowError::validation)?,
                None => MatchMode::All,
            };
            let display = body.get("display").cloned().unwrap_or_else(|| json!({}));
            let is_favorite = body.get("is_favorite").and_then(Value::as_bool).unwrap_or(false);
            let view = state.store.run_in_transaction(|tx| {
                views::create(tx, &board_id, &name, filters, match_mode, display, is_favorite)
            })?;
            serde_json::to_value(view).expect("view serializes")
        }
        other => return Err(unknown_collection(other)),
    };
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_record(
    State(state): State<SharedState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, WorkflowError> {
    let record = match collection.as_str() {
        "boards" => {
            let name = body.get("name").and_then(Value::as_str);
            let columns = body.get("columns").map(|_| field_str_vec(&body, "columns"));
            let color = body.get("color").map(|v| v.as_str().map(|s| s.to_string()));
            let resume_mode = match body.get("resume_mode").and_then(Value::as_str) {
                Some(s) => Some(ResumeMode::from_str(s).map_err(WorkflowError::validation)?),
                None => None,
            };
            let board = workflow::update_board(&state.store, &id, name, columns, color, resume_mode)?;
            serde_json::to_value(board).expect("board serializes")
        }
        "tasks" => {
            let fields = task_update_from_json(&body)?;
            let task = workflow::update_task(&state.store, &id, fields, Actor::Cli)?;
            serde_json::to_value(task).expect("task serializes")
        }
        "epics" => {
            let title = body.get("title").and_then(Value::as_str);
            let description = body.get("description").and_then(Value::as_str);
            let color = body.get("color").map(|v| v.as_str().map(|s| s.to_string()));
            let epic = state
                .store
                .run_in_transaction(|tx| epics::update(tx, &id, title, description, color))?;
            serde_json::to_value(epic).expect("epic serializes")
        }
        other => return Err(unknown_collection(other)),
    };
    Ok(Json(record))
}

pub async fn delete_record(
    State(state): State<SharedState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, WorkflowError> {
    match collection.as_str() {
        "boards" => state.store.run_in_transaction(|tx| boards::delete(tx, &id))?,
        "tasks" => workflow::delete_task(&state.store, &id, Actor::Cli)?,
        "epics" => {
            state.store.run_in_transaction(|tx| epics::delete(tx, &id).map(|_| ()))?
        }
        "views" => state.store.run_in_transaction(|tx| views::delete(tx, &id))?,
        other => return Err(unknown_collection(other)),
    }
    Ok(StatusCode::NO_CONTENT)
}

/// An unknown collection name is a 404, same as an unknown record id —
/// there's no distinct error kind for it.
fn unknown_collection(_name: &str) -> WorkflowError {
    WorkflowError::NotFound
}

fn field_str(body: &Value, key: &str) -> Result<String, WorkflowError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| WorkflowError::validation(format!("missing required field '{key}'")))
}

fn field_opt_str(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(|s| s.to_string())
}

fn field_str_vec(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn new_task_from_json(body: &Value) -> Result<tasks::NewTask, WorkflowError> {
    let title = field_str(body, "title")?;
    let task_type = match body.get("type").and_then(Value::as_str) {
        Some(s) => TaskType::from_str(s).map_err(WorkflowError::validation)?,
        None => TaskType::default(),
    };
    let priority = match body.get("priority").and_then(Value::as_str) {
        Some(s) => Priority::from_str(s).map_err(WorkflowError::validation)?,
        None => Priority::default(),
    };
    let due_date = body
        .get("due_date")
        .and_then(Value::as_str)
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| WorkflowError::validation("bad due_date"))?;
    Ok(tasks::NewTask {
        title,
        description: body.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
        task_type,
        priority,
        column: field_opt_str(body, "column"),
        epic: field_opt_str(body, "epic"),
        parent: field_opt_str(body, "parent"),
        labels: field_str_vec(body, "labels"),
        blocked_by: field_str_vec(body, "blocked_by"),
        due_date,
        created_by: crate::store::models::CreatedBy::Cli,
        created_by_agent: field_opt_str(body, "created_by_agent"),
    })
}

fn task_update_from_json(body: &Value) -> Result<tasks::TaskUpdate, WorkflowError> {
    let task_type = match body.get("type").and_then(Value::as_str) {
        Some(s) => Some(TaskType::from_str(s).map_err(WorkflowError::validation)?),
        None => None,
    };
    let priority = match body.get("priority").and_then(Value::as_str) {
        Some(s) => Some(Priority::from_str(s).map_err(WorkflowError::validation)?),
        None => None,
    };
    let due_date = match body.get("due_date") {
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(
            s.parse().map_err(|_| WorkflowError::validation("bad due_date"))?,
        )),
        _ => None,
    };
    Ok(tasks::TaskUpdate {
        title: body.get("title").and_then(Value::as_str).map(|s| s.to_string()),
        description: body.get("description").and_then(Value::as_str).map(|s| s.to_string()),
        task_type,
        priority,
        epic: body.get("epic").map(|v| v.as_str().map(|s| s.to_string())),
        labels: body.get("labels").map(|_| field_str_vec(body, "labels")),
        blocked_by: body.get("blocked_by").map(|_| field_str_vec(body, "blocked_by")),
        due_date,
        board: body.get("board").and_then(Value::as_str).map(|s| s.to_string()),
    })
}

fn list_filter_from_params(params: &HashMap<String, String>) -> Result<tasks::ListFilter, WorkflowError> {
    let parse_bool = |k: &str| params.get(k).map(|v| v == "true" || v == "1");
    let parse_i64 = |k: &str| params.get(k).and_then(|v| v.parse::<i64>().ok());
    let parse_date = |k: &str| -> Result<Option<chrono::DateTime<chrono::Utc>>, WorkflowError> {
        params
            .get(k)
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| WorkflowError::validation(format!("bad date filter '{k}'")))
    };
    Ok(tasks::ListFilter {
        board: params.get("board").cloned(),
        column: params.get("column").cloned(),
        need_input: parse_bool("need_input").unwrap_or(false),
        task_type: params
            .get("type")
            .map(|s| TaskType::from_str(s).map_err(WorkflowError::validation))
            .transpose()?,
        priority: params
            .get("priority")
            .map(|s| Priority::from_str(s).map_err(WorkflowError::validation))
            .transpose()?,
        label: params.get("label").cloned(),
        epic: params.get("epic").cloned(),
        parent: params.get("parent").cloned(),
        has_due: parse_bool("has_due"),
        due_before: parse_date("due_before")?,
        due_after: parse_date("due_after")?,
        search: params.get("search").cloned(),
        limit: parse_i64("limit"),
        offset: parse_i64("offset"),
    })
}
