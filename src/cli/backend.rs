//! CLI↔server hybrid write path: a write through the CLI's
//! direct path and a write through the HTTP API must produce identical
//! on-disk state. `Backend` picks one of two routes to the same
//! underlying operations — never its own copy of the workflow logic — so
//! that property holds by construction.
//!
//! Probes `GET /api/health` with a short timeout, and falls back to
//! opening the `Store` directly when nothing answers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::broadcast::Bus;
use crate::errors::{CliError, WorkflowError};
use crate::resolver;
use crate::session;
use crate::store::models::{
    Actor, AgentTool, AuthorType, Board, Comment, ResumeMode, SessionRecord, SessionStatus, Task,
};
use crate::store::{Store, boards, comments, sessions, tasks};
use crate::workflow::{self, ResumeOutcome};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Picks between a network call and a direct `Store` open. Both variants
/// implement the same verb surface below so every CLI subcommand handler
/// is backend-agnostic.
pub enum Backend {
    Http { client: reqwest::Client, base_url: String },
    Direct { store: Arc<Store> },
}

impl Backend {
    /// Probe `{base_url}/api/health`; if it answers within [`PROBE_TIMEOUT`],
    /// route through HTTP so the running server's Bus broadcasts the write.
    /// Otherwise open the `Store` directly. `force_direct` (the CLI's
    /// `--direct` flag) skips the probe entirely.
    pub async fn resolve(db_path: &Path, base_url: &str, force_direct: bool, verbose: bool) -> Result<Self, CliError> {
        if !force_direct {
            let client = reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .map_err(|e| CliError::Other(e.into()))?;
            if client.get(format!("{base_url}/api/health")).send().await.is_ok() {
                if verbose {
                    tracing::info!(%base_url, "routing through running server");
                }
                return Ok(Backend::Http {
                    client,
                    base_url: base_url.to_string(),
                });
            }
        }
        if verbose {
            tracing::info!(path = %db_path.display(), "no server reachable, opening store directly");
        }
        let store = Store::open(db_path, Bus::new()).map_err(WorkflowError::from)?;
        Ok(Backend::Direct { store: Arc::new(store) })
    }

    async fn get(&self, path: &str) -> Result<Value, CliError> {
        match self {
            Backend::Http { client, base_url } => {
                let resp = client.get(format!("{base_url}{path}")).send().await.map_err(|e| {
                    CliError::Other(anyhow::anyhow!("request to {path} failed: {e}"))
                })?;
                http_response_to_value(resp).await
            }
            Backend::Direct { .. } => unreachable!("direct reads dispatch through typed methods"),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, CliError> {
        match self {
            Backend::Http { client, base_url } => {
                let resp = client
                    .post(format!("{base_url}{path}"))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| CliError::Other(anyhow::anyhow!("request to {path} failed: {e}")))?;
                http_response_to_value(resp).await
            }
            Backend::Direct { .. } => unreachable!("direct writes dispatch through typed methods"),
        }
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value, CliError> {
        match self {
            Backend::Http { client, base_url } => {
                let resp = client
                    .patch(format!("{base_url}{path}"))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| CliError::Other(anyhow::anyhow!("request to {path} failed: {e}")))?;
                http_response_to_value(resp).await
            }
            Backend::Direct { .. } => unreachable!("direct writes dispatch through typed methods"),
        }
    }

    pub async fn create_task(&self, board_ref: &str, new: tasks::NewTask) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::create_task(store, board_ref, new, Actor::Cli)?),
            Backend::Http { .. } => {
                let body = json!({
                    "board": board_ref,
                    "title": new.title,
                    "description": new.description,
                    "type": new.task_type.as_str(),
                    "priority": new.priority.as_str(),
                    "column": new.column,
                    "epic": new.epic,
                    "parent": new.parent,
                    "labels": new.labels,
                    "blocked_by": new.blocked_by,
                    "due_date": new.due_date,
                });
                let value = self.post("/api/collections/tasks/records", body).await?;
                parse(value)
            }
        }
    }

    pub async fn list_tasks(&self, filter: &tasks::ListFilter) -> Result<Vec<Task>, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::list_tasks(store, filter)?),
            Backend::Http { .. } => {
                let query = list_filter_query(filter);
                let value = self.get(&format!("/api/collections/tasks/records?{query}")).await?;
                parse(value)
            }
        }
    }

    pub async fn show_task(&self, task_ref: &str) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => {
                Ok(store.read::<_, WorkflowError, _>(|conn| resolver::must_resolve(conn, task_ref))?)
            }
            Backend::Http { .. } => {
                let value = self.get(&format!("/api/collections/tasks/records/{task_ref}")).await?;
                parse(value)
            }
        }
    }

    pub async fn move_task(&self, task_ref: &str, column: &str, position: Option<f64>) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::move_task(store, task_ref, column, position, Actor::Cli)?),
            Backend::Http { .. } => {
                let body = json!({ "task": task_ref, "column": column, "position": position });
                let value = self.post("/api/workflow/move", body).await?;
                parse(value)
            }
        }
    }

    pub async fn update_task(&self, task_ref: &str, fields: tasks::TaskUpdate) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::update_task(store, task_ref, fields, Actor::Cli)?),
            Backend::Http { .. } => {
                let body = json!({
                    "title": fields.title,
                    "description": fields.description,
                    "type": fields.task_type.map(|t| t.as_str()),
                    "priority": fields.priority.map(|p| p.as_str()),
                    "epic": fields.epic,
                    "labels": fields.labels,
                    "blocked_by": fields.blocked_by,
                    "due_date": fields.due_date,
                    "board": fields.board,
                });
                let value = self
                    .patch(&format!("/api/collections/tasks/records/{task_ref}"), body)
                    .await?;
                parse(value)
            }
        }
    }

    pub async fn delete_task(&self, task_ref: &str) -> Result<(), CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::delete_task(store, task_ref, Actor::Cli)?),
            Backend::Http { client, base_url } => {
                let resp = client
                    .delete(format!("{base_url}/api/collections/tasks/records/{task_ref}"))
                    .send()
                    .await
                    .map_err(|e| CliError::Other(anyhow::anyhow!("delete failed: {e}")))?;
                http_response_to_value(resp).await.map(|_| ())
            }
        }
    }

    pub async fn block(&self, task_ref: &str, question: &str) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::block(store, task_ref, question, Actor::User)?),
            Backend::Http { .. } => {
                let body = json!({ "task": task_ref, "question": question });
                let value = self.post("/api/workflow/block", body).await?;
                parse(value)
            }
        }
    }

    pub async fn comment(&self, task_ref: &str, content: &str) -> Result<Comment, CliError> {
        match self {
            Backend::Direct { store } => {
                Ok(workflow::comment(store, task_ref, content, AuthorType::Human, None, Actor::User)?)
            }
            Backend::Http { .. } => {
                let body = json!({ "task": task_ref, "content": content });
                let value = self.post("/api/workflow/comment", body).await?;
                parse(value)
            }
        }
    }

    pub async fn list_comments(&self, task_ref: &str) -> Result<Vec<Comment>, CliError> {
        match self {
            Backend::Direct { store } => {
                let task = store.read::<_, WorkflowError, _>(|conn| resolver::must_resolve(conn, task_ref))?;
                Ok(store.read::<_, WorkflowError, _>(|conn| Ok(comments::list_for_task(conn, &task.id)?))?)
            }
            Backend::Http { .. } => {
                let task = self.show_task(task_ref).await?;
                let value = self.get(&format!("/api/collections/comments/records?task={}", task.id)).await?;
                parse(value)
            }
        }
    }

    pub async fn session_link(
        &self,
        task_ref: &str,
        tool: AgentTool,
        reference: &str,
        working_dir: Option<&str>,
    ) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(store.run_in_transaction(|tx| {
                let task = resolver::must_resolve(tx.conn, task_ref)?;
                session::link(tx, &task.id, tool, reference, working_dir)
            })?),
            Backend::Http { .. } => {
                let body = json!({
                    "task": task_ref,
                    "tool": tool.as_str(),
                    "ref": reference,
                    "working_dir": working_dir,
                });
                let value = self.post("/api/workflow/session/link", body).await?;
                parse(value)
            }
        }
    }

    pub async fn session_unlink(&self, task_ref: &str, status: SessionStatus) -> Result<Task, CliError> {
        match self {
            Backend::Direct { store } => Ok(store.run_in_transaction(|tx| {
                let task = resolver::must_resolve(tx.conn, task_ref)?;
                session::unlink(tx, &task.id, status)
            })?),
            Backend::Http { .. } => {
                let body = json!({ "task": task_ref, "status": status.as_str() });
                let value = self.post("/api/workflow/session/unlink", body).await?;
                parse(value)
            }
        }
    }

    pub async fn session_show(&self, task_ref: &str) -> Result<Value, CliError> {
        match self {
            Backend::Direct { store } => {
                let task = store.read::<_, WorkflowError, _>(|conn| resolver::must_resolve(conn, task_ref))?;
                Ok(serde_json::to_value(task.agent_session).expect("session serializes"))
            }
            Backend::Http { .. } => {
                let value = self.get(&format!("/api/collections/tasks/records/{task_ref}")).await?;
                Ok(value.get("agent_session").cloned().unwrap_or(Value::Null))
            }
        }
    }

    pub async fn session_history(&self, task_ref: &str) -> Result<Vec<SessionRecord>, CliError> {
        match self {
            Backend::Direct { store } => {
                let task = store.read::<_, WorkflowError, _>(|conn| resolver::must_resolve(conn, task_ref))?;
                Ok(store.read::<_, WorkflowError, _>(|conn| Ok(sessions::history_for_task(conn, &task.id)?))?)
            }
            Backend::Http { .. } => {
                let task = self.show_task(task_ref).await?;
                let value = self.get(&format!("/api/collections/sessions/records?task={}", task.id)).await?;
                parse(value)
            }
        }
    }

    pub async fn resume(&self, task_ref: &str, exec: bool, minimal: bool) -> Result<ResumeOutcome, CliError> {
        match self {
            Backend::Direct { store } => Ok(workflow::resume(store, task_ref, exec, minimal, Actor::User).await?),
            Backend::Http { .. } => {
                let body = json!({ "task": task_ref, "exec": exec, "minimal": minimal });
                let value = self.post("/api/workflow/resume", body).await?;
                if value.get("executed").and_then(Value::as_bool).unwrap_or(false) {
                    Ok(ResumeOutcome::Executed(parse(value["task"].clone())?))
                } else {
                    Ok(ResumeOutcome::Printable(
                        value["recipe"].as_str().unwrap_or_default().to_string(),
                    ))
                }
            }
        }
    }

    pub async fn board_create(
        &self,
        name: &str,
        prefix: &str,
        columns: Vec<String>,
        color: Option<String>,
        resume_mode: ResumeMode,
    ) -> Result<Board, CliError> {
        match self {
            Backend::Direct { store } => {
                Ok(store.run_in_transaction(|tx| boards::create(tx, name, prefix, columns, color, resume_mode))?)
            }
            Backend::Http { .. } => {
                let body = json!({
                    "name": name, "prefix": prefix, "columns": columns,
                    "color": color, "resume_mode": resume_mode.as_str(),
                });
                let value = self.post("/api/collections/boards/records", body).await?;
                parse(value)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn board_update(
        &self,
        board_ref: &str,
        name: Option<&str>,
        columns: Option<Vec<String>>,
        color: Option<Option<String>>,
        resume_mode: Option<ResumeMode>,
    ) -> Result<Board, CliError> {
        match self {
            Backend::Direct { store } => {
                Ok(workflow::update_board(store, board_ref, name, columns, color, resume_mode)?)
            }
            Backend::Http { .. } => {
                let body = json!({
                    "name": name,
                    "columns": columns,
                    "color": color,
                    "resume_mode": resume_mode.map(|m| m.as_str()),
                });
                let value = self
                    .patch(&format!("/api/collections/boards/records/{board_ref}"), body)
                    .await?;
                parse(value)
            }
        }
    }

    pub async fn board_list(&self) -> Result<Vec<Board>, CliError> {
        match self {
            Backend::Direct { store } => Ok(store.read::<_, WorkflowError, _>(|conn| Ok(boards::list(conn)?))?),
            Backend::Http { .. } => {
                let value = self.get("/api/collections/boards/records").await?;
                parse(value)
            }
        }
    }

    pub async fn board_show(&self, board_ref: &str) -> Result<Board, CliError> {
        match self {
            Backend::Direct { store } => {
                Ok(store.read::<_, WorkflowError, _>(|conn| workflow::resolve_board(conn, board_ref))?)
            }
            Backend::Http { .. } => {
                let value = self.get(&format!("/api/collections/boards/records/{board_ref}")).await?;
                parse(value)
            }
        }
    }

    /// Only the direct path ever builds export snapshots or applies an
    /// import — `export`/`import` read and write the whole database at
    /// once and have no corresponding workflow verb, so there is nothing
    /// for an HTTP route to gate; the Store is local to the machine
    /// running the command.
    pub fn store(&self) -> Option<&Arc<Store>> {
        match self {
            Backend::Direct { store } => Some(store),
            Backend::Http { .. } => None,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CliError> {
    serde_json::from_value(value).map_err(|e| CliError::Other(anyhow::anyhow!("malformed server response: {e}")))
}

async fn http_response_to_value(resp: reqwest::Response) -> Result<Value, CliError> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .unwrap_or_else(|_| json!({ "error": "non-JSON response" }));
    if status.is_success() {
        Ok(body)
    } else if status.as_u16() == 404 {
        Err(CliError::Workflow(WorkflowError::NotFound))
    } else if status.as_u16() == 400 && body.get("candidates").is_some() {
        let candidates = body["candidates"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Err(CliError::Workflow(WorkflowError::Ambiguous { candidates }))
    } else {
        let message = body.get("error").and_then(Value::as_str).unwrap_or("request failed").to_string();
        Err(CliError::Workflow(WorkflowError::validation(message)))
    }
}

/// Builds the same query string `http/collections.rs::list_filter_from_params`
/// parses back, so every field on `ListFilter` has to round-trip through
/// here — a field added to one without the other silently breaks the HTTP
/// backend only, since the Direct backend passes the struct straight through.
fn list_filter_query(filter: &tasks::ListFilter) -> String {
    let mut parts = Vec::new();
    if let Some(v) = &filter.board {
        parts.push(format!("board={}", percent_encode(v)));
    }
    if let Some(v) = &filter.column {
        parts.push(format!("column={}", percent_encode(v)));
    }
    if filter.need_input {
        parts.push("need_input=true".to_string());
    }
    if let Some(v) = filter.task_type {
        parts.push(format!("type={}", v.as_str()));
    }
    if let Some(v) = filter.priority {
        parts.push(format!("priority={}", v.as_str()));
    }
    if let Some(v) = &filter.label {
        parts.push(format!("label={}", percent_encode(v)));
    }
    if let Some(v) = &filter.epic {
        parts.push(format!("epic={}", percent_encode(v)));
    }
    if let Some(v) = &filter.parent {
        parts.push(format!("parent={}", percent_encode(v)));
    }
    if let Some(v) = filter.has_due {
        parts.push(format!("has_due={v}"));
    }
    if let Some(v) = filter.due_before {
        parts.push(format!("due_before={}", percent_encode(&v.to_rfc3339())));
    }
    if let Some(v) = filter.due_after {
        parts.push(format!("due_after={}", percent_encode(&v.to_rfc3339())));
    }
    if let Some(v) = &filter.search {
        parts.push(format!("search={}", percent_encode(v)));
    }
    if let Some(v) = filter.limit {
        parts.push(format!("limit={v}"));
    }
    if let Some(v) = filter.offset {
        parts.push(format!("offset={v}"));
    }
    parts.join("&")
}

/// Minimal query-component percent-encoding: alphanumerics and `-_.~` pass
/// through, everything else (including `&`, `=`, and whitespace) is escaped
/// so a filter value can never be mistaken for another query parameter.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_backend_round_trips_a_board() {
        let store = Arc::new(Store::open_in_memory(Bus::new()).unwrap());
        let backend = Backend::Direct { store };
        let board = backend
            .board_create("Work", "WRK", vec![], None, ResumeMode::Command)
            .await
            .unwrap();
        let listed = backend.board_list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, board.id);
    }
}
