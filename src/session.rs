//! Session binder: links and unlinks a task's current agent session.
//!
//! The current binding lives embedded on the task for O(1) reads;
//! `SessionRecord` rows are the append-only archival ledger. Linking a new
//! session always supersedes the prior active record.

use chrono::Utc;

use crate::errors::WorkflowError;
use crate::history;
use crate::ids::classify_ref;
use crate::store::Tx;
use crate::store::models::{Actor, AgentSession, AgentTool, HistoryAction, SessionRecord, SessionStatus, Task};
use crate::store::{sessions, tasks};

/// `Link(task, tool, ref, working_dir)`. Runs
/// inside the caller's transaction so the embedded binding and the
/// archived ledger always move together as one atomic unit.
pub fn link(
    tx: &Tx,
    task_id: &str,
    tool: AgentTool,
    reference: &str,
    working_dir: Option<&str>,
) -> Result<Task, WorkflowError> {
    let task = tasks::find_by_id(tx.conn, task_id)?;
    let ref_type = classify_ref(reference);
    let working_dir = normalize_working_dir(working_dir);

    // Best-effort transition of any prior active record. Tolerant of a
    // missing match — a manually edited `agent_session` must never block
    // relinking.
    if let Some(prior) = &task.agent_session {
        match sessions::find_active_by_ref(tx.conn, task_id, &prior.reference)? {
            Some(record) => {
                sessions::transition(tx, &record.id, SessionStatus::Abandoned)?;
            }
            None => {
                tracing::debug!(
                    task = %task_id,
                    reference = %prior.reference,
                    "no matching active SessionRecord found for prior agent_session; relinking anyway"
                );
            }
        }
    }

    let now = Utc::now();
    let embedded = AgentSession {
        tool,
        reference: reference.to_string(),
        ref_type,
        working_dir: working_dir.clone(),
        linked_at: now,
    };
    let task = tasks::set_agent_session(tx, task_id, Some(&embedded))?;
    sessions::create(tx, task_id, tool, reference, ref_type, &working_dir)?;
    history::append(
        tx,
        task_id,
        HistoryAction::SessionLinked,
        Actor::User,
        Some(tool.as_str()),
        Some(serde_json::json!({ "tool": tool.as_str(), "ref": reference })),
    )?;
    Ok(task)
}

/// `Unlink(task, status)`
pub fn unlink(tx: &Tx, task_id: &str, status: SessionStatus) -> Result<Task, WorkflowError> {
    if !matches!(status, SessionStatus::Abandoned | SessionStatus::Completed) {
        return Err(WorkflowError::validation(
            "unlink status must be abandoned or completed",
        ));
    }
    let task = tasks::find_by_id(tx.conn, task_id)?;
    if let Some(embedded) = &task.agent_session {
        if let Some(record) = sessions::find_active_by_ref(tx.conn, task_id, &embedded.reference)? {
            sessions::transition(tx, &record.id, status)?;
        }
    }
    let task = tasks::set_agent_session(tx, task_id, None)?;
    history::append(
        tx,
        task_id,
        HistoryAction::SessionUnlinked,
        Actor::User,
        None,
        Some(serde_json::json!({ "status": status.as_str() })),
    )?;
    Ok(task)
}

/// `Show(task)`: read-only, no side effects.
pub fn show(conn: &rusqlite::Connection, task_id: &str) -> Result<Option<AgentSession>, WorkflowError> {
    Ok(tasks::find_by_id(conn, task_id)?.agent_session)
}

/// `History(task)`: read-only, no side effects.
pub fn history_for_task(
    conn: &rusqlite::Connection,
    task_id: &str,
) -> Result<Vec<SessionRecord>, WorkflowError> {
    Ok(sessions::history_for_task(conn, task_id)?)
}

fn normalize_working_dir(working_dir: Option<&str>) -> String {
    match working_dir {
        Some(dir) if !dir.is_empty() => {
            let path = std::path::Path::new(dir);
            if path.is_absolute() {
                dir.to_string()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path).to_string_lossy().to_string())
                    .unwrap_or_else(|_| dir.to_string())
            }
        }
        _ => std::env::current_dir()
            .map(|cwd| cwd.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::store::Store;
    use crate::store::boards;
    use crate::store::models::{RefType, ResumeMode};
    use crate::store::tasks::{self as tasks_mod, NewTask};

    fn task_id(store: &Store) -> String {
        let board = store
            .run_in_transaction(|tx| boards::create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        store
            .run_in_transaction(|tx| {
                tasks_mod::create(
                    tx,
                    &board.id,
                    NewTask {
                        title: "T".into(),
                        ..Default::default()
                    },
                )
            })
            .unwrap()
            .id
    }

    #[test]
    fn link_embeds_binding_and_archives_record() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        let task = store
            .run_in_transaction(|tx| link(tx, &tid, AgentTool::Opencode, "abc-123", Some("/work")))
            .unwrap();
        let session = task.agent_session.unwrap();
        assert_eq!(session.tool, AgentTool::Opencode);
        assert_eq!(session.reference, "abc-123");
        assert_eq!(session.ref_type, RefType::Uuid);

        let active = store
            .read::<_, WorkflowError, _>(|conn| Ok(sessions::find_active_for_task(conn, &tid)?))
            .unwrap();
        assert!(active.is_some());
    }

    #[test]
    fn relink_abandons_prior_active_record() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        store
            .run_in_transaction(|tx| link(tx, &tid, AgentTool::Opencode, "abc-123", Some("/work")))
            .unwrap();
        let task = store
            .run_in_transaction(|tx| link(tx, &tid, AgentTool::ClaudeCode, "550e8400", Some("/work")))
            .unwrap();
        assert_eq!(task.agent_session.unwrap().reference, "550e8400");

        let history = store
            .read::<_, WorkflowError, _>(|conn| Ok(sessions::history_for_task(conn, &tid)?))
            .unwrap();
        assert_eq!(history.len(), 2);
        let abandoned = history
            .iter()
            .find(|r| r.external_ref == "abc-123")
            .unwrap();
        assert_eq!(abandoned.status, SessionStatus::Abandoned);
        assert!(abandoned.ended_at.is_some());
        let active = history.iter().find(|r| r.external_ref == "550e8400").unwrap();
        assert_eq!(active.status, SessionStatus::Active);
    }

    #[test]
    fn unlink_clears_embedded_binding() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        store
            .run_in_transaction(|tx| link(tx, &tid, AgentTool::Opencode, "abc-123", Some("/work")))
            .unwrap();
        let task = store
            .run_in_transaction(|tx| unlink(tx, &tid, SessionStatus::Completed))
            .unwrap();
        assert!(task.agent_session.is_none());
    }

    #[test]
    fn working_dir_defaults_to_caller_cwd_when_empty() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        let task = store
            .run_in_transaction(|tx| link(tx, &tid, AgentTool::Codex, "a-ref", None))
            .unwrap();
        assert!(!task.agent_session.unwrap().working_dir.is_empty());
    }
}
