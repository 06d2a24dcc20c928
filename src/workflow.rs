//! Workflow engine: the column state machine and the collaborative verbs
//! built on top of it.
//!
//! Every verb here runs inside one `Store::run_in_transaction` closure so
//! it is all-or-nothing — except `resume`'s spawn step, which must never
//! run inside a transaction (a detached child process must never hold a
//! DB lock).

use crate::context;
use crate::dispatcher::SpawnRecipe;
use crate::errors::WorkflowError;
use crate::history;
use crate::resolver;
use crate::store::models::{Actor, AuthorType, Board, HistoryAction, ResumeMode, Task};
use crate::store::{Store, boards, comments, tasks};

/// Resolve a board reference (id, prefix, or exact name) to a canonical
/// `Board`, mirroring `resolver.rs`'s task-reference precedence. Boards get
/// this narrower sibling here rather than living in `resolver.rs` itself,
/// since they have no display-id/short-id concept of their own.
pub fn resolve_board(conn: &rusqlite::Connection, reference: &str) -> Result<Board, WorkflowError> {
    if let Ok(board) = boards::find_by_id(conn, reference) {
        return Ok(board);
    }
    if let Some(board) = boards::find_by_prefix(conn, reference)? {
        return Ok(board);
    }
    if let Some(board) = boards::find_by_name(conn, reference)? {
        return Ok(board);
    }
    Err(WorkflowError::NotFound)
}

/// Update a board's mutable fields. `boards::update`'s doc comment defers
/// the column-preserving invariant (a board's `columns` must still cover
/// every column a live task on it occupies) to this caller, since only the
/// workflow layer can see the tasks table alongside boards.
pub fn update_board(
    store: &Store,
    board_ref: &str,
    name: Option<&str>,
    columns: Option<Vec<String>>,
    color: Option<Option<String>>,
    resume_mode: Option<ResumeMode>,
) -> Result<Board, WorkflowError> {
    store.run_in_transaction(|tx| {
        let board = resolve_board(tx.conn, board_ref)?;
        if let Some(new_columns) = &columns {
            let filter = tasks::ListFilter {
                board: Some(board.id.clone()),
                ..Default::default()
            };
            for task in tasks::list(tx.conn, &filter)? {
                if !new_columns.iter().any(|c| c == &task.column) {
                    return Err(WorkflowError::validation(format!(
                        "column '{}' still holds task {} and cannot be removed",
                        task.column, task.id
                    )));
                }
            }
        }
        Ok(boards::update(tx, &board.id, name, columns, color, resume_mode)?)
    })
}

/// Create a task. The `created` history entry is recorded here rather
/// than scattered across every caller.
pub fn create_task(
    store: &Store,
    board_ref: &str,
    new: tasks::NewTask,
    actor: Actor,
) -> Result<Task, WorkflowError> {
    store.run_in_transaction(|tx| {
        let board = resolve_board(tx.conn, board_ref)?;
        let task = tasks::create(tx, &board.id, new)?;
        history::append(tx, &task.id, HistoryAction::Created, actor, None, None)?;
        Ok(task)
    })
}

/// Move a task to a column, optionally at an explicit position.
pub fn move_task(
    store: &Store,
    task_ref: &str,
    column: &str,
    position: Option<f64>,
    actor: Actor,
) -> Result<Task, WorkflowError> {
    store.run_in_transaction(|tx| {
        let task = resolver::must_resolve(tx.conn, task_ref)?;
        let from_column = task.column.clone();
        let moved = tasks::move_task(tx, &task.id, column, position)?;
        history::append(
            tx,
            &task.id,
            HistoryAction::Moved,
            actor,
            None,
            Some(serde_json::json!({ "field": "column", "from": from_column, "to": column })),
        )?;
        Ok(moved)
    })
}

/// Partial task update. `fields` already excludes `seq`,
/// `display_id`, `history`, `created` at the type level (`TaskUpdate` has
/// no such members), so there is no attempt to reject here that the
/// compiler doesn't already guarantee. `fields.board`, if set, is a raw
/// reference (id, prefix, or name) resolved here to a canonical id before
/// `tasks::update` sees it — a cross-board move, including the §9
/// real-time "moved to a different board" case.
pub fn update_task(
    store: &Store,
    task_ref: &str,
    fields: tasks::TaskUpdate,
    actor: Actor,
) -> Result<Task, WorkflowError> {
    store.run_in_transaction(|tx| {
        let task = resolver::must_resolve(tx.conn, task_ref)?;
        let from_board = task.board.clone();
        let resolved_board = fields
            .board
            .as_deref()
            .map(|board_ref| resolve_board(tx.conn, board_ref))
            .transpose()?
            .map(|b| b.id);
        let moves_board = resolved_board.as_deref().is_some_and(|id| id != from_board);
        let fields = tasks::TaskUpdate {
            board: resolved_board,
            ..fields
        };
        let updated = tasks::update(tx, &task.id, fields)?;
        let changes = moves_board.then(|| {
            serde_json::json!({ "field": "board", "from": from_board, "to": updated.board })
        });
        history::append(tx, &task.id, HistoryAction::Updated, actor, None, changes)?;
        Ok(updated)
    })
}

/// Delete a task, cascading its comments and history. History `deleted`
/// is appended just before the task row (and its cascade-deleted
/// comments/history) are removed by the same statement's commit — the
/// entry never outlives the commit that removes its own parent, so a
/// deletion is discarded with the task it describes, recoverable only
/// from a database backup taken before the transaction committed.
pub fn delete_task(store: &Store, task_ref: &str, actor: Actor) -> Result<(), WorkflowError> {
    store.run_in_transaction(|tx| {
        let task = resolver::must_resolve(tx.conn, task_ref)?;
        history::append(tx, &task.id, HistoryAction::Deleted, actor, None, None)?;
        tasks::delete(tx, &task.id)?;
        Ok(())
    })
}

pub fn list_tasks(store: &Store, filter: &tasks::ListFilter) -> Result<Vec<Task>, WorkflowError> {
    Ok(store.read::<_, WorkflowError, _>(|conn| Ok(tasks::list(conn, filter)?))?)
}

/// Block a task on a question. Single transaction: move to `need_input`,
/// create the question comment, record both history entries. Atomicity is
/// the load-bearing property here — no subscriber can ever observe the
/// move without the comment.
pub fn block(store: &Store, task_ref: &str, question: &str, actor: Actor) -> Result<Task, WorkflowError> {
    store.run_in_transaction(|tx| {
        let task = resolver::must_resolve(tx.conn, task_ref)?;
        let board = boards::find_by_id(tx.conn, &task.board)?;
        if !board.supports_need_input() {
            return Err(WorkflowError::unsupported(
                "board does not declare a need_input column",
            ));
        }
        let prior_column = task.column.clone();
        let moved = tasks::move_task(tx, &task.id, "need_input", None)?;
        let comment = comments::create(tx, &task.id, question, AuthorType::Agent, None)?;
        history::append(
            tx,
            &task.id,
            HistoryAction::Blocked,
            actor,
            None,
            Some(serde_json::json!({ "prior_column": prior_column })),
        )?;
        history::append(
            tx,
            &task.id,
            HistoryAction::Commented,
            Actor::Agent,
            None,
            Some(serde_json::json!({ "comment_id": comment.id })),
        )?;
        Ok(moved)
    })
}

/// Append a comment to a task's thread. No column transition; the
/// auto-resume watcher reacts to the broadcast this produces separately.
pub fn comment(
    store: &Store,
    task_ref: &str,
    content: &str,
    author_type: AuthorType,
    author_id: Option<&str>,
    actor: Actor,
) -> Result<crate::store::models::Comment, WorkflowError> {
    store.run_in_transaction(|tx| {
        let task = resolver::must_resolve(tx.conn, task_ref)?;
        let comment = comments::create(tx, &task.id, content, author_type, author_id)?;
        history::append(
            tx,
            &task.id,
            HistoryAction::Commented,
            actor,
            None,
            Some(serde_json::json!({ "comment_id": comment.id })),
        )?;
        Ok(comment)
    })
}

/// The result of `Resume`.
pub enum ResumeOutcome {
    /// `exec = false` (or the board's `resume_mode` is `manual`): the
    /// printable recipe, state untouched.
    Printable(String),
    /// `exec = true` and the spawn succeeded: the task after its column
    /// transition.
    Executed(Task),
}

/// Resume a blocked task's agent session. Reads task + comments, builds
/// the prompt and spawn recipe, then spawns *outside* any transaction and
/// only commits the column transition once the spawn has actually
/// started.
pub async fn resume(
    store: &Store,
    task_ref: &str,
    exec: bool,
    minimal: bool,
    actor: Actor,
) -> Result<ResumeOutcome, WorkflowError> {
    let (task, board, prompt) = store.read::<_, WorkflowError, _>(|conn| {
        let task = resolver::must_resolve(conn, task_ref)?;
        if task.column != "need_input" {
            return Err(WorkflowError::unsupported(
                "task is not in need_input; nothing to resume",
            ));
        }
        if task.agent_session.is_none() {
            return Err(WorkflowError::unsupported("task has no linked agent session"));
        }
        let board = boards::find_by_id(conn, &task.board)?;
        let ordered = comments::list_for_task(conn, &task.id)?;
        let prompt = context::build_prompt(&task, &ordered, minimal);
        Ok((task, board, prompt))
    })?;

    let session = task.agent_session.as_ref().expect("checked above");
    let recipe = SpawnRecipe::build(session.tool, &session.reference, &prompt, &session.working_dir);

    let should_spawn = exec && board.resume_mode != crate::store::models::ResumeMode::Manual;
    if !should_spawn {
        return Ok(ResumeOutcome::Printable(recipe.printable()));
    }

    match recipe.spawn().await {
        Ok(child) => {
            drop(child); // detached: the core never awaits the spawned process.
            let task_id = task.id.clone();
            let updated = store.run_in_transaction(|tx| {
                let board = boards::find_by_id(tx.conn, &task.board)?;
                let target = resume_target_column(tx.conn, &board, &task_id)?;
                let moved = tasks::move_task(tx, &task_id, &target, None)?;
                history::append(
                    tx,
                    &task_id,
                    HistoryAction::Resumed,
                    actor,
                    None,
                    Some(serde_json::json!({ "tool": session.tool.as_str(), "target_column": target })),
                )?;
                Ok(moved)
            })?;
            Ok(ResumeOutcome::Executed(updated))
        }
        Err(e) => {
            let reason = e.to_string();
            store.run_in_transaction(|tx| {
                history::append(
                    tx,
                    &task.id,
                    HistoryAction::Resumed,
                    actor,
                    None,
                    Some(serde_json::json!({ "error": reason.clone() })),
                )
            })?;
            Err(e)
        }
    }
}

/// Where `resume --exec` lands the task once it leaves `need_input`:
/// `in_progress` if the board declares it, else the column `block`
/// snapshotted as `prior_column`.
fn resume_target_column(
    conn: &rusqlite::Connection,
    board: &Board,
    task_id: &str,
) -> Result<String, WorkflowError> {
    if board.has_column("in_progress") {
        return Ok("in_progress".to_string());
    }
    let entries = history::for_task(conn, task_id)?;
    for entry in entries.iter().rev() {
        if entry.action == HistoryAction::Blocked {
            if let Some(prior) = entry
                .changes
                .as_ref()
                .and_then(|c| c.get("prior_column"))
                .and_then(|v| v.as_str())
            {
                return Ok(prior.to_string());
            }
        }
    }
    Err(WorkflowError::unsupported(
        "board has no in_progress column and no recorded prior column to restore",
    ))
}
