//! Auto-resume watcher.
//!
//! A single long-lived task reads the Broadcast bus, inspects `comments`
//! `create` events, and conditionally triggers a resume. Runs on its own
//! cooperative task and must never block event delivery — every check
//! below is a cheap read; the actual `Resume` call is itself spawned onto
//! its own task so a slow spawn never stalls the watcher's receive loop.

use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::{Bus, ChangeAction};
use crate::errors::WorkflowError;
use crate::store::Store;
use crate::store::models::{Actor, HistoryAction, ResumeMode};
use crate::store::{boards, comments, tasks};
use crate::workflow;

/// Debounce window for repeated `@agent` triggers on the same task.
const DEBOUNCE: chrono::Duration = chrono::Duration::seconds(2);

/// Spawn the watcher as a long-lived task owned by the caller (the server
/// process's lifetime). Returns the `JoinHandle` so the
/// caller can abort it on graceful shutdown.
pub fn spawn(store: std::sync::Arc<Store>, bus: Bus) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.collection == "comments" && event.action == ChangeAction::Create {
                        let store = store.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_comment_created(&store, event.record).await {
                                tracing::debug!(error = %e, "auto-resume watcher dropped an event");
                            }
                        });
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auto-resume watcher lagged behind the broadcast bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_comment_created(
    store: &Store,
    record: serde_json::Value,
) -> Result<(), WorkflowError> {
    let comment: crate::store::models::Comment = serde_json::from_value(record)
        .map_err(|e| WorkflowError::validation(format!("malformed comment event: {e}")))?;

    // The `@agent` check happens first since it's the cheapest test and
    // rejects the overwhelming majority of comment events.
    if !comment.metadata.mentions.iter().any(|m| m == "agent") {
        return Ok(());
    }

    let task_id = comment.task.clone();
    let decision = store.read::<_, WorkflowError, _>(|conn| {
        // The parent task may have been deleted; tolerate NotFound.
        let task = match tasks::find_by_id(conn, &task_id) {
            Ok(task) => task,
            Err(crate::errors::StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Board must be in auto mode.
        let board = boards::find_by_id(conn, &task.board)?;
        if board.resume_mode != ResumeMode::Auto {
            return Ok(None);
        }

        // Task must have an active session and still be need_input.
        if task.agent_session.is_none() || task.column != "need_input" {
            return Ok(None);
        }

        // Debounce repeated triggers on the same task.
        if let Some(last) = crate::history::latest_of_action(conn, &task_id, HistoryAction::Resumed)? {
            if chrono::Utc::now() - last.timestamp < DEBOUNCE {
                return Ok(None);
            }
        }

        Ok(Some(()))
    })?;

    if decision.is_none() {
        return Ok(());
    }

    workflow::resume(store, &task_id, true, false, Actor::Agent).await?;
    Ok(())
}
