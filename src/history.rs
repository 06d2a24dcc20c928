//! History recorder: appends immutable audit entries to a task's history
//! on every state-changing operation.
//!
//! An append-only, auto-incrementing log table keyed by parent id, read in
//! a single `ORDER BY seq` query. `append` never reads history and never
//! rewrites it — this module exposes no `update`/`delete` for
//! `history_entries` at all, so "history is never rewritten or truncated
//! except on task deletion" is enforced structurally rather than by a
//! runtime check: the cascade delete on `tasks` is the only path that ever
//! removes a row from this table.

use chrono::Utc;
use rusqlite::params;

use crate::errors::StoreError;
use crate::store::Tx;
use crate::store::models::{Actor, HistoryAction, HistoryChanges, HistoryEntry};

/// Append one entry to `task.history` inside the caller's transaction.
/// Every workflow verb in the Workflow engine (and the Session binder)
/// calls this at least once.
pub fn append(
    tx: &Tx,
    task_id: &str,
    action: HistoryAction,
    actor: Actor,
    actor_detail: Option<&str>,
    changes: Option<HistoryChanges>,
) -> Result<HistoryEntry, StoreError> {
    let timestamp = Utc::now();
    tx.conn.execute(
        "INSERT INTO history_entries (task, timestamp, action, actor, actor_detail, changes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task_id,
            timestamp.to_rfc3339(),
            action.as_str(),
            actor.as_str(),
            actor_detail,
            changes.as_ref().map(|c| c.to_string()),
        ],
    )?;
    let seq = tx.conn.last_insert_rowid();
    let entry = HistoryEntry {
        seq,
        task: task_id.to_string(),
        timestamp,
        action,
        actor,
        actor_detail: actor_detail.map(|s| s.to_string()),
        changes,
    };
    tx.touch("history_entries", crate::broadcast::ChangeAction::Create, &entry);
    Ok(entry)
}

/// Read a task's history in chronological order. Read-only; never called
/// from within `append` itself.
pub fn for_task(
    conn: &rusqlite::Connection,
    task_id: &str,
) -> Result<Vec<HistoryEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, task, timestamp, action, actor, actor_detail, changes
         FROM history_entries WHERE task = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![task_id], |row| {
        let timestamp: String = row.get(2)?;
        let action: String = row.get(3)?;
        let actor: String = row.get(4)?;
        let changes: Option<String> = row.get(6)?;
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            timestamp,
            action,
            actor,
            row.get::<_, Option<String>>(5)?,
            changes,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (seq, task, timestamp, action, actor, actor_detail, changes) = row?;
        out.push(HistoryEntry {
            seq,
            task,
            timestamp: timestamp
                .parse()
                .map_err(|_| StoreError::validation("bad history timestamp"))?,
            action: HistoryAction::from_str(&action).map_err(StoreError::validation)?,
            actor: Actor::from_str(&actor).map_err(StoreError::validation)?,
            actor_detail,
            changes: changes
                .map(|c| serde_json::from_str(&c))
                .transpose()
                .map_err(|e| StoreError::validation(format!("bad history changes JSON: {e}")))?,
        });
    }
    Ok(out)
}

/// Write a history entry verbatim, including its original `seq`, used only
/// by `export.rs`'s import path so history round-trips and preserves its
/// ordering. SQLite accepts an explicit value for an `INTEGER PRIMARY KEY
/// AUTOINCREMENT` column, so this does not disturb later auto-assigned
/// sequence numbers as long as restored seqs stay below the task's next
/// live-appended one.
pub fn restore(tx: &Tx, entry: &HistoryEntry) -> Result<(), StoreError> {
    tx.conn.execute(
        "INSERT INTO history_entries (seq, task, timestamp, action, actor, actor_detail, changes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(seq) DO UPDATE SET task=excluded.task, timestamp=excluded.timestamp,
            action=excluded.action, actor=excluded.actor, actor_detail=excluded.actor_detail,
            changes=excluded.changes",
        params![
            entry.seq,
            entry.task,
            entry.timestamp.to_rfc3339(),
            entry.action.as_str(),
            entry.actor.as_str(),
            entry.actor_detail,
            entry.changes.as_ref().map(|c| c.to_string()),
        ],
    )?;
    tx.touch("history_entries", crate::broadcast::ChangeAction::Update, entry);
    Ok(())
}

/// The most recent entry for a task matching the given action, if any —
/// used by the Auto-resume watcher's debounce check (has a `resumed`
/// history entry landed within the last 2 seconds?).
pub fn latest_of_action(
    conn: &rusqlite::Connection,
    task_id: &str,
    action: HistoryAction,
) -> Result<Option<HistoryEntry>, StoreError> {
    Ok(for_task(conn, task_id)?
        .into_iter()
        .filter(|e| e.action.as_str() == action.as_str())
        .next_back())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::store::Store;
    use crate::store::boards;
    use crate::store::models::ResumeMode;
    use crate::store::tasks::{self, NewTask};

    fn task_id(store: &Store) -> String {
        let board = store
            .run_in_transaction(|tx| boards::create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        store
            .run_in_transaction(|tx| {
                tasks::create(
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
    fn append_is_ordered_and_never_truncated() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        for action in [HistoryAction::Created, HistoryAction::Commented, HistoryAction::Blocked] {
            store
                .run_in_transaction(|tx| append(tx, &tid, action, Actor::User, None, None))
                .unwrap();
        }
        let history = store.read::<_, StoreError, _>(|conn| for_task(conn, &tid)).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].action, HistoryAction::Created);
        assert_eq!(history[2].action, HistoryAction::Blocked);
    }

    #[test]
    fn latest_of_action_finds_most_recent() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        store
            .run_in_transaction(|tx| append(tx, &tid, HistoryAction::Resumed, Actor::Agent, None, None))
            .unwrap();
        store
            .run_in_transaction(|tx| append(tx, &tid, HistoryAction::Commented, Actor::User, None, None))
            .unwrap();
        store
            .run_in_transaction(|tx| append(tx, &tid, HistoryAction::Resumed, Actor::Agent, None, None))
            .unwrap();
        let latest = store
            .read::<_, StoreError, _>(|conn| latest_of_action(conn, &tid, HistoryAction::Resumed))
            .unwrap();
        assert!(latest.is_some());
        assert_eq!(latest.unwrap().seq, 3);
    }
}
