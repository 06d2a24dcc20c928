//! `SessionRecord` (archived binding) CRUD — the durable ledger behind
//! `session.rs`'s current-binding logic.
//! A status-tracked record per spawned agent run, cycling through the
//! `{active, paused, completed, abandoned}` lifecycle.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::Tx;
use super::models::{AgentTool, RefType, SessionRecord, SessionStatus};
use crate::errors::StoreError;
use crate::ids::new_id;

struct SessionRow {
    id: String,
    task: String,
    tool: String,
    external_ref: String,
    ref_type: String,
    working_dir: String,
    status: String,
    created: String,
    ended_at: Option<String>,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord, StoreError> {
        Ok(SessionRecord {
            id: self.id,
            task: self.task,
            tool: AgentTool::from_str(&self.tool).map_err(StoreError::validation)?,
            external_ref: self.external_ref,
            ref_type: RefType::from_str(&self.ref_type).map_err(StoreError::validation)?,
            working_dir: self.working_dir,
            status: SessionStatus::from_str(&self.status).map_err(StoreError::validation)?,
            created: self
                .created
                .parse()
                .map_err(|_| StoreError::validation("bad created timestamp"))?,
            ended_at: self
                .ended_at
                .map(|d| d.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|_| StoreError::validation("bad ended_at timestamp"))?,
        })
    }
}

const SELECT: &str = "SELECT id, task, tool, external_ref, ref_type, working_dir, status, created, ended_at FROM sessions";

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        task: row.get(1)?,
        tool: row.get(2)?,
        external_ref: row.get(3)?,
        ref_type: row.get(4)?,
        working_dir: row.get(5)?,
        status: row.get(6)?,
        created: row.get(7)?,
        ended_at: row.get(8)?,
    })
}

/// Append a new `SessionRecord`, always `status = active` at creation time —
/// the binder transitions a prior active record to `abandoned` separately
/// before calling this.
pub fn create(
    tx: &Tx,
    task_id: &str,
    tool: AgentTool,
    external_ref: &str,
    ref_type: RefType,
    working_dir: &str,
) -> Result<SessionRecord, StoreError> {
    let now = Utc::now();
    let record = SessionRecord {
        id: new_id(),
        task: task_id.to_string(),
        tool,
        external_ref: external_ref.to_string(),
        ref_type,
        working_dir: working_dir.to_string(),
        status: SessionStatus::Active,
        created: now,
        ended_at: None,
    };
    tx.conn.execute(
        "INSERT INTO sessions (id, task, tool, external_ref, ref_type, working_dir, status, created, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
        params![
            record.id,
            record.task,
            record.tool.as_str(),
            record.external_ref,
            record.ref_type.as_str(),
            record.working_dir,
            record.status.as_str(),
            record.created.to_rfc3339(),
        ],
    )?;
    tx.touch("sessions", crate::broadcast::ChangeAction::Create, &record);
    Ok(record)
}

/// The active `SessionRecord` for a task, if any. At most one per task.
pub fn find_active_for_task(
    conn: &Connection,
    task_id: &str,
) -> Result<Option<SessionRecord>, StoreError> {
    let sql = format!("{SELECT} WHERE task = ?1 AND status = 'active'");
    conn.query_row(&sql, params![task_id], row_to_session)
        .optional()?
        .map(SessionRow::into_record)
        .transpose()
}

/// Find the active record for a task matching a specific external ref —
/// used by `session::link` to locate the binding being displaced.
pub fn find_active_by_ref(
    conn: &Connection,
    task_id: &str,
    external_ref: &str,
) -> Result<Option<SessionRecord>, StoreError> {
    let sql = format!("{SELECT} WHERE task = ?1 AND external_ref = ?2 AND status = 'active'");
    conn.query_row(&sql, params![task_id, external_ref], row_to_session)
        .optional()?
        .map(SessionRow::into_record)
        .transpose()
}

pub fn transition(
    tx: &Tx,
    id: &str,
    status: SessionStatus,
) -> Result<SessionRecord, StoreError> {
    let ended_at = match status {
        SessionStatus::Abandoned | SessionStatus::Completed => Some(Utc::now()),
        _ => None,
    };
    tx.conn.execute(
        "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
        params![status.as_str(), ended_at.map(|d: DateTime<Utc>| d.to_rfc3339()), id],
    )?;
    let sql = format!("{SELECT} WHERE id = ?1");
    let record = tx
        .conn
        .query_row(&sql, params![id], row_to_session)
        .optional()?
        .ok_or(StoreError::NotFound)?
        .into_record()?;
    tx.touch("sessions", crate::broadcast::ChangeAction::Update, &record);
    Ok(record)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let sql = format!("{SELECT} WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], row_to_session)
        .optional()?
        .is_some())
}

/// Write a `SessionRecord` verbatim, including `status`/`ended_at`, used
/// only by `export.rs`'s import path.
pub fn restore(tx: &Tx, record: &SessionRecord) -> Result<(), StoreError> {
    tx.conn.execute(
        "INSERT INTO sessions (id, task, tool, external_ref, ref_type, working_dir, status, created, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET task=excluded.task, tool=excluded.tool,
            external_ref=excluded.external_ref, ref_type=excluded.ref_type,
            working_dir=excluded.working_dir, status=excluded.status, created=excluded.created,
            ended_at=excluded.ended_at",
        params![
            record.id,
            record.task,
            record.tool.as_str(),
            record.external_ref,
            record.ref_type.as_str(),
            record.working_dir,
            record.status.as_str(),
            record.created.to_rfc3339(),
            record.ended_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    tx.touch("sessions", crate::broadcast::ChangeAction::Update, record);
    Ok(())
}

/// Full session history for a task, most recent first.
pub fn history_for_task(conn: &Connection, task_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
    let sql = format!("{SELECT} WHERE task = ?1 ORDER BY created DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id], row_to_session)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_record()?);
    }
    Ok(out)
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
    fn at_most_one_active_record_per_task() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        let r1: SessionRecord = store
            .run_in_transaction(|tx| {
                create(tx, &tid, AgentTool::Opencode, "abc-123", RefType::Uuid, "/work")
            })
            .unwrap();
        store
            .run_in_transaction(|tx| transition(tx, &r1.id, SessionStatus::Abandoned))
            .unwrap();
        let r2: SessionRecord = store
            .run_in_transaction(|tx| {
                create(tx, &tid, AgentTool::ClaudeCode, "550e8400", RefType::Uuid, "/work")
            })
            .unwrap();
        let active = store
            .read::<_, StoreError, _>(|conn| find_active_for_task(conn, &tid))
            .unwrap();
        assert_eq!(active.unwrap().id, r2.id);
    }

    #[test]
    fn transition_to_abandoned_sets_ended_at() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let tid = task_id(&store);
        let r1: SessionRecord = store
            .run_in_transaction(|tx| {
                create(tx, &tid, AgentTool::Opencode, "abc-123", RefType::Uuid, "/work")
            })
            .unwrap();
        let updated: SessionRecord = store
            .run_in_transaction(|tx| transition(tx, &r1.id, SessionStatus::Abandoned))
            .unwrap();
        assert!(updated.ended_at.is_some());
        assert_eq!(updated.status, SessionStatus::Abandoned);
    }
}
