//! Board CRUD: one hand-written query per operation, an intermediate row
//! struct for reads.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::Tx;
use super::models::{Board, ResumeMode};
use crate::errors::StoreError;
use crate::ids::new_id;

struct BoardRow {
    id: String,
    name: String,
    prefix: String,
    columns: String,
    color: Option<String>,
    next_seq: i64,
    resume_mode: String,
    created: String,
    updated: String,
}

impl BoardRow {
    fn into_board(self) -> Result<Board, StoreError> {
        Ok(Board {
            id: self.id,
            name: self.name,
            prefix: self.prefix,
            columns: serde_json::from_str(&self.columns)
                .map_err(|e| StoreError::validation(format!("bad columns JSON: {e}")))?,
            color: self.color,
            next_seq: self.next_seq,
            resume_mode: ResumeMode::from_str(&self.resume_mode).map_err(StoreError::validation)?,
            created: self
                .created
                .parse()
                .map_err(|_| StoreError::validation("bad created timestamp"))?,
            updated: self
                .updated
                .parse()
                .map_err(|_| StoreError::validation("bad updated timestamp"))?,
        })
    }
}

const SELECT: &str =
    "SELECT id, name, prefix, columns, color, next_seq, resume_mode, created, updated FROM boards";

fn row_to_board(row: &rusqlite::Row) -> rusqlite::Result<BoardRow> {
    Ok(BoardRow {
        id: row.get(0)?,
        name: row.get(1)?,
        prefix: row.get(2)?,
        columns: row.get(3)?,
        color: row.get(4)?,
        next_seq: row.get(5)?,
        resume_mode: row.get(6)?,
        created: row.get(7)?,
        updated: row.get(8)?,
    })
}

/// Create a new board. `columns` defaults to the canonical set (including
/// `need_input`) when empty — callers that want the legacy set lacking
/// `need_input` (DESIGN.md Open Question 2) must pass it explicitly.
pub fn create(
    tx: &Tx,
    name: &str,
    prefix: &str,
    columns: Vec<String>,
    color: Option<String>,
    resume_mode: ResumeMode,
) -> Result<Board, StoreError> {
    if name.is_empty() || name.len() > 100 {
        return Err(StoreError::validation("board name must be 1-100 chars"));
    }
    if prefix.len() < 2
        || prefix.len() > 10
        || !prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(StoreError::validation(
            "board prefix must be 2-10 uppercase alphanumerics",
        ));
    }
    let columns = if columns.is_empty() {
        Board::CANONICAL_COLUMNS.iter().map(|s| s.to_string()).collect()
    } else {
        columns
    };
    let now = Utc::now();
    let board = Board {
        id: new_id(),
        name: name.to_string(),
        prefix: prefix.to_string(),
        columns,
        color,
        next_seq: 1,
        resume_mode,
        created: now,
        updated: now,
    };
    tx.conn
        .execute(
            "INSERT INTO boards (id, name, prefix, columns, color, next_seq, resume_mode, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                board.id,
                board.name,
                board.prefix,
                serde_json::to_string(&board.columns).unwrap(),
                board.color,
                board.next_seq,
                board.resume_mode.as_str(),
                board.created.to_rfc3339(),
                board.updated.to_rfc3339(),
            ],
        )
        .map_err(|e| map_unique_violation(e, "board name or prefix already in use"))?;
    tx.touch("boards", crate::broadcast::ChangeAction::Create, &board);
    Ok(board)
}

fn map_unique_violation(e: rusqlite::Error, message: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref err, _) = e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::validation(message);
        }
    }
    StoreError::from(e)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Board, StoreError> {
    let sql = format!("{SELECT} WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_board)
        .optional()?
        .ok_or(StoreError::NotFound)?
        .into_board()
}

pub fn find_by_prefix(conn: &Connection, prefix: &str) -> Result<Option<Board>, StoreError> {
    let sql = format!("{SELECT} WHERE prefix = ?1");
    conn.query_row(&sql, params![prefix], row_to_board)
        .optional()?
        .map(BoardRow::into_board)
        .transpose()
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Board>, StoreError> {
    let sql = format!("{SELECT} WHERE name = ?1");
    conn.query_row(&sql, params![name], row_to_board)
        .optional()?
        .map(BoardRow::into_board)
        .transpose()
}

pub fn list(conn: &Connection) -> Result<Vec<Board>, StoreError> {
    let sql = format!("{SELECT} ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_board)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_board()?);
    }
    Ok(out)
}

/// Update the mutable fields of a board. `columns`, when provided, must
/// still cover every column currently referenced by a live task; the
/// caller (workflow.rs) is responsible for that check since it needs the
/// tasks table, which this module does not touch.
#[allow(clippy::too_many_arguments)]
pub fn update(
    tx: &Tx,
    id: &str,
    name: Option<&str>,
    columns: Option<Vec<String>>,
    color: Option<Option<String>>,
    resume_mode: Option<ResumeMode>,
) -> Result<Board, StoreError> {
    let mut board = find_by_id(tx.conn, id)?;
    if let Some(n) = name {
        board.name = n.to_string();
    }
    if let Some(c) = columns {
        board.columns = c;
    }
    if let Some(c) = color {
        board.color = c;
    }
    if let Some(rm) = resume_mode {
        board.resume_mode = rm;
    }
    board.updated = Utc::now();
    tx.conn
        .execute(
            "UPDATE boards SET name = ?1, columns = ?2, color = ?3, resume_mode = ?4, updated = ?5 WHERE id = ?6",
            params![
                board.name,
                serde_json::to_string(&board.columns).unwrap(),
                board.color,
                board.resume_mode.as_str(),
                board.updated.to_rfc3339(),
                board.id,
            ],
        )
        .map_err(|e| map_unique_violation(e, "board name already in use"))?;
    tx.touch("boards", crate::broadcast::ChangeAction::Update, &board);
    Ok(board)
}

/// Allocate the next sequence number for a task insert, inside the
/// caller's transaction. Must be called from within the same
/// `run_in_transaction` closure that saves the new task, so the
/// read-then-increment is serialized by the store's transactional engine.
pub fn allocate_next_seq(tx: &Tx, board_id: &str) -> Result<i64, StoreError> {
    let board = find_by_id(tx.conn, board_id)?;
    let seq = board.next_seq;
    tx.conn.execute(
        "UPDATE boards SET next_seq = ?1 WHERE id = ?2",
        params![seq + 1, board_id],
    )?;
    Ok(seq)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    Ok(find_by_id(conn, id).is_ok())
}

/// Write a board record verbatim (id, `next_seq`, timestamps included),
/// used only by `export.rs`'s import path — `next_seq` must round-trip
/// exactly so future inserts don't collide with restored display ids.
/// Inserts or overwrites field-for-field on id collision; callers implement
/// `merge` (skip on collision) by checking `exists` first.
pub fn restore(tx: &Tx, board: &Board) -> Result<(), StoreError> {
    tx.conn
        .execute(
            "INSERT INTO boards (id, name, prefix, columns, color, next_seq, resume_mode, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, prefix=excluded.prefix,
                columns=excluded.columns, color=excluded.color, next_seq=excluded.next_seq,
                resume_mode=excluded.resume_mode, created=excluded.created, updated=excluded.updated",
            params![
                board.id,
                board.name,
                board.prefix,
                serde_json::to_string(&board.columns).unwrap(),
                board.color,
                board.next_seq,
                board.resume_mode.as_str(),
                board.created.to_rfc3339(),
                board.updated.to_rfc3339(),
            ],
        )
        .map_err(|e| map_unique_violation(e, "board name or prefix already in use"))?;
    tx.touch("boards", crate::broadcast::ChangeAction::Update, board);
    Ok(())
}

/// Delete a board; cascades to tasks, epics, views via `ON DELETE CASCADE`.
pub fn delete(tx: &Tx, id: &str) -> Result<(), StoreError> {
    let count = tx
        .conn
        .execute("DELETE FROM boards WHERE id = ?1", params![id])?;
    if count == 0 {
        return Err(StoreError::NotFound);
    }
    tx.touch_deleted("boards", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::store::Store;

    #[test]
    fn create_rejects_bad_prefix() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let result: Result<_, StoreError> = store.run_in_transaction(|tx| {
            create(tx, "Work", "w", vec![], None, ResumeMode::Command)
        });
        assert!(result.is_err());
    }

    #[test]
    fn create_defaults_to_canonical_columns() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let board: Board = store
            .run_in_transaction(|tx| create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        assert!(board.supports_need_input());
        assert_eq!(board.next_seq, 1);
    }

    #[test]
    fn prefix_must_be_globally_unique() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        store
            .run_in_transaction(|tx| create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        let result: Result<Board, StoreError> = store
            .run_in_transaction(|tx| create(tx, "Other", "WRK", vec![], None, ResumeMode::Command));
        assert!(result.is_err());
    }

    #[test]
    fn allocate_next_seq_increments_monotonically() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let board = store
            .run_in_transaction(|tx| create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        let seqs: Vec<i64> = (0..3)
            .map(|_| {
                store
                    .run_in_transaction(|tx| allocate_next_seq(tx, &board.id))
                    .unwrap()
            })
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
