//! Epic CRUD, following the same query style as `boards.rs`. Deleting an
//! epic does not delete tasks; it clears their `epic` field.

use rusqlite::{Connection, OptionalExtension, params};

use super::Tx;
use super::models::Epic;
use crate::errors::StoreError;
use crate::ids::new_id;

const SELECT: &str = "SELECT id, title, description, color, board FROM epics";

fn row_to_epic(row: &rusqlite::Row) -> rusqlite::Result<Epic> {
    Ok(Epic {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        board: row.get(4)?,
    })
}

pub fn create(
    tx: &Tx,
    board_id: &str,
    title: &str,
    description: &str,
    color: Option<String>,
) -> Result<Epic, StoreError> {
    let epic = Epic {
        id: new_id(),
        title: title.to_string(),
        description: description.to_string(),
        color,
        board: board_id.to_string(),
    };
    tx.conn.execute(
        "INSERT INTO epics (id, title, description, color, board) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![epic.id, epic.title, epic.description, epic.color, epic.board],
    )?;
    tx.touch("epics", crate::broadcast::ChangeAction::Create, &epic);
    Ok(epic)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Epic, StoreError> {
    let sql = format!("{SELECT} WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_epic)
        .optional()?
        .ok_or(StoreError::NotFound)
}

pub fn list_for_board(conn: &Connection, board_id: &str) -> Result<Vec<Epic>, StoreError> {
    let sql = format!("{SELECT} WHERE board = ?1 ORDER BY title");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id], row_to_epic)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn update(
    tx: &Tx,
    id: &str,
    title: Option<&str>,
    description: Option<&str>,
    color: Option<Option<String>>,
) -> Result<Epic, StoreError> {
    let mut epic = find_by_id(tx.conn, id)?;
    if let Some(t) = title {
        epic.title = t.to_string();
    }
    if let Some(d) = description {
        epic.description = d.to_string();
    }
    if let Some(c) = color {
        epic.color = c;
    }
    tx.conn.execute(
        "UPDATE epics SET title = ?1, description = ?2, color = ?3 WHERE id = ?4",
        params![epic.title, epic.description, epic.color, epic.id],
    )?;
    tx.touch("epics", crate::broadcast::ChangeAction::Update, &epic);
    Ok(epic)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    Ok(find_by_id(conn, id).is_ok())
}

/// Write an epic record verbatim, used only by `export.rs`'s import path.
pub fn restore(tx: &Tx, epic: &Epic) -> Result<(), StoreError> {
    tx.conn.execute(
        "INSERT INTO epics (id, title, description, color, board) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET title=excluded.title, description=excluded.description,
            color=excluded.color, board=excluded.board",
        params![epic.id, epic.title, epic.description, epic.color, epic.board],
    )?;
    tx.touch("epics", crate::broadcast::ChangeAction::Update, epic);
    Ok(())
}

/// Delete the epic and clear `epic` on every task that referenced it (the
/// schema's `epic TEXT REFERENCES epics(id) ON DELETE SET NULL` already
/// does this at the SQLite level; this function additionally reports the
/// post-image of affected tasks so the caller can broadcast them).
pub fn delete(tx: &Tx, id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = tx.conn.prepare("SELECT id FROM tasks WHERE epic = ?1")?;
    let affected: Vec<String> = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);
    let count = tx.conn.execute("DELETE FROM epics WHERE id = ?1", params![id])?;
    if count == 0 {
        return Err(StoreError::NotFound);
    }
    tx.touch_deleted("epics", id);
    for task_id in &affected {
        if let Ok(task) = super::tasks::find_by_id(tx.conn, task_id) {
            tx.touch("tasks", crate::broadcast::ChangeAction::Update, &task);
        }
    }
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::store::Store;
    use crate::store::boards;
    use crate::store::models::ResumeMode;
    use crate::store::tasks::{self, NewTask};

    #[test]
    fn delete_clears_epic_on_tasks() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let board = store
            .run_in_transaction(|tx| boards::create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        let epic = store
            .run_in_transaction(|tx| create(tx, &board.id, "Auth overhaul", "", None))
            .unwrap();
        let task = store
            .run_in_transaction(|tx| {
                tasks::create(
                    tx,
                    &board.id,
                    NewTask {
                        title: "T".into(),
                        epic: Some(epic.id.clone()),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        store.run_in_transaction(|tx| delete(tx, &epic.id)).unwrap();
        let reloaded = store
            .read::<_, StoreError, _>(|conn| tasks::find_by_id(conn, &task.id))
            .unwrap();
        assert_eq!(reloaded.epic, None);
    }
}
