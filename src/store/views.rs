//! Saved-filter View CRUD. `filters`/`display` are opaque JSON the core
//! never interprets beyond round-tripping it — the UI owns their shape.

use rusqlite::{Connection, OptionalExtension, params};

use super::Tx;
use super::models::{MatchMode, View};
use crate::errors::StoreError;
use crate::ids::new_id;

struct ViewRow {
    id: String,
    board: String,
    name: String,
    filters: String,
    match_mode: String,
    display: String,
    is_favorite: bool,
}

impl ViewRow {
    fn into_view(self) -> Result<View, StoreError> {
        Ok(View {
            id: self.id,
            board: self.board,
            name: self.name,
            filters: serde_json::from_str(&self.filters)
                .map_err(|e| StoreError::validation(format!("bad filters JSON: {e}")))?,
            match_mode: MatchMode::from_str(&self.match_mode).map_err(StoreError::validation)?,
            display: serde_json::from_str(&self.display)
                .map_err(|e| StoreError::validation(format!("bad display JSON: {e}")))?,
            is_favorite: self.is_favorite,
        })
    }
}

const SELECT: &str = "SELECT id, board, name, filters, match_mode, display, is_favorite FROM views";

fn row_to_view(row: &rusqlite::Row) -> rusqlite::Result<ViewRow> {
    Ok(ViewRow {
        id: row.get(0)?,
        board: row.get(1)?,
        name: row.get(2)?,
        filters: row.get(3)?,
        match_mode: row.get(4)?,
        display: row.get(5)?,
        is_favorite: row.get(6)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn create(
    tx: &Tx,
    board_id: &str,
    name: &str,
    filters: Vec<serde_json::Value>,
    match_mode: MatchMode,
    display: serde_json::Value,
    is_favorite: bool,
) -> Result<View, StoreError> {
    let view = View {
        id: new_id(),
        board: board_id.to_string(),
        name: name.to_string(),
        filters,
        match_mode,
        display,
        is_favorite,
    };
    tx.conn.execute(
        "INSERT INTO views (id, board, name, filters, match_mode, display, is_favorite)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            view.id,
            view.board,
            view.name,
            serde_json::to_string(&view.filters).unwrap(),
            view.match_mode.as_str(),
            view.display.to_string(),
            view.is_favorite,
        ],
    )?;
    tx.touch("views", crate::broadcast::ChangeAction::Create, &view);
    Ok(view)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<View, StoreError> {
    let sql = format!("{SELECT} WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_view)
        .optional()?
        .ok_or(StoreError::NotFound)?
        .into_view()
}

pub fn list_for_board(conn: &Connection, board_id: &str) -> Result<Vec<View>, StoreError> {
    let sql = format!("{SELECT} WHERE board = ?1 ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![board_id], row_to_view)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_view()?);
    }
    Ok(out)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    Ok(find_by_id(conn, id).is_ok())
}

/// Write a view record verbatim, used only by `export.rs`'s import path.
pub fn restore(tx: &Tx, view: &View) -> Result<(), StoreError> {
    tx.conn.execute(
        "INSERT INTO views (id, board, name, filters, match_mode, display, is_favorite)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET board=excluded.board, name=excluded.name,
            filters=excluded.filters, match_mode=excluded.match_mode, display=excluded.display,
            is_favorite=excluded.is_favorite",
        params![
            view.id,
            view.board,
            view.name,
            serde_json::to_string(&view.filters).unwrap(),
            view.match_mode.as_str(),
            view.display.to_string(),
            view.is_favorite,
        ],
    )?;
    tx.touch("views", crate::broadcast::ChangeAction::Update, view);
    Ok(())
}

pub fn delete(tx: &Tx, id: &str) -> Result<(), StoreError> {
    let count = tx.conn.execute("DELETE FROM views WHERE id = ?1", params![id])?;
    if count == 0 {
        return Err(StoreError::NotFound);
    }
    tx.touch_deleted("views", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Bus;
    use crate::store::Store;
    use crate::store::boards;
    use crate::store::models::ResumeMode;

    #[test]
    fn create_and_list_round_trip() {
        let store = Store::open_in_memory(Bus::new()).unwrap();
        let board = store
            .run_in_transaction(|tx| boards::create(tx, "Work", "WRK", vec![], None, ResumeMode::Command))
            .unwrap();
        store
            .run_in_transaction(|tx| {
                create(
                    tx,
                    &board.id,
                    "My urgent bugs",
                    vec![serde_json::json!({"field": "priority", "op": "eq", "value": "urgent"})],
                    MatchMode::All,
                    serde_json::json!({}),
                    true,
                )
            })
            .unwrap();
        let views = store
            .read::<_, StoreError, _>(|conn| list_for_board(conn, &board.id))
            .unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].is_favorite);
    }
}
