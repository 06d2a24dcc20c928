//! Task CRUD and column/position bookkeeping: an opaque id plus a
//! per-board sequence number model, rather than a single auto-increment
//! primary key.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;

use super::Tx;
use super::boards;
use super::models::{CreatedBy, Priority, Task, TaskType};
use crate::errors::StoreError;
use crate::ids::new_id;

struct TaskRow {
    id: String,
    seq: i64,
    board: String,
    title: String,
    description: String,
    task_type: String,
    priority: String,
    column: String,
    position: f64,
    epic: Option<String>,
    parent: Option<String>,
    labels: String,
    blocked_by: String,
    due_date: Option<String>,
    created_by: String,
    created_by_agent: Option<String>,
    agent_session: Option<String>,
    created: String,
    updated: String,
    display_prefix: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StoreError> {
        let agent_session = match self.agent_session {
            Some(s) if !s.is_empty() => Some(
                serde_json::from_str(&s)
                    .map_err(|e| StoreError::validation(format!("bad agent_session JSON: {e}")))?,
            ),
            _ => None,
        };
        Ok(Task {
            id: self.id,
            seq: self.seq,
            display_id: format!("{}-{}", self.display_prefix, self.seq),
            title: self.title,
            description: self.description,
            task_type: TaskType::from_str(&self.task_type).map_err(StoreError::validation)?,
            priority: Priority::from_str(&self.priority).map_err(StoreError::validation)?,
            column: self.column,
            position: self.position,
            board: self.board,
            epic: self.epic,
            parent: self.parent,
            labels: serde_json::from_str(&self.labels)
                .map_err(|e| StoreError::validation(format!("bad labels JSON: {e}")))?,
            blocked_by: serde_json::from_str(&self.blocked_by)
                .map_err(|e| StoreError::validation(format!("bad blocked_by JSON: {e}")))?,
            due_date: self
                .due_date
                .map(|d| d.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|_| StoreError::validation("bad due_date timestamp"))?,
            created_by: CreatedBy::from_str(&self.created_by).map_err(StoreError::validation)?,
            created_by_agent: self.created_by_agent,
            agent_session,
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

const SELECT: &str = "SELECT t.id, t.seq, t.board, t.title, t.description, t.type, t.priority,
    t.column_name, t.position, t.epic, t.parent, t.labels, t.blocked_by, t.due_date,
    t.created_by, t.created_by_agent, t.agent_session, t.created, t.updated, b.prefix
    FROM tasks t JOIN boards b ON b.id = t.board";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        seq: row.get(1)?,
        board: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        task_type: row.get(5)?,
        priority: row.get(6)?,
        column: row.get(7)?,
        position: row.get(8)?,
        epic: row.get(9)?,
        parent: row.get(10)?,
        labels: row.get(11)?,
        blocked_by: row.get(12)?,
        due_date: row.get(13)?,
        created_by: row.get(14)?,
        created_by_agent: row.get(15)?,
        agent_session: row.get(16)?,
        created: row.get(17)?,
        updated: row.get(18)?,
        display_prefix: row.get(19)?,
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Task, StoreError> {
    let sql = format!("{SELECT} WHERE t.id = ?1");
    conn.query_row(&sql, params![id], row_to_task)
        .optional()?
        .ok_or(StoreError::NotFound)?
        .into_task()
}

pub fn find_by_display(
    conn: &Connection,
    prefix: &str,
    seq: i64,
) -> Result<Option<Task>, StoreError> {
    let sql = format!("{SELECT} WHERE b.prefix = ?1 AND t.seq = ?2");
    conn.query_row(&sql, params![prefix, seq], row_to_task)
        .optional()?
        .map(TaskRow::into_task)
        .transpose()
}

/// Tasks whose id starts with the given prefix (Resolver's short-id match).
pub fn find_by_id_prefix(conn: &Connection, id_prefix: &str) -> Result<Vec<Task>, StoreError> {
    let sql = format!("{SELECT} WHERE t.id LIKE ?1 || '%'");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![id_prefix], row_to_task)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_task()?);
    }
    Ok(out)
}

/// `max(position) + 1000` in the given (board, column), or `1000` if empty.
pub fn next_position(conn: &Connection, board: &str, column: &str) -> Result<f64, StoreError> {
    let max: Option<f64> = conn.query_row(
        "SELECT MAX(position) FROM tasks WHERE board = ?1 AND column_name = ?2",
        params![board, column],
        |row| row.get(0),
    )?;
    Ok(max.map(|m| m + 1000.0).unwrap_or(1000.0))
}

/// Whether some other task in the given (board, column) already sits at
/// `position`. `idx_tasks_board_column_position` is non-unique, so an
/// explicit caller-supplied position needs this check to keep §8.6's
/// "positions are pairwise distinct" invariant from silently breaking.
fn position_taken(
    conn: &Connection,
    board: &str,
    column: &str,
    position: f64,
    excluding: &str,
) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE board = ?1 AND column_name = ?2 AND position = ?3 AND id != ?4",
        params![board, column, position, excluding],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[derive(Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub column: Option<String>,
    pub epic: Option<String>,
    pub parent: Option<String>,
    pub labels: Vec<String>,
    pub blocked_by: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: CreatedBy,
    pub created_by_agent: Option<String>,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Feature
    }
}
impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}
impl Default for CreatedBy {
    fn default() -> Self {
        CreatedBy::User
    }
}

/// Create a task, allocating its board-scoped sequence number inside the
/// same transaction.
pub fn create(tx: &Tx, board_id: &str, new: NewTask) -> Result<Task, StoreError> {
    if new.title.is_empty() || new.title.len() > 500 {
        return Err(StoreError::validation("title must be 1-500 chars"));
    }
    if new.description.len() > 10_000 {
        return Err(StoreError::validation("description must be <=10000 chars"));
    }
    let board = boards::find_by_id(tx.conn, board_id)?;
    let column = new.column.unwrap_or_else(|| {
        board
            .columns
            .first()
            .cloned()
            .unwrap_or_else(|| "backlog".to_string())
    });
    if !board.has_column(&column) {
        return Err(StoreError::validation(format!(
            "column '{column}' is not declared on this board"
        )));
    }
    if !new.blocked_by.is_empty() && would_cycle(tx.conn, "", &new.blocked_by)? {
        return Err(StoreError::validation("blocked_by would form a cycle"));
    }
    let seq = boards::allocate_next_seq(tx, board_id)?;
    let position = next_position(tx.conn, board_id, &column)?;
    let now = Utc::now();
    let id = new_id();
    tx.conn.execute(
        "INSERT INTO tasks (id, seq, board, title, description, type, priority, column_name,
            position, epic, parent, labels, blocked_by, due_date, created_by, created_by_agent,
            agent_session, created, updated)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,NULL,?17,?18)",
        params![
            id,
            seq,
            board_id,
            new.title,
            new.description,
            new.task_type.as_str(),
            new.priority.as_str(),
            column,
            position,
            new.epic,
            new.parent,
            serde_json::to_string(&new.labels).unwrap(),
            serde_json::to_string(&new.blocked_by).unwrap(),
            new.due_date.map(|d| d.to_rfc3339()),
            new.created_by.as_str(),
            new.created_by_agent,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )?;
    let task = find_by_id(tx.conn, &id)?;
    tx.touch("tasks", crate::broadcast::ChangeAction::Create, &task);
    Ok(task)
}

#[derive(Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub epic: Option<Option<String>>,
    pub labels: Option<Vec<String>>,
    pub blocked_by: Option<Vec<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// Target board id, already resolved from whatever reference the
    /// caller used. A change here moves the task: `seq` is reallocated on
    /// the destination board to preserve `UNIQUE(board, seq)`, and
    /// `position` is recomputed, since the old value has no meaning in the
    /// new board's column.
    pub board: Option<String>,
}

/// Partial update of a task's mutable fields. Never touches `seq`,
/// `display_id`, `history`, or `created` directly — those simply have no
/// field in `TaskUpdate`, so a caller cannot rewrite them even by
/// accident; `seq` only changes as a side effect of a `board` move.
pub fn update(tx: &Tx, id: &str, fields: TaskUpdate) -> Result<Task, StoreError> {
    let mut task = find_by_id(tx.conn, id)?;
    if let Some(t) = fields.title {
        if t.is_empty() || t.len() > 500 {
            return Err(StoreError::validation("title must be 1-500 chars"));
        }
        task.title = t;
    }
    if let Some(d) = fields.description {
        if d.len() > 10_000 {
            return Err(StoreError::validation("description must be <=10000 chars"));
        }
        task.description = d;
    }
    if let Some(t) = fields.task_type {
        task.task_type = t;
    }
    if let Some(p) = fields.priority {
        task.priority = p;
    }
    if let Some(e) = fields.epic {
        task.epic = e;
    }
    if let Some(l) = fields.labels {
        task.labels = l;
    }
    if let Some(b) = fields.blocked_by {
        if would_cycle(tx.conn, &task.id, &b)? {
            return Err(StoreError::validation("blocked_by would form a cycle"));
        }
        task.blocked_by = b;
    }
    if let Some(d) = fields.due_date {
        task.due_date = d;
    }
    if let Some(board_id) = fields.board {
        if board_id != task.board {
            let destination = boards::find_by_id(tx.conn, &board_id)?;
            if !destination.has_column(&task.column) {
                return Err(StoreError::validation(format!(
                    "column '{}' is not declared on destination board '{}'",
                    task.column, destination.name
                )));
            }
            task.seq = boards::allocate_next_seq(tx, &board_id)?;
            task.position = next_position(tx.conn, &board_id, &task.column)?;
            task.board = board_id;
        }
    }
    task.updated = Utc::now();
    tx.conn.execute(
        "UPDATE tasks SET title=?1, description=?2, type=?3, priority=?4, epic=?5, labels=?6,
            blocked_by=?7, due_date=?8, updated=?9, board=?10, seq=?11, position=?12 WHERE id=?13",
        params![
            task.title,
            task.description,
            task.task_type.as_str(),
            task.priority.as_str(),
            task.epic,
            serde_json::to_string(&task.labels).unwrap(),
            serde_json::to_string(&task.blocked_by).unwrap(),
            task.due_date.map(|d| d.to_rfc3339()),
            task.updated.to_rfc3339(),
            task.board,
            task.seq,
            task.position,
            id,
        ],
    )?;
    let task = find_by_id(tx.conn, id)?;
    tx.touch("tasks", crate::broadcast::ChangeAction::Update, &task);
    Ok(task)
}

/// Move a task to a column, recomputing `position` when not supplied.
pub fn move_task(
    tx: &Tx,
    id: &str,
    column: &str,
    position: Option<f64>,
) -> Result<Task, StoreError> {
    let mut task = find_by_id(tx.conn, id)?;
    let board = boards::find_by_id(tx.conn, &task.board)?;
    if !board.has_column(column) {
        return Err(StoreError::validation(format!(
            "column '{column}' is not declared on this board"
        )));
    }
    let position = match position {
        Some(p) => {
            if position_taken(tx.conn, &task.board, column, p, &task.id)? {
                return Err(StoreError::validation(format!(
                    "position {p} is already in use in column '{column}'"
                )));
            }
            p
        }
        None => next_position(tx.conn, &task.board, column)?,
    };
    task.column = column.to_string();
    task.position = position;
    task.updated = Utc::now();
    tx.conn.execute(
        "UPDATE tasks SET column_name=?1, position=?2, updated=?3 WHERE id=?4",
        params![task.column, task.position, task.updated.to_rfc3339(), task.id],
    )?;
    tx.touch("tasks", crate::broadcast::ChangeAction::Update, &task);
    Ok(task)
}

/// Replace a task's embedded `agent_session`, used only by `session.rs`,
/// which owns the invariant that this and the sibling `SessionRecord`
/// mutation happen in the same transaction.
pub fn set_agent_session(
    tx: &Tx,
    id: &str,
    session: Option<&super::models::AgentSession>,
) -> Result<Task, StoreError> {
    let json = session.map(|s| serde_json::to_string(s).unwrap());
    tx.conn.execute(
        "UPDATE tasks SET agent_session = ?1, updated = ?2 WHERE id = ?3",
        params![json, Utc::now().to_rfc3339(), id],
    )?;
    let task = find_by_id(tx.conn, id)?;
    tx.touch("tasks", crate::broadcast::ChangeAction::Update, &task);
    Ok(task)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    Ok(find_by_id(conn, id).is_ok())
}

/// Write a task record verbatim, including `id`, `seq`, `agent_session`,
/// `due_date`, `parent` and both timestamps, used only by `export.rs`'s
/// import path — import must reproduce every exported field, not just the
/// ones `NewTask`/`TaskUpdate` can set. `display_id` is derived from `seq`
/// and the board's prefix at read time, so it is not itself stored.
pub fn restore(tx: &Tx, task: &Task) -> Result<(), StoreError> {
    let agent_session = task
        .agent_session
        .as_ref()
        .map(|s| serde_json::to_string(s).unwrap());
    tx.conn.execute(
        "INSERT INTO tasks (id, seq, board, title, description, type, priority, column_name,
            position, epic, parent, labels, blocked_by, due_date, created_by, created_by_agent,
            agent_session, created, updated)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
         ON CONFLICT(id) DO UPDATE SET seq=excluded.seq, board=excluded.board, title=excluded.title,
            description=excluded.description, type=excluded.type, priority=excluded.priority,
            column_name=excluded.column_name, position=excluded.position, epic=excluded.epic,
            parent=excluded.parent, labels=excluded.labels, blocked_by=excluded.blocked_by,
            due_date=excluded.due_date, created_by=excluded.created_by,
            created_by_agent=excluded.created_by_agent, agent_session=excluded.agent_session,
            created=excluded.created, updated=excluded.updated",
        params![
            task.id,
            task.seq,
            task.board,
            task.title,
            task.description,
            task.task_type.as_str(),
            task.priority.as_str(),
            task.column,
            task.position,
            task.epic,
            task.parent,
            serde_json::to_string(&task.labels).unwrap(),
            serde_json::to_string(&task.blocked_by).unwrap(),
            task.due_date.map(|d| d.to_rfc3339()),
            task.created_by.as_str(),
            task.created_by_agent,
            agent_session,
            task.created.to_rfc3339(),
            task.updated.to_rfc3339(),
        ],
    )?;
    let restored = find_by_id(tx.conn, &task.id)?;
    tx.touch("tasks", crate::broadcast::ChangeAction::Update, &restored);
    Ok(())
}

pub fn delete(tx: &Tx, id: &str) -> Result<(), StoreError> {
    let count = tx.conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    if count == 0 {
        return Err(StoreError::NotFound);
    }
    tx.touch_deleted("tasks", id);
    Ok(())
}

/// Task list filters. All filters compose with logical AND.
#[derive(Default)]
pub struct ListFilter {
    pub board: Option<String>,
    pub column: Option<String>,
    pub need_input: bool,
    pub task_type: Option<TaskType>,
    pub priority: Option<Priority>,
    pub label: Option<String>,
    pub epic: Option<String>,
    pub parent: Option<String>,
    pub has_due: Option<bool>,
    pub due_before: Option<DateTime<Utc>>,
    pub due_after: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<Task>, StoreError> {
    let sql = format!("{SELECT} ORDER BY t.board, t.column_name, t.position");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_task)?;
    let mut out = Vec::new();
    for row in rows {
        let task = row?.into_task()?;
        if !matches(&task, filter) {
            continue;
        }
        out.push(task);
    }
    if let Some(offset) = filter.offset {
        out = out.into_iter().skip(offset.max(0) as usize).collect();
    }
    if let Some(limit) = filter.limit {
        out.truncate(limit.max(0) as usize);
    }
    Ok(out)
}

fn matches(task: &Task, filter: &ListFilter) -> bool {
    if let Some(ref b) = filter.board {
        if &task.board != b {
            return false;
        }
    }
    if let Some(ref c) = filter.column {
        if &task.column != c {
            return false;
        }
    }
    if filter.need_input && task.column != "need_input" {
        return false;
    }
    if let Some(t) = filter.task_type {
        if task.task_type != t {
            return false;
        }
    }
    if let Some(p) = filter.priority {
        if task.priority != p {
            return false;
        }
    }
    if let Some(ref l) = filter.label {
        if !task.labels.iter().any(|x| x == l) {
            return false;
        }
    }
    if let Some(ref e) = filter.epic {
        if task.epic.as_deref() != Some(e.as_str()) {
            return false;
        }
    }
    if let Some(ref p) = filter.parent {
        if task.parent.as_deref() != Some(p.as_str()) {
            return false;
        }
    }
    if let Some(has_due) = filter.has_due {
        if task.due_date.is_some() != has_due {
            return false;
        }
    }
    if let Some(before) = filter.due_before {
        match task.due_date {
            Some(d) if d < before => {}
            _ => return false,
        }
    }
    if let Some(after) = filter.due_after {
        match task.due_date {
            Some(d) if d > after => {}
            _ => return false,
        }
    }
    if let Some(ref q) = filter.search {
        let q = q.to_lowercase();
        if !task.title.to_lowercase().contains(&q) && !task.description.to_lowercase().contains(&q)
        {
            return false;
        }
    }
    true
}

/// Would assigning `candidate_blocked_by` to `task_id` create a cycle in
/// the `blocked_by` graph? Traverses forward from each candidate, following
/// *their* `blocked_by` edges; if the traversal revisits `task_id`, the new
/// edge `task_id -> candidate` would close a cycle. `task_id` is empty for
/// a not-yet-created task (it cannot appear in anyone's `blocked_by` yet).
fn would_cycle(
    conn: &Connection,
    task_id: &str,
    candidate_blocked_by: &[String],
) -> Result<bool, StoreError> {
    if task_id.is_empty() {
        return Ok(false);
    }
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = candidate_blocked_by.to_vec();
    while let Some(current) = stack.pop() {
        if current == task_id {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Ok(task) = find_by_id(conn, &current) {
            stack.extend(task.blocked_by);
        }
    }
    Ok(false)
}
