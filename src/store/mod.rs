//! Transactional persistence over an embedded SQLite database.
//! Hand-written-query style throughout — no generic ORM layer, one method
//! per query shape — built around a single primitive, `run_in_transaction`.
//!
//! Every collection gets its own query module (`boards`, `tasks`,
//! `sessions`, `comments`, `epics`, `views`) operating against a shared
//! [`Tx`] handle. `Tx::touch` records the post-image of a mutated record;
//! after the closure passed to [`Store::run_in_transaction`] returns `Ok`
//! and the underlying `rusqlite` transaction commits, the accumulated
//! events are handed to the broadcast bus in commit order.

pub mod boards;
pub mod comments;
pub mod epics;
pub mod models;
pub mod sessions;
pub mod tasks;
pub mod views;

use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;

use crate::broadcast::{Bus, BroadcastEvent, ChangeAction};
use crate::errors::StoreError;

/// Wraps a single SQLite connection (WAL mode, foreign keys on).
pub struct Store {
    conn: std::sync::Mutex<Connection>,
    bus: Bus,
}

/// A transactional handle passed into the closure given to
/// `Store::run_in_transaction`. `find_by_id`/`find_by_filter`/`save`/
/// `delete` are implemented per-collection in the sibling modules; this
/// type only owns the raw `rusqlite::Transaction` and the pending-event
/// buffer every collection module writes into via `touch`/`untouch`.
pub struct Tx<'a> {
    pub conn: &'a Connection,
    pending: std::cell::RefCell<Vec<BroadcastEvent>>,
}

impl<'a> Tx<'a> {
    /// Record the post-image of a created or updated record for broadcast
    /// after commit.
    pub fn touch<T: Serialize>(&self, collection: &str, action: ChangeAction, record: &T) {
        let value = serde_json::to_value(record).expect("record must serialize to JSON");
        self.pending.borrow_mut().push(BroadcastEvent {
            collection: collection.to_string(),
            action,
            record: value,
        });
    }

    /// Record a deletion for broadcast after commit; the id is all
    /// subscribers get, since the row is already gone by commit time.
    pub fn touch_deleted(&self, collection: &str, id: &str) {
        self.pending.borrow_mut().push(BroadcastEvent {
            collection: collection.to_string(),
            action: ChangeAction::Delete,
            record: serde_json::json!({ "id": id }),
        });
    }
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run
    /// migrations. `bus` is the process-wide broadcast bus singleton —
    /// passed in explicitly rather than constructed ambiently, so a single
    /// process can wire multiple `Store`s to the same bus (or none, for
    /// one-off CLI commands).
    pub fn open(path: &Path, bus: Bus) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::validation(format!("failed to create data directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: std::sync::Mutex::new(conn),
            bus,
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory(bus: Bus) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: std::sync::Mutex::new(conn),
            bus,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        run_migrations(&conn)?;
        Ok(())
    }

    /// Run `f` inside one transaction. The closure receives a `&Tx`
    /// and returns `Result<T, WorkflowError>`; on `Ok`, the transaction
    /// commits and pending events are broadcast in the order they were
    /// recorded. On `Err`, the transaction rolls back and nothing is
    /// broadcast — every workflow verb is all-or-nothing.
    pub fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Tx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let txn = conn.unchecked_transaction().map_err(StoreError::from)?;
        let tx = Tx {
            conn: &txn,
            pending: std::cell::RefCell::new(Vec::new()),
        };
        let result = f(&tx)?;
        let events = tx.pending.into_inner();
        txn.commit().map_err(StoreError::from)?;
        for event in events {
            self.bus.publish(event);
        }
        Ok(result)
    }

    /// Read-only convenience for handlers that only ever read (e.g. `show`,
    /// `list`) and therefore never need to broadcast anything.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let conn = self.conn.lock().expect("store mutex poisoned");
        f(&conn)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS boards (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            prefix TEXT NOT NULL UNIQUE,
            columns TEXT NOT NULL,
            color TEXT,
            next_seq INTEGER NOT NULL DEFAULT 1,
            resume_mode TEXT NOT NULL DEFAULT 'command',
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS epics (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            color TEXT,
            board TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            board TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL DEFAULT 'feature',
            priority TEXT NOT NULL DEFAULT 'medium',
            column_name TEXT NOT NULL,
            position REAL NOT NULL DEFAULT 1000,
            epic TEXT REFERENCES epics(id) ON DELETE SET NULL,
            parent TEXT REFERENCES tasks(id) ON DELETE SET NULL,
            labels TEXT NOT NULL DEFAULT '[]',
            blocked_by TEXT NOT NULL DEFAULT '[]',
            due_date TEXT,
            created_by TEXT NOT NULL DEFAULT 'user',
            created_by_agent TEXT,
            agent_session TEXT,
            created TEXT NOT NULL,
            updated TEXT NOT NULL,
            UNIQUE(board, seq)
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            task TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            tool TEXT NOT NULL,
            external_ref TEXT NOT NULL,
            ref_type TEXT NOT NULL,
            working_dir TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created TEXT NOT NULL,
            ended_at TEXT
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            task TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            author_type TEXT NOT NULL,
            author_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS views (
            id TEXT PRIMARY KEY,
            board TEXT NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            filters TEXT NOT NULL DEFAULT '[]',
            match_mode TEXT NOT NULL DEFAULT 'all',
            display TEXT NOT NULL DEFAULT '{}',
            is_favorite INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS history_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            task TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            actor_detail TEXT,
            changes TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task);
        CREATE INDEX IF NOT EXISTS idx_comments_created ON comments(created);
        CREATE INDEX IF NOT EXISTS idx_sessions_task ON sessions(task);
        CREATE INDEX IF NOT EXISTS idx_sessions_external_ref ON sessions(external_ref);
        CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_board_column_position ON tasks(board, column_name, position);
        CREATE INDEX IF NOT EXISTS idx_tasks_column ON tasks(column_name);
        CREATE INDEX IF NOT EXISTS idx_history_task ON history_entries(task);
        ",
    )?;
    Ok(())
}
