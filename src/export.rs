//! Export/import: a versioned JSON snapshot of the whole database or a
//! single board. Every field it reads comes from an existing collection
//! module's `list`/`list_for_*`/`restore` function, never a bespoke
//! query.
//!
//! Only the CLI's Direct `Store` ever calls this module (`cli/backend.rs`'s
//! `Backend::store()` returns `None` for the Http variant) — export/import
//! operate on the whole on-disk database at once and have no corresponding
//! workflow verb or HTTP route, since the data directory is local to the
//! machine running the command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::history;
use crate::store::models::{Board, Comment, Epic, HistoryEntry, SessionRecord, Task, View};
use crate::store::{Store, boards, comments, epics, sessions, tasks, views};
use crate::workflow;

/// Bumped only if the on-disk shape of this document changes in a way that
/// breaks `import`'s assumptions. Format is `"1.x"`.
pub const FORMAT_VERSION: &str = "1.0";

/// A task plus its full history, the one field the export needs that
/// isn't already a `Task` field (`history` lives in a sibling table — see
/// `models.rs`'s doc comment on `HistoryEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTask {
    #[serde(flatten)]
    pub task: Task,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: String,
    pub exported: DateTime<Utc>,
    pub boards: Vec<Board>,
    pub epics: Vec<Epic>,
    pub tasks: Vec<ExportTask>,
    pub comments: Vec<Comment>,
    pub sessions: Vec<SessionRecord>,
    pub views: Vec<View>,
}

/// Snapshot the whole database, or just `board_ref`'s board and everything
/// scoped to it, into one `ExportDocument`. Read-only; uses `Store::read`
/// so the snapshot is one consistent transaction, mirroring the
/// consistent-snapshot guarantee of the on-disk backup case.
pub fn export(store: &Store, board_ref: Option<&str>) -> Result<ExportDocument, StoreError> {
    store.read(|conn| {
        let all_boards = boards::list(conn)?;
        let selected: Vec<Board> = match board_ref {
            Some(reference) => {
                let board = workflow::resolve_board(conn, reference).map_err(|_| {
                    StoreError::validation(format!("unknown board '{reference}'"))
                })?;
                vec![board]
            }
            None => all_boards,
        };

        let mut export_boards = Vec::new();
        let mut export_epics = Vec::new();
        let mut export_tasks = Vec::new();
        let mut export_comments = Vec::new();
        let mut export_sessions = Vec::new();
        let mut export_views = Vec::new();

        for board in selected {
            export_epics.extend(epics::list_for_board(conn, &board.id)?);
            export_views.extend(views::list_for_board(conn, &board.id)?);

            let filter = tasks::ListFilter {
                board: Some(board.id.clone()),
                ..Default::default()
            };
            for task in tasks::list(conn, &filter)? {
                let task_history = history::for_task(conn, &task.id)?;
                export_comments.extend(comments::list_for_task(conn, &task.id)?);
                export_sessions.extend(sessions::history_for_task(conn, &task.id)?);
                export_tasks.push(ExportTask {
                    task,
                    history: task_history,
                });
            }

            export_boards.push(board);
        }

        Ok(ExportDocument {
            version: FORMAT_VERSION.to_string(),
            exported: Utc::now(),
            boards: export_boards,
            epics: export_epics,
            tasks: export_tasks,
            comments: export_comments,
            sessions: export_sessions,
            views: export_views,
        })
    })
}

/// `merge` keeps existing records on id collision, `replace` overwrites
/// field-for-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    Merge,
    Replace,
}

impl ImportStrategy {
    pub fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "merge" => Ok(ImportStrategy::Merge),
            "replace" => Ok(ImportStrategy::Replace),
            other => Err(StoreError::validation(format!("unknown import strategy '{other}'"))),
        }
    }
}

/// Per-collection tally for one `import` call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CollectionReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImportReport {
    pub boards: CollectionReport,
    pub epics: CollectionReport,
    pub tasks: CollectionReport,
    pub comments: CollectionReport,
    pub sessions: CollectionReport,
    pub views: CollectionReport,
}

/// Apply an `ExportDocument`. `dry_run` computes the report without writing
/// anything — every record is checked against `exists` and then discarded
/// rather than restored, so the report reflects exactly what would change.
pub fn import(
    store: &Store,
    doc: &ExportDocument,
    strategy: ImportStrategy,
    dry_run: bool,
) -> Result<ImportReport, StoreError> {
    store.run_in_transaction(|tx| {
        let mut report = ImportReport::default();

        for board in &doc.boards {
            let already = boards::exists(tx.conn, &board.id)?;
            tally(&mut report.boards, already, strategy);
            if !dry_run && should_write(already, strategy) {
                boards::restore(tx, board)?;
            }
        }
        for epic in &doc.epics {
            let already = epics::exists(tx.conn, &epic.id)?;
            tally(&mut report.epics, already, strategy);
            if !dry_run && should_write(already, strategy) {
                epics::restore(tx, epic)?;
            }
        }
        for entry in &doc.tasks {
            let already = tasks::exists(tx.conn, &entry.task.id)?;
            tally(&mut report.tasks, already, strategy);
            if !dry_run && should_write(already, strategy) {
                tasks::restore(tx, &entry.task)?;
                for history_entry in &entry.history {
                    history::restore(tx, history_entry)?;
                }
            }
        }
        for comment in &doc.comments {
            let already = comments::exists(tx.conn, &comment.id)?;
            tally(&mut report.comments, already, strategy);
            if !dry_run && should_write(already, strategy) {
                comments::restore(tx, comment)?;
            }
        }
        for session in &doc.sessions {
            let already = sessions::exists(tx.conn, &session.id)?;
            tally(&mut report.sessions, already, strategy);
            if !dry_run && should_write(already, strategy) {
                sessions::restore(tx, session)?;
            }
        }
        for view in &doc.views {
            let already = views::exists(tx.conn, &view.id)?;
            tally(&mut report.views, already, strategy);
            if !dry_run && should_write(already, strategy) {
                views::restore(tx, view)?;
            }
        }

        Ok(report)
    })
}

fn should_write(already_exists: bool, strategy: ImportStrategy) -> bool {
    !already_exists || strategy == ImportStrategy::Replace
}

fn tally(report: &mut CollectionReport, already_exists: bool, strategy: ImportStrategy) {
    match (already_exists, strategy) {
        (false, _) => report.created += 1,
        (true, ImportStrategy::Replace) => report.updated += 1,
        (true, ImportStrategy::Merge) => report.skipped += 1,
    }
}
