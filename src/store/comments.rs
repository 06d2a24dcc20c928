//! Comment CRUD, grounded in the same hand-written-query style as
//! `boards.rs`/`tasks.rs`. Comments are owned by their task (cascade
//! delete via the `ON DELETE CASCADE` foreign key in `mod.rs`'s schema).

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::LazyLock;

use super::Tx;
use super::models::{AuthorType, Comment, CommentMetadata};
use crate::errors::StoreError;
use crate::ids::new_id;

/// Matches an `@<alnum-or-hyphen-or-underscore>` mention token. Compiled
/// once and shared across every `extract_mentions` call.
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_-]+)").unwrap());

struct CommentRow {
    id: String,
    task: String,
    content: String,
    author_type: String,
    author_id: Option<String>,
    metadata: String,
    created: String,
    updated: String,
}

impl CommentRow {
    fn into_comment(self) -> Result<Comment, StoreError> {
        Ok(Comment {
            id: self.id,
            task: self.task,
            content: self.content,
            author_type: AuthorType::from_str(&self.author_type).map_err(StoreError::validation)?,
            author_id: self.author_id,
            metadata: serde_json::from_str(&self.metadata)
                .map_err(|e| StoreError::validation(format!("bad comment metadata JSON: {e}")))?,
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
    "SELECT id, task, content, author_type, author_id, metadata, created, updated FROM comments";

fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        task: row.get(1)?,
        content: row.get(2)?,
        author_type: row.get(3)?,
        author_id: row.get(4)?,
        metadata: row.get(5)?,
        created: row.get(6)?,
        updated: row.get(7)?,
    })
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Comment, StoreError> {
    let sql = format!("{SELECT} WHERE id = ?1");
    conn.query_row(&sql, params![id], row_to_comment)
        .optional()?
        .ok_or(StoreError::NotFound)?
        .into_comment()
}

/// Extract `@<alnum-or-hyphen>` tokens from comment content. Case-sensitive;
/// `@agent` is a recognized trigger among them.
pub fn extract_mentions(content: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Create a comment. Does not itself record history or enforce a column
/// transition — the Workflow engine (`workflow.rs`) composes this with
/// `history::append` inside one transaction.
pub fn create(
    tx: &Tx,
    task_id: &str,
    content: &str,
    author_type: AuthorType,
    author_id: Option<&str>,
) -> Result<Comment, StoreError> {
    if content.is_empty() || content.len() > 50_000 {
        return Err(StoreError::validation("comment content must be 1-50000 chars"));
    }
    let mentions = extract_mentions(content);
    let metadata = CommentMetadata { mentions };
    let now = Utc::now();
    let comment = Comment {
        id: new_id(),
        task: task_id.to_string(),
        content: content.to_string(),
        author_type,
        author_id: author_id.map(|s| s.to_string()),
        metadata,
        created: now,
        updated: now,
    };
    tx.conn.execute(
        "INSERT INTO comments (id, task, content, author_type, author_id, metadata, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            comment.id,
            comment.task,
            comment.content,
            comment.author_type.as_str(),
            comment.author_id,
            serde_json::to_string(&comment.metadata).unwrap(),
            comment.created.to_rfc3339(),
            comment.updated.to_rfc3339(),
        ],
    )?;
    tx.touch("comments", crate::broadcast::ChangeAction::Create, &comment);
    Ok(comment)
}

/// All comments for a task, in ascending `created` order (ties broken by
/// `id`). `id` is a random opaque string, not a second ordering key on its
/// own merits — it only exists to make the sort deterministic when two
/// comments land in the same millisecond.
pub fn list_for_task(conn: &Connection, task_id: &str) -> Result<Vec<Comment>, StoreError> {
    let sql = format!("{SELECT} WHERE task = ?1 ORDER BY created ASC, id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![task_id], row_to_comment)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_comment()?);
    }
    Ok(out)
}

pub fn list_since(
    conn: &Connection,
    task_id: &str,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
) -> Result<Vec<Comment>, StoreError> {
    let mut all = list_for_task(conn, task_id)?;
    if let Some(since) = since {
        all.retain(|c| c.created > since);
    }
    if let Some(limit) = limit {
        all.truncate(limit.max(0) as usize);
    }
    Ok(all)
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    Ok(find_by_id(conn, id).is_ok())
}

/// Write a comment record verbatim, used only by `export.rs`'s import path.
pub fn restore(tx: &Tx, comment: &Comment) -> Result<(), StoreError> {
    tx.conn.execute(
        "INSERT INTO comments (id, task, content, author_type, author_id, metadata, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET task=excluded.task, content=excluded.content,
            author_type=excluded.author_type, author_id=excluded.author_id,
            metadata=excluded.metadata, created=excluded.created, updated=excluded.updated",
        params![
            comment.id,
            comment.task,
            comment.content,
            comment.author_type.as_str(),
            comment.author_id,
            serde_json::to_string(&comment.metadata).unwrap(),
            comment.created.to_rfc3339(),
            comment.updated.to_rfc3339(),
        ],
    )?;
    tx.touch("comments", crate::broadcast::ChangeAction::Update, comment);
    Ok(())
}

pub fn count_for_task(conn: &Connection, task_id: &str) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE task = ?1",
        params![task_id],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}
