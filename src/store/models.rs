//! Data model types shared across the store, workflow engine, HTTP API and
//! CLI.
//!
//! Enums carry a `snake_case` serde representation plus explicit
//! `as_str`/`from_str` for the SQLite TEXT-column round trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Enums ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Bug,
    Feature,
    Chore,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Chore => "chore",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "chore" => Ok(Self::Chore),
            _ => Err(format!("invalid task type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("invalid priority: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    Manual,
    Command,
    Auto,
}

impl ResumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Command => "command",
            Self::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "manual" => Ok(Self::Manual),
            "command" => Ok(Self::Command),
            "auto" => Ok(Self::Auto),
            _ => Err(format!("invalid resume mode: {s}")),
        }
    }
}

impl Default for ResumeMode {
    fn default() -> Self {
        Self::Command
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    User,
    Agent,
    Cli,
}

impl CreatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Cli => "cli",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "cli" => Ok(Self::Cli),
            _ => Err(format!("invalid created_by: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgentTool {
    Opencode,
    ClaudeCode,
    Codex,
}

impl AgentTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opencode => "opencode",
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "opencode" => Ok(Self::Opencode),
            "claude-code" => Ok(Self::ClaudeCode),
            "codex" => Ok(Self::Codex),
            _ => Err(format!("invalid agent tool: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Uuid,
    Path,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Path => "path",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "uuid" => Ok(Self::Uuid),
            "path" => Ok(Self::Path),
            _ => Err(format!("invalid ref_type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("invalid session status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorType {
    Human,
    Agent,
}

impl AuthorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            _ => Err(format!("invalid author_type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    Moved,
    Completed,
    SessionLinked,
    SessionUnlinked,
    Blocked,
    Commented,
    Resumed,
    Deleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Moved => "moved",
            Self::Completed => "completed",
            Self::SessionLinked => "session_linked",
            Self::SessionUnlinked => "session_unlinked",
            Self::Blocked => "blocked",
            Self::Commented => "commented",
            Self::Resumed => "resumed",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "moved" => Ok(Self::Moved),
            "completed" => Ok(Self::Completed),
            "session_linked" => Ok(Self::SessionLinked),
            "session_unlinked" => Ok(Self::SessionUnlinked),
            "blocked" => Ok(Self::Blocked),
            "commented" => Ok(Self::Commented),
            "resumed" => Ok(Self::Resumed),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("invalid history action: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Agent,
    Cli,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Cli => "cli",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "cli" => Ok(Self::Cli),
            _ => Err(format!("invalid actor: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    All,
    Any,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            _ => Err(format!("invalid match mode: {s}")),
        }
    }
}

// ── Core entities ───────────────────────────────────────────────────────

/// A kanban board: a named, ordered set of columns plus the per-board
/// display-id sequence and default resume mode new tasks inherit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub prefix: String,
    pub columns: Vec<String>,
    pub color: Option<String>,
    pub next_seq: i64,
    pub resume_mode: ResumeMode,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Board {
    pub const CANONICAL_COLUMNS: &'static [&'static str] = &[
        "backlog",
        "todo",
        "in_progress",
        "need_input",
        "review",
        "done",
    ];

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn supports_need_input(&self) -> bool {
        self.has_column("need_input")
    }
}

/// A task's current agent binding, embedded directly on the row rather
/// than joined from `sessions` so every task read carries its live
/// session without a second query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub tool: AgentTool,
    #[serde(rename = "ref")]
    pub reference: String,
    pub ref_type: RefType,
    pub working_dir: String,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub seq: i64,
    pub display_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: Priority,
    pub column: String,
    pub position: f64,
    pub board: String,
    pub epic: Option<String>,
    pub parent: Option<String>,
    pub labels: Vec<String>,
    pub blocked_by: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: CreatedBy,
    pub created_by_agent: Option<String>,
    pub agent_session: Option<AgentSession>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// An archived agent session, written when a task's current binding is
/// replaced or explicitly unlinked. Never updated once `ended_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub task: String,
    pub tool: AgentTool,
    pub external_ref: String,
    pub ref_type: RefType,
    pub working_dir: String,
    pub status: SessionStatus,
    pub created: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentMetadata {
    /// `@mention` targets extracted from `content` at creation time.
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub task: String,
    pub content: String,
    pub author_type: AuthorType,
    pub author_id: Option<String>,
    pub metadata: CommentMetadata,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub description: String,
    pub color: Option<String>,
    pub board: String,
}

/// HistoryEntry.changes payload; free-form JSON so `block`'s
/// `prior_column` and `update`'s `{field, from, to}` shapes share one column.
pub type HistoryChanges = serde_json::Value;

/// One append-only history row, ordered by `seq` within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: i64,
    pub task: String,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub actor: Actor,
    pub actor_detail: Option<String>,
    pub changes: Option<HistoryChanges>,
}

/// A saved filter/sort/group preset for a board's task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub id: String,
    pub board: String,
    pub name: String,
    pub filters: Vec<serde_json::Value>,
    pub match_mode: MatchMode,
    pub display: serde_json::Value,
    pub is_favorite: bool,
}
