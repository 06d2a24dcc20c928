//! Context builder: composes the resume prompt from a task
//! and its comment thread.
//!
//! Plain `format!`-built Markdown sections, no templating engine
//! dependency. Pure: takes `(task, ordered comments)`, returns a
//! `String`. No I/O.

use crate::store::models::{Comment, Task};

/// The full prompt: every comment rendered chronologically.
pub fn build_full_prompt(task: &Task, comments: &[Comment]) -> String {
    let mut out = String::new();
    out.push_str("## Task Context (from EgenSkriven)\n\n");
    out.push_str(&format!("**Task**: {} - {}\n", task.display_id, task.title));
    out.push_str("**Status**: need_input -> in_progress\n");
    out.push_str(&format!("**Priority**: {}\n\n", task.priority.as_str()));
    out.push_str("## Conversation Thread\n\n");
    for comment in comments {
        out.push_str(&render_comment_line(comment));
        out.push('\n');
    }
    out.push('\n');
    out.push_str("## Instructions\n\n");
    out.push_str("Continue working on the task based on the human's response above.\n");
    out
}

/// The minimal prompt: drops `Priority`, emits only the last human
/// comment. Offered to conserve tokens for tools that bill per character.
pub fn build_minimal_prompt(task: &Task, comments: &[Comment]) -> String {
    let mut out = String::new();
    out.push_str("## Task Context (from EgenSkriven)\n\n");
    out.push_str(&format!("**Task**: {} - {}\n", task.display_id, task.title));
    out.push_str("**Status**: need_input -> in_progress\n\n");
    out.push_str("## Conversation Thread\n\n");
    if let Some(last_human) = comments
        .iter()
        .rev()
        .find(|c| c.author_type == crate::store::models::AuthorType::Human)
    {
        out.push_str(&render_comment_line(last_human));
        out.push('\n');
    }
    out.push('\n');
    out.push_str("## Instructions\n\n");
    out.push_str("Continue working on the task based on the human's response above.\n");
    out
}

pub fn build_prompt(task: &Task, comments: &[Comment], minimal: bool) -> String {
    if minimal {
        build_minimal_prompt(task, comments)
    } else {
        build_full_prompt(task, comments)
    }
}

fn render_comment_line(comment: &Comment) -> String {
    let author = match comment.author_type {
        crate::store::models::AuthorType::Human => comment.author_id.as_deref().unwrap_or("human"),
        crate::store::models::AuthorType::Agent => comment.author_id.as_deref().unwrap_or("agent"),
    };
    format!(
        "[{} @ {}]: {}",
        author,
        comment.created.format("%H:%M"),
        comment.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{AuthorType, CommentMetadata, Priority, TaskType};
    use chrono::Utc;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            seq: 1,
            display_id: "WRK-1".into(),
            title: "Implement auth".into(),
            description: String::new(),
            task_type: TaskType::Feature,
            priority: Priority::High,
            column: "need_input".into(),
            position: 1000.0,
            board: "b1".into(),
            epic: None,
            parent: None,
            labels: vec![],
            blocked_by: vec![],
            due_date: None,
            created_by: crate::store::models::CreatedBy::User,
            created_by_agent: None,
            agent_session: None,
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    fn comment(author_type: AuthorType, content: &str) -> Comment {
        Comment {
            id: "c1".into(),
            task: "t1".into(),
            content: content.into(),
            author_type,
            author_id: None,
            metadata: CommentMetadata::default(),
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    #[test]
    fn full_prompt_contains_priority_and_all_comments() {
        let t = task();
        let comments = vec![
            comment(AuthorType::Agent, "JWT or sessions?"),
            comment(AuthorType::Human, "Use JWT with refresh tokens"),
        ];
        let prompt = build_full_prompt(&t, &comments);
        assert!(prompt.contains("**Priority**: high"));
        assert!(prompt.contains("JWT or sessions?"));
        assert!(prompt.contains("Use JWT with refresh tokens"));
        assert!(prompt.contains("WRK-1 - Implement auth"));
    }

    #[test]
    fn minimal_prompt_drops_priority_and_keeps_last_human_only() {
        let t = task();
        let comments = vec![
            comment(AuthorType::Agent, "JWT or sessions?"),
            comment(AuthorType::Human, "Use JWT with refresh tokens"),
            comment(AuthorType::Agent, "Got it, proceeding"),
        ];
        let prompt = build_minimal_prompt(&t, &comments);
        assert!(!prompt.contains("Priority"));
        assert!(prompt.contains("Use JWT with refresh tokens"));
        assert!(!prompt.contains("JWT or sessions?"));
        assert!(!prompt.contains("Got it, proceeding"));
    }

    #[test]
    fn minimal_prompt_with_no_human_comments_has_empty_thread() {
        let t = task();
        let comments = vec![comment(AuthorType::Agent, "JWT or sessions?")];
        let prompt = build_minimal_prompt(&t, &comments);
        assert!(!prompt.contains("JWT or sessions?"));
    }
}
