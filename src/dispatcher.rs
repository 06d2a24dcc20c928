//! Resume dispatcher: the tool-specific invocation matrix.
//!
//! A closed-set tagged variant rather than an open-ended trait —
//! `AgentTool` is exactly that enum, matched exhaustively here instead of
//! behind a `dyn Tool` object. Adding a tool means extending the match,
//! not implementing an interface.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::WorkflowError;
use crate::store::models::AgentTool;

/// How the prompt reaches the spawned process: as an argv entry, or piped
/// to stdin after the process starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    Argv,
    Stdin,
}

/// A fully-resolved spawn recipe for one `(tool, ref, prompt, working_dir)`
/// combination. Carries enough to either print a shell-quoted command
/// (`mode = manual` / `exec = false`) or actually spawn it.
pub struct SpawnRecipe {
    pub program: String,
    pub args: Vec<String>,
    pub delivery: PromptDelivery,
    pub prompt: String,
    pub working_dir: String,
}

impl SpawnRecipe {
    /// Build a recipe for `tool`, threading the session reference back in
    /// so the host tool can rehydrate context.
    pub fn build(tool: AgentTool, reference: &str, prompt: &str, working_dir: &str) -> Self {
        match tool {
            AgentTool::Opencode => SpawnRecipe {
                program: "opencode".to_string(),
                args: vec![
                    "run".to_string(),
                    prompt.to_string(),
                    "--session".to_string(),
                    reference.to_string(),
                ],
                delivery: PromptDelivery::Argv,
                prompt: prompt.to_string(),
                working_dir: working_dir.to_string(),
            },
            AgentTool::ClaudeCode => SpawnRecipe {
                program: "claude".to_string(),
                args: vec!["--resume".to_string(), reference.to_string()],
                delivery: PromptDelivery::Stdin,
                prompt: prompt.to_string(),
                working_dir: working_dir.to_string(),
            },
            AgentTool::Codex => SpawnRecipe {
                program: "codex".to_string(),
                args: vec!["resume".to_string(), reference.to_string()],
                delivery: PromptDelivery::Stdin,
                prompt: prompt.to_string(),
                working_dir: working_dir.to_string(),
            },
        }
    }

    /// The printable form: a fully shell-quoted command string, for
    /// `mode = manual` or `exec = false` — e.g.
    /// `opencode run '<prompt>' --session abc-123` verbatim for an
    /// argv-delivered prompt; for stdin-delivered tools the note about
    /// piping is appended.
    pub fn printable(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg == &self.prompt {
                parts.push(shell_quote(arg));
            } else {
                parts.push(arg.clone());
            }
        }
        let command = parts.join(" ");
        match self.delivery {
            PromptDelivery::Argv => command,
            PromptDelivery::Stdin => format!(
                "{command}\n# pipe the prompt into this process's stdin:\n{}",
                shell_quote(&self.prompt)
            ),
        }
    }

    /// Spawn the recipe as a detached child process, writing the prompt to
    /// stdin when the delivery channel calls for it. The returned handle
    /// is not awaited by the caller and does not hold any transaction
    /// open. Must be called *outside* any `RunInTransaction` closure —
    /// never spawn inside a transaction.
    pub async fn spawn(&self) -> Result<tokio::process::Child, WorkflowError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.working_dir);
        if self.delivery == PromptDelivery::Stdin {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().map_err(|e| WorkflowError::SpawnFailed {
            reason: e.to_string(),
        })?;
        if self.delivery == PromptDelivery::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(self.prompt.as_bytes())
                    .await
                    .map_err(|e| WorkflowError::SpawnFailed {
                        reason: format!("failed writing prompt to stdin: {e}"),
                    })?;
            }
        }
        Ok(child)
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opencode_delivers_prompt_via_argv() {
        let recipe = SpawnRecipe::build(AgentTool::Opencode, "abc-123", "continue please", "/work");
        assert_eq!(recipe.delivery, PromptDelivery::Argv);
        assert_eq!(recipe.program, "opencode");
        assert_eq!(recipe.args[0], "run");
        assert_eq!(recipe.args[2], "--session");
        assert_eq!(recipe.args[3], "abc-123");
    }

    #[test]
    fn claude_code_delivers_prompt_via_stdin_with_resume_flag() {
        let recipe = SpawnRecipe::build(AgentTool::ClaudeCode, "550e8400", "continue", "/work");
        assert_eq!(recipe.delivery, PromptDelivery::Stdin);
        assert_eq!(recipe.args, vec!["--resume", "550e8400"]);
    }

    #[test]
    fn codex_uses_positional_ref_and_stdin() {
        let recipe = SpawnRecipe::build(AgentTool::Codex, "sess-1", "continue", "/work");
        assert_eq!(recipe.delivery, PromptDelivery::Stdin);
        assert_eq!(recipe.args, vec!["resume", "sess-1"]);
    }

    #[test]
    fn printable_form_quotes_prompt_and_appends_session_flag() {
        let recipe = SpawnRecipe::build(AgentTool::Opencode, "abc-123", "<prompt>", "/work");
        assert_eq!(recipe.printable(), "opencode run '<prompt>' --session abc-123");
    }
}
