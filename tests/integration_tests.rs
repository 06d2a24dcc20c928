//! End-to-end tests driving the `egenskriven` binary through `assert_cmd`,
//! each run against a fresh `--project-dir` so state never leaks between
//! tests. Every invocation passes `--direct` to skip the `/api/health`
//! probe: no server is running in these tests, and probing it would just
//! cost the 500ms timeout on every command.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn egenskriven() -> Command {
    Command::cargo_bin("egenskriven").unwrap()
}

/// A fresh project directory with its own `.egenskriven/` and `pb_data/`.
fn project() -> TempDir {
    TempDir::new().unwrap()
}

fn cmd(dir: &TempDir) -> Command {
    let mut c = egenskriven();
    c.current_dir(dir.path()).arg("--project-dir").arg(dir.path()).arg("--direct");
    c
}

fn json_cmd(dir: &TempDir) -> Command {
    let mut c = cmd(dir);
    c.arg("--json");
    c
}

fn create_board(dir: &TempDir, name: &str, prefix: &str) -> Value {
    let out = json_cmd(dir)
        .arg("board")
        .arg("create")
        .arg(name)
        .arg(prefix)
        .arg("--column")
        .arg("backlog")
        .arg("--column")
        .arg("in_progress")
        .arg("--column")
        .arg("need_input")
        .arg("--column")
        .arg("done")
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

fn add_task(dir: &TempDir, board: &str, title: &str) -> Value {
    let out = json_cmd(dir).arg("add").arg(board).arg(title).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

// =============================================================================
// CLI basics
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn help_and_version_succeed() {
        egenskriven().arg("--help").assert().success();
        egenskriven().arg("--version").assert().success();
    }

    #[test]
    fn missing_subcommand_fails() {
        egenskriven().assert().failure();
    }
}

// =============================================================================
// Boards
// =============================================================================

mod boards {
    use super::*;

    #[test]
    fn create_show_list_round_trip() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let id = board["id"].as_str().unwrap();

        cmd(&dir)
            .arg("board")
            .arg("show")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"prefix\": \"WEB\""));

        cmd(&dir)
            .arg("board")
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("WEB"))
            .stdout(predicate::str::contains("Website"));
    }

    #[test]
    fn update_rejects_dropping_a_column_with_a_live_task() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let id = board["id"].as_str().unwrap();
        add_task(&dir, id, "Ship homepage");

        // None of the board's tasks have moved off "backlog", so dropping
        // every other column should still be fine...
        cmd(&dir)
            .arg("board")
            .arg("update")
            .arg(id)
            .arg("--column")
            .arg("backlog")
            .arg("--column")
            .arg("done")
            .assert()
            .success();

        // ...but dropping the column a live task still occupies must fail.
        cmd(&dir)
            .arg("board")
            .arg("update")
            .arg(id)
            .arg("--column")
            .arg("done")
            .assert()
            .failure()
            .stderr(predicate::str::contains("backlog"));
    }

    #[test]
    fn update_renames_a_board() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let id = board["id"].as_str().unwrap();

        cmd(&dir)
            .arg("board")
            .arg("update")
            .arg(id)
            .arg("--name")
            .arg("Marketing Site")
            .assert()
            .success();

        cmd(&dir)
            .arg("board")
            .arg("show")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("Marketing Site"));
    }
}

// =============================================================================
// Tasks: create, list, show, move, update, delete
// =============================================================================

mod tasks {
    use super::*;

    #[test]
    fn add_list_show() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let board_id = board["id"].as_str().unwrap();

        let task = add_task(&dir, board_id, "Fix the header");
        assert_eq!(task["title"], "Fix the header");
        assert_eq!(task["column"], "backlog");
        let display_id = task["display_id"].as_str().unwrap().to_string();

        cmd(&dir)
            .arg("list")
            .arg("--board")
            .arg(board_id)
            .assert()
            .success()
            .stdout(predicate::str::contains("Fix the header"));

        cmd(&dir)
            .arg("show")
            .arg(&display_id)
            .assert()
            .success()
            .stdout(predicate::str::contains("Fix the header"));
    }

    #[test]
    fn move_updates_column() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Fix the header");
        let id = task["id"].as_str().unwrap();

        let out = json_cmd(&dir)
            .arg("move")
            .arg(id)
            .arg("in_progress")
            .output()
            .unwrap();
        assert!(out.status.success());
        let moved: Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(moved["column"], "in_progress");
    }

    #[test]
    fn update_changes_title_and_priority() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Fix the header");
        let id = task["id"].as_str().unwrap();

        let out = json_cmd(&dir)
            .arg("update")
            .arg(id)
            .arg("--title")
            .arg("Fix the broken header")
            .arg("--priority")
            .arg("high")
            .output()
            .unwrap();
        assert!(out.status.success());
        let updated: Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(updated["title"], "Fix the broken header");
        assert_eq!(updated["priority"], "high");
    }

    #[test]
    fn delete_removes_task() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Fix the header");
        let id = task["id"].as_str().unwrap();

        cmd(&dir).arg("delete").arg(id).assert().success();
        cmd(&dir).arg("show").arg(id).assert().failure();
    }

    #[test]
    fn show_unknown_reference_fails_with_exit_code_one() {
        let dir = project();
        create_board(&dir, "Website", "WEB");

        cmd(&dir)
            .arg("show")
            .arg("zzzzzzzzzzzzzzz")
            .assert()
            .failure()
            .code(1);
    }
}

// =============================================================================
// Comments
// =============================================================================

mod comments {
    use super::*;

    #[test]
    fn comment_then_list_in_order() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Fix the header");
        let id = task["id"].as_str().unwrap();

        cmd(&dir).arg("comment").arg(id).arg("first note").assert().success();
        cmd(&dir).arg("comment").arg(id).arg("second note").assert().success();

        let out = json_cmd(&dir).arg("comments").arg(id).output().unwrap();
        assert!(out.status.success());
        let list: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["content"], "first note");
        assert_eq!(list[1]["content"], "second note");
    }
}

// =============================================================================
// Blocking, session binding, and resume
// =============================================================================

mod sessions_and_resume {
    use super::*;

    #[test]
    fn block_moves_task_to_need_input_and_attaches_comment() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Integrate payments");
        let id = task["id"].as_str().unwrap();

        let out = json_cmd(&dir)
            .arg("block")
            .arg(id)
            .arg("Which payment provider should I use?")
            .output()
            .unwrap();
        assert!(out.status.success());
        let blocked: Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(blocked["column"], "need_input");

        let out = json_cmd(&dir).arg("comments").arg(id).output().unwrap();
        let list: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
        assert!(list.iter().any(|c| c["content"] == "Which payment provider should I use?"));
    }

    #[test]
    fn session_link_show_history_unlink() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Integrate payments");
        let id = task["id"].as_str().unwrap();

        cmd(&dir)
            .arg("session")
            .arg("link")
            .arg(id)
            .arg("--tool")
            .arg("opencode")
            .arg("--ref")
            .arg("sess_abc123")
            .assert()
            .success();

        cmd(&dir)
            .arg("session")
            .arg("show")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("sess_abc123"));

        cmd(&dir)
            .arg("session")
            .arg("unlink")
            .arg(id)
            .assert()
            .success();

        cmd(&dir)
            .arg("session")
            .arg("history")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("sess_abc123"));
    }

    // Blocking a task with no session bound yields a printable resume
    // prompt rather than a spawn attempt.
    #[test]
    fn resume_without_exec_prints_a_command_instead_of_spawning() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Integrate payments");
        let id = task["id"].as_str().unwrap();

        json_cmd(&dir)
            .arg("block")
            .arg(id)
            .arg("Which payment provider should I use?")
            .assert()
            .success();
        cmd(&dir)
            .arg("comment")
            .arg(id)
            .arg("Use Stripe.")
            .assert()
            .success();

        cmd(&dir)
            .arg("resume")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("Use Stripe."));
    }

    // A second `session link` on the same task replaces the binding rather
    // than stacking a second active session.
    #[test]
    fn relinking_a_session_replaces_the_previous_binding() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        let task = add_task(&dir, board["id"].as_str().unwrap(), "Integrate payments");
        let id = task["id"].as_str().unwrap();

        cmd(&dir)
            .arg("session")
            .arg("link")
            .arg(id)
            .arg("--tool")
            .arg("opencode")
            .arg("--ref")
            .arg("sess_first")
            .assert()
            .success();
        cmd(&dir)
            .arg("session")
            .arg("link")
            .arg(id)
            .arg("--tool")
            .arg("opencode")
            .arg("--ref")
            .arg("sess_second")
            .assert()
            .success();

        cmd(&dir)
            .arg("session")
            .arg("show")
            .arg(id)
            .assert()
            .success()
            .stdout(predicate::str::contains("sess_second"))
            .stdout(predicate::str::contains("sess_first").not());

        // The superseded session still shows up in history, most recent first.
        let out = json_cmd(&dir).arg("session").arg("history").arg(id).output().unwrap();
        let history: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["external_ref"], "sess_second");
        assert_eq!(history[1]["external_ref"], "sess_first");
    }
}

// =============================================================================
// Ambiguous references
// =============================================================================

mod resolution {
    use super::*;

    #[test]
    fn not_found_reference_exits_nonzero() {
        let dir = project();
        create_board(&dir, "Website", "WEB");

        // `resolver.rs`'s own unit tests note that forcing a genuine
        // `Ambiguous` result needs two opaque ids sharing a random 4-char
        // prefix, which isn't reproducible without controlling id
        // generation; that case is exercised at the store layer instead.
        // Here we confirm the CLI surfaces the deterministic `NotFound`
        // case with the documented exit code.
        cmd(&dir).arg("show").arg("abc").assert().failure().code(1);
        cmd(&dir).arg("show").arg("nonexistent-ref").assert().failure().code(1);
    }
}

// =============================================================================
// Export / import
// =============================================================================

mod export_import {
    use super::*;

    #[test]
    fn export_then_import_merge_round_trips_a_board() {
        let src = project();
        let board = create_board(&src, "Website", "WEB");
        let board_id = board["id"].as_str().unwrap();
        add_task(&src, board_id, "Fix the header");
        add_task(&src, board_id, "Integrate payments");

        let export_path = src.path().join("snapshot.json");
        cmd(&src)
            .arg("export")
            .arg("--output")
            .arg(&export_path)
            .assert()
            .success();
        assert!(export_path.exists());

        let dst = project();
        cmd(&dst).arg("import").arg(&export_path).assert().success();

        cmd(&dst)
            .arg("list")
            .arg("--board")
            .arg(board_id)
            .assert()
            .success()
            .stdout(predicate::str::contains("Fix the header"))
            .stdout(predicate::str::contains("Integrate payments"));
    }

    #[test]
    fn import_dry_run_reports_without_writing() {
        let src = project();
        let board = create_board(&src, "Website", "WEB");
        add_task(&src, board["id"].as_str().unwrap(), "Fix the header");

        let export_path = src.path().join("snapshot.json");
        cmd(&src).arg("export").arg("--output").arg(&export_path).assert().success();

        let dst = project();
        cmd(&dst)
            .arg("import")
            .arg(&export_path)
            .arg("--dry-run")
            .assert()
            .success();

        // Nothing should have actually landed in the fresh project's store.
        cmd(&dst)
            .arg("board")
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("WEB").not());
    }

    #[test]
    fn export_succeeds_when_health_probe_falls_back_to_direct() {
        // Without --direct, `Backend::resolve` still falls back to the
        // direct store once the `/api/health` probe finds nothing
        // listening, so export works even though no flag forces it.
        let dir = project();
        create_board(&dir, "Website", "WEB");
        let export_path = dir.path().join("snapshot.json");

        let mut c = egenskriven();
        c.current_dir(dir.path())
            .arg("--project-dir")
            .arg(dir.path())
            .arg("export")
            .arg("--output")
            .arg(&export_path);
        c.assert().success();
        assert!(export_path.exists());
    }
}

// =============================================================================
// Global flags
// =============================================================================

mod global_flags {
    use super::*;

    #[test]
    fn json_flag_emits_parseable_json_for_list() {
        let dir = project();
        let board = create_board(&dir, "Website", "WEB");
        add_task(&dir, board["id"].as_str().unwrap(), "Fix the header");

        let out = json_cmd(&dir).arg("list").output().unwrap();
        assert!(out.status.success());
        let tasks: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn verbose_flag_is_accepted() {
        let dir = project();
        create_board(&dir, "Website", "WEB");

        egenskriven()
            .current_dir(dir.path())
            .arg("--project-dir")
            .arg(dir.path())
            .arg("--direct")
            .arg("--verbose")
            .arg("board")
            .arg("list")
            .assert()
            .success();
    }
}
