use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use egenskriven::cli::backend::Backend;
use egenskriven::config::{Config, ConfigOverrides};
use egenskriven::errors::CliError;
use egenskriven::export::{self, ImportStrategy};
use egenskriven::http::{self, ServerConfig};
use egenskriven::store::models::{AgentTool, Priority, ResumeMode, SessionStatus, Task, TaskType};
use egenskriven::store::tasks::{ListFilter, NewTask, TaskUpdate};

#[derive(Parser)]
#[command(name = "egenskriven")]
#[command(version, about = "A local-first kanban task manager with a human-AI collaborative control plane")]
struct Cli {
    /// Project root; defaults to the current directory. Holds
    /// `.egenskriven/config.toml` and (unless overridden) the data directory.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Skip the `/api/health` probe and open the on-disk store directly,
    /// even if a server is running.
    #[arg(long, global = true)]
    direct: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of a human-readable summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task on a board.
    Add {
        board: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        column: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "blocked-by")]
        blocked_by: Vec<String>,
        #[arg(long)]
        due: Option<DateTime<Utc>>,
    },
    /// List tasks, optionally filtered.
    List {
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        column: Option<String>,
        #[arg(long)]
        need_input: bool,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show a single task.
    Show { task: String },
    /// Move a task to a column.
    Move {
        task: String,
        column: String,
        #[arg(long)]
        position: Option<f64>,
    },
    /// Update a task's mutable fields.
    Update {
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        clear_epic: bool,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "blocked-by")]
        blocked_by: Vec<String>,
        #[arg(long)]
        due: Option<DateTime<Utc>>,
        #[arg(long)]
        clear_due: bool,
        /// Move the task to a different board (id, prefix, or name);
        /// reallocates its display id on the destination board.
        #[arg(long)]
        board: Option<String>,
    },
    /// Delete a task.
    Delete { task: String },
    /// Move a task to `need_input` and attach the blocking question.
    Block { task: String, question: String },
    /// Append a comment to a task's thread.
    Comment { task: String, content: String },
    /// List a task's comments in order.
    Comments { task: String },
    /// Inspect or change a task's agent session binding.
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Build the resume prompt for a task, optionally spawning the tool.
    Resume {
        task: String,
        /// Spawn the linked tool instead of printing the command.
        #[arg(long)]
        exec: bool,
        /// Use the trimmed prompt variant (drops priority, keeps only the
        /// last human comment).
        #[arg(long)]
        minimal: bool,
    },
    /// Create, inspect, or list boards.
    Board {
        #[command(subcommand)]
        command: BoardCommands,
    },
    /// Snapshot the whole database, or one board, to a JSON document.
    Export {
        #[arg(long)]
        board: Option<String>,
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Apply a JSON export document produced by `export`.
    Import {
        file: PathBuf,
        #[arg(long, default_value = "merge")]
        strategy: String,
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the HTTP API: collection CRUD, workflow verbs, realtime feed.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Relax CORS for a locally-run UI dev server.
        #[arg(long)]
        dev: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Bind a task to a running (or resumable) agent session.
    Link {
        task: String,
        #[arg(long)]
        tool: String,
        #[arg(long = "ref")]
        reference: String,
        #[arg(long)]
        working_dir: Option<String>,
    },
    /// Show a task's current binding, if any.
    Show { task: String },
    /// List every session ever bound to a task, most recent first.
    History { task: String },
    /// Clear a task's current binding, archiving it with a terminal status.
    Unlink {
        task: String,
        #[arg(long, default_value = "completed")]
        status: String,
    },
}

#[derive(Subcommand)]
enum BoardCommands {
    /// Create a board.
    Create {
        name: String,
        prefix: String,
        #[arg(long = "column")]
        columns: Vec<String>,
        #[arg(long)]
        color: Option<String>,
        /// Defaults to the config file's `board_defaults.resume_mode` when absent.
        #[arg(long)]
        resume_mode: Option<String>,
    },
    /// Update a board's mutable fields.
    Update {
        board: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "column")]
        columns: Vec<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        clear_color: bool,
        #[arg(long)]
        resume_mode: Option<String>,
    },
    /// Show a single board.
    Show { board: String },
    /// List every board.
    List,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let project_dir = cli.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let config = Config::load(
        &project_dir,
        ConfigOverrides {
            verbose: Some(cli.verbose),
            ..Default::default()
        },
    )
    .map_err(CliError::Other)?;

    if let Commands::Serve { port, dev } = &cli.command {
        let server_config = ServerConfig {
            port: port.unwrap_or(config.server_port),
            db_path: config.db_path(),
            dev_mode: *dev,
        };
        std::fs::create_dir_all(&config.data_dir).map_err(|e| CliError::Other(e.into()))?;
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }))
            .init();
        http::serve(server_config, egenskriven::broadcast::Bus::new())
            .await
            .map_err(CliError::Other)?;
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir).map_err(|e| CliError::Other(e.into()))?;
    let base_url = format!("http://127.0.0.1:{}", config.server_port);
    let backend = Backend::resolve(&config.db_path(), &base_url, cli.direct, cli.verbose).await?;

    match cli.command {
        Commands::Add {
            board,
            title,
            description,
            task_type,
            priority,
            column,
            epic,
            parent,
            labels,
            blocked_by,
            due,
        } => {
            let new = NewTask {
                title,
                description: description.unwrap_or_default(),
                task_type: parse_opt(task_type, TaskType::from_str)?.unwrap_or_default(),
                priority: parse_opt(priority, Priority::from_str)?.unwrap_or_default(),
                column,
                epic,
                parent,
                labels,
                blocked_by,
                due_date: due,
                created_by: egenskriven::store::models::CreatedBy::Cli,
                created_by_agent: None,
            };
            let task = backend.create_task(&board, new).await?;
            print_task(&task, cli.json);
        }
        Commands::List {
            board,
            column,
            need_input,
            task_type,
            priority,
            label,
            epic,
            parent,
            search,
            limit,
            offset,
        } => {
            let filter = ListFilter {
                board,
                column,
                need_input,
                task_type: parse_opt(task_type, TaskType::from_str)?,
                priority: parse_opt(priority, Priority::from_str)?,
                label,
                epic,
                parent,
                search,
                limit,
                offset,
                ..Default::default()
            };
            let tasks = backend.list_tasks(&filter).await?;
            print_tasks(&tasks, cli.json);
        }
        Commands::Show { task } => {
            let task = backend.show_task(&task).await?;
            print_task(&task, cli.json);
        }
        Commands::Move { task, column, position } => {
            let task = backend.move_task(&task, &column, position).await?;
            print_task(&task, cli.json);
        }
        Commands::Update {
            task,
            title,
            description,
            task_type,
            priority,
            epic,
            clear_epic,
            labels,
            blocked_by,
            due,
            clear_due,
            board,
        } => {
            let fields = TaskUpdate {
                title,
                description,
                task_type: parse_opt(task_type, TaskType::from_str)?,
                priority: parse_opt(priority, Priority::from_str)?,
                epic: if clear_epic { Some(None) } else { epic.map(Some) },
                labels: if labels.is_empty() { None } else { Some(labels) },
                blocked_by: if blocked_by.is_empty() { None } else { Some(blocked_by) },
                due_date: if clear_due { Some(None) } else { due.map(Some) },
                board,
            };
            let task = backend.update_task(&task, fields).await?;
            print_task(&task, cli.json);
        }
        Commands::Delete { task } => {
            backend.delete_task(&task).await?;
            println!("deleted {task}");
        }
        Commands::Block { task, question } => {
            let task = backend.block(&task, &question).await?;
            print_task(&task, cli.json);
        }
        Commands::Comment { task, content } => {
            let comment = backend.comment(&task, &content).await?;
            print_json_or(&comment, cli.json, || println!("comment {} added to {task}", comment.id));
        }
        Commands::Comments { task } => {
            let comments = backend.list_comments(&task).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&comments).expect("serializes"));
            } else {
                for comment in &comments {
                    println!("[{}] {}: {}", comment.created.format("%Y-%m-%d %H:%M"), comment.author_type.as_str(), comment.content);
                }
            }
        }
        Commands::Session { command } => run_session(&backend, command, cli.json).await?,
        Commands::Resume { task, exec, minimal } => {
            let outcome = backend.resume(&task, exec, minimal).await?;
            match outcome {
                egenskriven::workflow::ResumeOutcome::Printable(cmd) => println!("{cmd}"),
                egenskriven::workflow::ResumeOutcome::Executed(task) => print_task(&task, cli.json),
            }
        }
        Commands::Board { command } => run_board(&backend, command, cli.json, config.board_default_resume_mode).await?,
        Commands::Export { board, output } => {
            let store = backend
                .store()
                .ok_or_else(|| CliError::User("export requires --direct; there is no network route".into()))?;
            let doc = export::export(store, board.as_deref()).map_err(egenskriven::errors::WorkflowError::from)?;
            let text = serde_json::to_string_pretty(&doc).expect("export document serializes");
            match output {
                Some(path) => std::fs::write(&path, text).map_err(|e| CliError::Other(e.into()))?,
                None => println!("{text}"),
            }
        }
        Commands::Import { file, strategy, dry_run } => {
            let store = backend
                .store()
                .ok_or_else(|| CliError::User("import requires --direct; there is no network route".into()))?;
            let text = std::fs::read_to_string(&file).map_err(|e| CliError::Other(e.into()))?;
            let doc = serde_json::from_str(&text)
                .map_err(|e| CliError::User(format!("malformed export document: {e}")))?;
            let strategy = ImportStrategy::from_str(&strategy).map_err(egenskriven::errors::WorkflowError::from)?;
            let report =
                export::import(store, &doc, strategy, dry_run).map_err(egenskriven::errors::WorkflowError::from)?;
            println!("{}", serde_json::to_string_pretty(&report).expect("report serializes"));
        }
        Commands::Serve { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_session(backend: &Backend, command: SessionCommands, json: bool) -> Result<(), CliError> {
    match command {
        SessionCommands::Link { task, tool, reference, working_dir } => {
            let tool = AgentTool::from_str(&tool).map_err(CliError::User)?;
            let task = backend.session_link(&task, tool, &reference, working_dir.as_deref()).await?;
            print_task(&task, json);
        }
        SessionCommands::Show { task } => {
            let value = backend.session_show(&task).await?;
            println!("{}", serde_json::to_string_pretty(&value).expect("session serializes"));
        }
        SessionCommands::History { task } => {
            let history = backend.session_history(&task).await?;
            println!("{}", serde_json::to_string_pretty(&history).expect("history serializes"));
        }
        SessionCommands::Unlink { task, status } => {
            let status = SessionStatus::from_str(&status).map_err(CliError::User)?;
            let task = backend.session_unlink(&task, status).await?;
            print_task(&task, json);
        }
    }
    Ok(())
}

async fn run_board(
    backend: &Backend,
    command: BoardCommands,
    json: bool,
    default_resume_mode: ResumeMode,
) -> Result<(), CliError> {
    match command {
        BoardCommands::Create { name, prefix, columns, color, resume_mode } => {
            let resume_mode = match resume_mode {
                Some(s) => ResumeMode::from_str(&s).map_err(CliError::User)?,
                None => default_resume_mode,
            };
            let board = backend.board_create(&name, &prefix, columns, color, resume_mode).await?;
            print_json_or(&board, json, || println!("created board {} ({})", board.name, board.id));
        }
        BoardCommands::Update { board, name, columns, color, clear_color, resume_mode } => {
            let resume_mode = parse_opt(resume_mode, ResumeMode::from_str)?;
            let color = if clear_color { Some(None) } else { color.map(Some) };
            let columns = if columns.is_empty() { None } else { Some(columns) };
            let board = backend.board_update(&board, name.as_deref(), columns, color, resume_mode).await?;
            print_json_or(&board, json, || println!("updated board {} ({})", board.name, board.id));
        }
        BoardCommands::Show { board } => {
            let board = backend.board_show(&board).await?;
            println!("{}", serde_json::to_string_pretty(&board).expect("board serializes"));
        }
        BoardCommands::List => {
            let boards = backend.board_list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&boards).expect("boards serialize"));
            } else {
                for board in &boards {
                    println!("{:<10} {:<30} {}", board.prefix, board.name, board.id);
                }
            }
        }
    }
    Ok(())
}

fn parse_opt<T>(value: Option<String>, parse: impl Fn(&str) -> Result<T, String>) -> Result<Option<T>, CliError> {
    value.map(|v| parse(&v)).transpose().map_err(CliError::User)
}

fn print_task(task: &Task, json: bool) {
    print_json_or(task, json, || {
        println!(
            "{:<10} [{:<11}] {:<8} {} {}",
            task.display_id,
            task.column,
            task.priority.as_str(),
            task.title,
            if task.agent_session.is_some() { "(linked)" } else { "" },
        )
    });
}

fn print_tasks(tasks: &[Task], json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(tasks).expect("tasks serialize"));
        return;
    }
    for task in tasks {
        print_task(task, false);
    }
}

fn print_json_or<T: serde::Serialize>(value: &T, json: bool, human: impl FnOnce()) {
    if json {
        println!("{}", serde_json::to_string_pretty(value).expect("value serializes"));
    } else {
        human();
    }
}
