use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use thesisboard_core::command::{CommandEffect, StoreCommand};
use thesisboard_core::config::{
    find_config_root, resolve_defaults_path, resolve_storage_key, resolve_store_dir,
};
use thesisboard_core::defaults::DefaultSchema;
use thesisboard_core::storage::FileStore;
use thesisboard_core::store::{Outcome, SubtaskRow, TaskStore};

mod render;
mod version;

#[derive(Parser)]
#[command(name = "thesisboard", version, about = "Thesis deliverable progress tracker")]
struct Cli {
    /// Directory holding the stored progress record
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Default catalog to reconcile against (.json, .yaml or .yml)
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,
    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Overall and per-deliverable progress
    Status,
    /// Task groups of one deliverable
    Show {
        deliverable: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Mark a subtask done (or not done with --undone)
    Toggle {
        deliverable: String,
        group: String,
        subtask: String,
        #[arg(long)]
        undone: bool,
    },
    /// Replace a group's title, subtasks and artifacts
    Edit {
        deliverable: String,
        group: String,
        #[arg(long)]
        title: Option<String>,
        /// `ID::TEXT` keeps an existing subtask, plain `TEXT` adds a new one
        #[arg(long = "subtask")]
        subtasks: Vec<String>,
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
        #[arg(long)]
        clear_subtasks: bool,
        #[arg(long)]
        clear_artifacts: bool,
    },
    /// Append a new empty task group
    AddGroup { deliverable: String, title: String },
    /// Delete a task group and its subtasks
    RemoveGroup { deliverable: String, group: String },
    /// Overwrite a group's private notes
    Notes {
        deliverable: String,
        group: String,
        text: String,
    },
    /// Inspect the default catalog
    Defaults {
        #[command(subcommand)]
        command: DefaultsCommand,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum DefaultsCommand {
    /// Check the catalog for duplicate ids and empty entries
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if let Command::Version = command {
        println!("thesisboard {}", version::FULL);
        return Ok(());
    }

    let cwd = std::env::current_dir().context("resolve working directory")?;
    let project_root = find_config_root(&cwd);
    let defaults = load_defaults(cli.defaults.as_deref(), project_root.as_deref())?;

    match command {
        Command::Defaults {
            command: DefaultsCommand::Validate,
        } => validate_defaults(&defaults, cli.json),
        command => {
            let store_dir = match cli.root {
                Some(root) => root,
                None => resolve_store_dir(project_root.as_deref())
                    .map(|resolved| resolved.value)
                    .ok_or_else(|| {
                        anyhow!("Unable to resolve a store directory; pass --root or set THESISBOARD_HOME")
                    })?,
            };
            let key = resolve_storage_key(project_root.as_deref()).value;
            let mut store = TaskStore::load_with_key(FileStore::new(store_dir), defaults, &key);
            run(&mut store, command, cli.json)
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("THESISBOARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_defaults(explicit: Option<&Path>, project_root: Option<&Path>) -> Result<DefaultSchema> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| resolve_defaults_path(project_root).map(|resolved| resolved.value));
    match path {
        Some(path) => DefaultSchema::from_path(&path)
            .with_context(|| format!("load default catalog {}", path.display())),
        None => DefaultSchema::builtin().context("load built-in catalog"),
    }
}

fn validate_defaults(defaults: &DefaultSchema, as_json: bool) -> Result<()> {
    let result = defaults.validate();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for error in &result.errors {
            println!("error: {}", error);
        }
        for warning in &result.warnings {
            println!("warning: {}", warning);
        }
        if result.is_ok() {
            println!("catalog ok");
        }
    }
    if !result.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn run(store: &mut TaskStore<FileStore>, command: Command, as_json: bool) -> Result<()> {
    let store_command = match command {
        Command::Status => {
            let report = store.report();
            if as_json {
                let payload = json!({
                    "report": report,
                    "load": store.load_report(),
                    "notices": store.notices(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for line in render::status_lines(&report) {
                    println!("{}", line);
                }
            }
            return Ok(());
        }
        Command::Show { deliverable, group } => {
            return show(store, &deliverable, group.as_deref(), as_json);
        }
        Command::Toggle {
            deliverable,
            group,
            subtask,
            undone,
        } => StoreCommand::ToggleSubtask {
            deliverable,
            group,
            subtask,
            completed: !undone,
        },
        Command::Edit {
            deliverable,
            group,
            title,
            subtasks,
            artifacts,
            clear_subtasks,
            clear_artifacts,
        } => {
            let current = store
                .group(&deliverable, &group)
                .ok_or_else(|| anyhow!("{}/{}: unknown task group", deliverable, group))?;
            let rows = if clear_subtasks || !subtasks.is_empty() {
                subtasks.iter().map(|row| parse_subtask_row(row)).collect()
            } else {
                current
                    .subtasks
                    .iter()
                    .map(|subtask| SubtaskRow::existing(subtask.id.clone(), subtask.text.clone()))
                    .collect()
            };
            let artifacts = if clear_artifacts || !artifacts.is_empty() {
                artifacts
            } else {
                current
                    .artifacts
                    .iter()
                    .map(|artifact| artifact.text.clone())
                    .collect()
            };
            StoreCommand::ReplaceGroupContents {
                title: title.unwrap_or_else(|| current.text.clone()),
                deliverable,
                group,
                subtasks: rows,
                artifacts,
            }
        }
        Command::AddGroup { deliverable, title } => StoreCommand::AddGroup { deliverable, title },
        Command::RemoveGroup { deliverable, group } => {
            StoreCommand::RemoveGroup { deliverable, group }
        }
        Command::Notes {
            deliverable,
            group,
            text,
        } => StoreCommand::SetUserNotes {
            deliverable,
            group,
            text,
        },
        Command::Defaults { .. } | Command::Version => unreachable!("handled before loading"),
    };

    let name = store_command.name();
    match store.apply(store_command) {
        Outcome::Applied(effect) => {
            if as_json {
                let payload = json!({
                    "ok": true,
                    "command": name,
                    "result": effect,
                    "notices": store.notices(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                match &effect {
                    CommandEffect::Progress(update) => println!("{}", render::update_line(update)),
                    CommandEffect::NotesSaved { .. } => println!("notes saved"),
                }
            }
            Ok(())
        }
        Outcome::Skipped(reason) => {
            if as_json {
                let payload = json!({ "ok": false, "command": name, "reason": reason });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                std::process::exit(1);
            }
            Err(anyhow!("{} skipped: {}", name, reason.describe()))
        }
    }
}

fn show(
    store: &TaskStore<FileStore>,
    deliverable: &str,
    group: Option<&str>,
    as_json: bool,
) -> Result<()> {
    let groups = store
        .deliverable(deliverable)
        .ok_or_else(|| anyhow!("{}: unknown deliverable", deliverable))?;
    let selected: Vec<_> = match group {
        Some(id) => {
            let found = groups
                .iter()
                .find(|g| g.id == id)
                .ok_or_else(|| anyhow!("{}/{}: unknown task group", deliverable, id))?;
            vec![found]
        }
        None => groups.iter().collect(),
    };
    if as_json {
        println!("{}", serde_json::to_string_pretty(&selected)?);
        return Ok(());
    }
    for group in selected {
        for line in render::group_lines(group) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// `ID::TEXT` edits an existing subtask; anything else is a new one.
fn parse_subtask_row(row: &str) -> SubtaskRow {
    match row.split_once("::") {
        Some((id, text)) if !id.trim().is_empty() => SubtaskRow::existing(id.trim(), text),
        Some((_, text)) => SubtaskRow::fresh(text),
        None => SubtaskRow::fresh(row),
    }
}
