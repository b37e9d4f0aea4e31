//! Command-line runner and inspector for stackheap agents.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Other
//! settings come from `STACKHEAP_*` variables and the flags below.
//!
//! ```sh
//! # Run ten cycles against the saved session
//! stackheap run --max-turns 10
//!
//! # Inspect the session
//! stackheap tasks
//! stackheap note show
//! stackheap logs --lines 40
//! ```

mod stdin;

use std::path::{Path, PathBuf};
use std::result::Result;

use clap::{Parser, Subcommand};
use stackheap::prelude::*;
use stackheap::context::note_path_for;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::stdin::StdinUser;

/// Stack-and-heap context manager for long-running agents.
#[derive(Parser)]
#[command(name = "stackheap", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run agent cycles, saving after each one.
    Run {
        /// Session file. Defaults to STACKHEAP_STATE_PATH or logs/conversation.json.
        #[arg(long)]
        state_path: Option<PathBuf>,

        /// Number of cycles to run.
        #[arg(long, default_value_t = 10)]
        max_turns: u32,

        /// Wait for Enter before each cycle.
        #[arg(long)]
        step: bool,

        /// Print the next request instead of calling the model.
        #[arg(long)]
        dry_run: bool,

        /// Model to use for completions.
        #[arg(long)]
        model: Option<String>,

        /// File with a character description placed ahead of the system prompt.
        #[arg(long)]
        persona: Option<PathBuf>,
    },
    /// Show the frame stack.
    Tasks {
        #[arg(long)]
        state_path: Option<PathBuf>,
    },
    /// Show or export the note.
    Note {
        #[arg(long)]
        state_path: Option<PathBuf>,

        #[command(subcommand)]
        action: NoteAction,
    },
    /// Print the last turns of the saved transcript.
    Logs {
        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
}

#[derive(Subcommand)]
enum NoteAction {
    /// Print the note.
    Show,
    /// Write the note to a file.
    Dump { out: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stackheap=info")),
        )
        .init();

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run {
            state_path,
            max_turns,
            step,
            dry_run,
            model,
            persona,
        } => {
            let mut config = config;
            if let Some(path) = state_path {
                config = config.with_state_path(path);
            }
            if let Some(model) = model {
                config = config.with_model(model);
            }
            if let Some(path) = persona {
                match std::fs::read_to_string(&path) {
                    Ok(text) => config = config.with_persona(text),
                    Err(e) => {
                        eprintln!("Error: cannot read persona {}: {e}", path.display());
                        std::process::exit(1);
                    }
                }
            }
            run(config, max_turns, step, dry_run).await
        }
        Command::Tasks { state_path } => {
            load(&state_path.unwrap_or(config.state_path)).map(|cm| print_tasks(&cm))
        }
        Command::Note { state_path, action } => {
            note(&state_path.unwrap_or(config.state_path), action)
        }
        Command::Logs { path, lines } => {
            load(&path.unwrap_or(config.state_path)).map(|cm| print_logs(&cm, lines))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(
    config: AgentConfig,
    max_turns: u32,
    step: bool,
    dry_run: bool,
) -> Result<(), RunError> {
    let mut cm = ContextManager::load_or_new(&config.state_path, config.note_template.clone())?;

    if dry_run {
        let backend = DryRun;
        let runner = Runner::new(&backend, &StdinUser, config);
        print_request(&runner.request_for(&cm));
        return Ok(());
    }

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            std::process::exit(1);
        }
    };
    let client = OpenRouterClient::with_headers(
        api_key,
        "https://github.com/tacryt-socryp/stackheap",
        "stackheap",
    )?
    .with_retry(config.retry.clone());

    let user = StdinUser;
    let events = LoggingHandler;
    let mut runner = Runner::new(&client, &user, config).with_event_handler(&events);

    if !step {
        runner.run(&mut cm, max_turns).await?;
        return Ok(());
    }

    for cycle in 1..=max_turns {
        eprint!("[cycle {cycle}/{max_turns}] press Enter to continue, Ctrl-D to stop ");
        let proceed = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|n| n > 0).unwrap_or(false)
        })
        .await
        .unwrap_or(false);
        if !proceed {
            break;
        }
        runner.run_cycle(&mut cm).await?;
        runner.save(&cm)?;
    }
    Ok(())
}

fn load(path: &Path) -> Result<ContextManager, RunError> {
    Ok(ContextManager::load(path)?)
}

fn note(state_path: &Path, action: NoteAction) -> Result<(), RunError> {
    // Fall back to the note copy when the state file is gone.
    let text = match ContextManager::load(state_path) {
        Ok(cm) => cm.note().text().to_string(),
        Err(StackError::Io(_)) => std::fs::read_to_string(note_path_for(state_path))
            .map_err(StackError::from)?,
        Err(e) => return Err(e.into()),
    };
    match action {
        NoteAction::Show => println!("{text}"),
        NoteAction::Dump { out } => {
            std::fs::write(&out, &text).map_err(StackError::from)?;
            println!("Note written to {}", out.display());
        }
    }
    Ok(())
}

fn print_tasks(cm: &ContextManager) {
    println!("{:<5} {:<24} {:<14} {:>8}  GOAL", "DEPTH", "ID", "STAGE", "MESSAGES");
    for (depth, frame) in cm.stack().frames().iter().enumerate() {
        println!(
            "{:<5} {:<24} {:<14} {:>8}  {}",
            depth + 1,
            frame.id,
            frame.stage.as_str(),
            frame.messages.len(),
            frame.goal
        );
    }
    println!("\nCurrent stage: {}", cm.stage());
}

fn print_logs(cm: &ContextManager, lines: usize) {
    for entry in log_tail(cm, lines) {
        println!("{entry}");
    }
}

/// The last `lines` turns of the transcript, one entry per turn.
fn log_tail(cm: &ContextManager, lines: usize) -> Vec<String> {
    let history = cm.history();
    history
        .iter()
        .skip(history.len().saturating_sub(lines))
        .map(|turn| {
            let body = match turn {
                Turn::Message { content, .. } | Turn::Reasoning { content } => content.as_str(),
                Turn::ToolCall { arguments, .. } => arguments.as_str(),
                Turn::ToolResult { output, .. } => output.as_str(),
            };
            format!("[{}] {}", turn.label(), body.replace('\n', "\n    "))
        })
        .collect()
}

fn print_request(request: &ModelRequest) {
    println!("=== model: {} ===", request.model);
    println!("=== system ===\n{}", request.system);
    for turn in &request.turns {
        println!("=== {} ===", turn.label());
        match turn {
            Turn::Message { content, .. } | Turn::Reasoning { content } => println!("{content}"),
            Turn::ToolCall { arguments, .. } => println!("{arguments}"),
            Turn::ToolResult { output, .. } => println!("{output}"),
        }
    }
    let names: Vec<_> = request.tools.iter().map(|t| t.function.name.as_str()).collect();
    println!("=== tools: {} ===", names.join(", "));
    match serde_json::to_string_pretty(&request.tools) {
        Ok(json) => tracing::debug!("Tool definitions:\n{json}"),
        Err(e) => tracing::warn!("Failed to serialize tool definitions: {e}"),
    }
}

/// Backend for `--dry-run`; the request is printed and never sent.
struct DryRun;

impl ModelBackend for DryRun {
    fn complete<'a>(&'a self, _request: &'a ModelRequest) -> stackheap::api::CompletionFuture<'a> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
