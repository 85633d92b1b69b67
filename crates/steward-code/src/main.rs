//! Terminal coding agent built on the steward core.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Interactive mode
//! steward-code --workdir /path/to/project
//!
//! # One-shot mode
//! steward-code --prompt "Add error handling to src/main.rs"
//!
//! # Debug logging from the core
//! steward-code --verbose --prompt "Run the tests"
//! RUST_LOG=steward=trace steward-code
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use steward::prelude::*;
use steward_code::command::{self, Command, HELP};
use steward_code::console::{ConsoleHandler, format_budget, turn_json};
use steward_code::CodeConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Terminal coding agent built on the steward core.
#[derive(Parser)]
#[command(name = "steward-code")]
struct Cli {
    /// Run a single turn with this prompt and exit. Without it, reads turns
    /// from stdin.
    #[arg(long)]
    prompt: Option<String>,

    /// Model to use for completions.
    #[arg(long)]
    model: Option<String>,

    /// Project directory. Every operation is confined to it.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Maximum model calls per turn.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Maximum tokens per model response.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// TOML config file. Defaults to `steward.toml` in the workdir, if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the undo log and summaries, relative to the workdir.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Print the turn result, including the operation trace, as JSON
    /// (one-shot mode).
    #[arg(long)]
    json: bool,

    /// Log core activity at debug level.
    #[arg(long, short)]
    verbose: bool,
}

/// Dev diagnostics to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,steward=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let workdir = std::fs::canonicalize(&cli.workdir).unwrap_or_else(|_| cli.workdir.clone());
    let code_config = CodeConfig {
        workdir: workdir.clone(),
        config_file: cli.config,
        model: cli.model,
        max_iterations: cli.max_iterations,
        max_tokens: cli.max_tokens,
        temperature: cli.temperature,
        state_dir: cli.state_dir,
    };
    let config = match code_config.build_orchestrator_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    debug!(
        "Config: model={} max_iterations={} context={} tokens state_dir={:?}",
        config.model,
        config.max_iterations,
        config.context.max_context_tokens,
        config.storage.state_dir
    );

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            process::exit(1);
        }
    };
    let client = match OpenRouterClient::with_headers(
        api_key,
        "https://github.com/steward-rs/steward",
        "steward-code",
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            process::exit(1);
        }
    };

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(ConsoleHandler);
    let mut orchestrator = match Orchestrator::new(&client, &workdir, config) {
        Ok(o) => o.with_event_handler(&handler),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match cli.prompt {
        Some(prompt) => {
            let ok = run_turn(&mut orchestrator, &prompt, cli.json).await;
            orchestrator.end_session();
            if !ok {
                process::exit(1);
            }
        }
        None => interactive(&mut orchestrator).await,
    }
}

/// Run one turn with Ctrl-C wired to its cancellation token. Returns whether
/// the turn produced an answer.
async fn run_turn(orchestrator: &mut Orchestrator<'_>, input: &str, json: bool) -> bool {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = orchestrator.submit_turn_cancellable(input, &cancel).await;
    watcher.abort();

    match result {
        Ok(r) if json => {
            println!("{:#}", turn_json(&r));
            true
        }
        Ok(r) => {
            if !r.answer.is_empty() {
                println!("{}", r.answer);
            }
            let failures = r.failures().count();
            if failures > 0 {
                eprintln!("  {failures} operation(s) did not commit");
            }
            eprintln!("  {}", format_budget(&r.budget));
            true
        }
        Err(e) => {
            eprintln!("Error: {e}");
            let committed = e.trace().iter().filter(|t| t.is_success()).count();
            if committed > 0 {
                eprintln!("  {committed} operation(s) committed before the turn stopped");
            }
            if e.is_retryable() {
                eprintln!("  (temporary; try again shortly)");
            }
            false
        }
    }
}

async fn interactive(orchestrator: &mut Orchestrator<'_>) {
    eprintln!(
        "steward-code in {} (session {}). Type :help for commands.",
        orchestrator.workspace_root().display(),
        orchestrator.session_id()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        match command::parse(&line) {
            Ok(Command::Turn(input)) => {
                run_turn(orchestrator, &input, false).await;
            }
            Ok(Command::Undo(id)) => match orchestrator.undo(id) {
                Ok(entry) => eprintln!("restored {}", entry.path.display()),
                Err(e) => eprintln!("Error: {e}"),
            },
            Ok(Command::UndoLog) => {
                let entries = orchestrator.undo_log();
                if entries.is_empty() {
                    eprintln!("nothing to undo");
                }
                for entry in entries {
                    eprintln!(
                        "  {:>4}  {}  ({} bytes, {})",
                        entry.id,
                        entry.path.display(),
                        entry.size,
                        entry.deleted_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            Ok(Command::Status) => eprintln!("{}", format_budget(&orchestrator.budget_status())),
            Ok(Command::New) => match orchestrator.new_session() {
                Ok(id) => eprintln!("new session {id}"),
                Err(e) => eprintln!("Error: {e}"),
            },
            Ok(Command::Help) => eprintln!("{HELP}"),
            Ok(Command::Quit) => break,
            Ok(Command::Empty) => {}
            Err(msg) => eprintln!("{msg}"),
        }
    }

    orchestrator.end_session();
}
