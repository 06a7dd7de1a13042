//! TaskRelay - delivers catalog tasks into a live chat log.
//!
//! # Commands
//!
//! - `taskrelay status`: Show the bound chat log and queue counts
//! - `taskrelay start <LOG>`: Bind a chat log (path or shorthand name)
//! - `taskrelay next`: Deliver the next task
//! - `taskrelay retry <TASK_ID>`: Retry a failed delivery
//! - `taskrelay reset`: Archive progress and start over
//! - `taskrelay shell`: Interactive session keeping the retry token in memory
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use taskrelay::catalog::Catalog;
use taskrelay::config::Config;
use taskrelay::injector::{BindError, Delivery, Injector};
use taskrelay::lifecycle::{LifecycleController, LifecycleError, RetryToken, Step};
use taskrelay::store::ProgressStore;
use taskrelay::utils::resolve_session_path;

/// Exit status when a delivery could not be verified.
const EXIT_DELIVERY_FAILED: i32 = 2;

/// TaskRelay - delivers catalog tasks into a live chat log.
///
/// Tracks progress through an ordered task catalog and injects the active
/// task into a chat log, verifying every write.
#[derive(Parser, Debug)]
#[command(name = "taskrelay")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TASKRELAY_DATA_DIR         Directory for catalog and progress files
    TASKRELAY_CATALOG          Catalog path (default: <data dir>/problems.jsonl)
    TASKRELAY_PROGRESS         Progress path (default: <data dir>/progress.json)
    TASKRELAY_CHATS_DIR        Chats directory for shorthand log names
    TASKRELAY_VERIFY_ATTEMPTS  Read-back attempts per injection (default: 5)
    TASKRELAY_VERIFY_STEP_MS   Backoff step in milliseconds (default: 100)
    RUST_LOG                   Log filter (default: info)

EXAMPLES:
    # Bind a chat log by shorthand name
    export TASKRELAY_CHATS_DIR=~/chats
    taskrelay start 'Alice - 2025-09-09@20h27m39s'

    # Deliver the next task
    taskrelay next

    # Retry the task named by a failed 'next'
    taskrelay retry two-sum
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Show the bound chat log, current task, and progress counts.
    Status,

    /// Bind a chat log and re-deliver any in-progress task into it.
    Start {
        /// Path to the chat log, or '<character> - <timestamp>' shorthand.
        log: String,
    },

    /// Deliver the next task; completes the current one on success.
    ///
    /// Exits with status 2 and prints the retry token if delivery fails.
    Next,

    /// Retry delivery of a task whose injection failed.
    Retry {
        /// Task id printed by the failed 'next'.
        task_id: String,
    },

    /// Archive the progress file and start over.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Interactive session with /start, /next, /retry, /status, /reset.
    Shell,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(
        catalog = %config.catalog_path.display(),
        progress = %config.progress_path.display(),
        "Configuration loaded"
    );

    let mut controller = open_controller(&config)?;

    match cli.command {
        Command::Status => {
            println!("{}", controller.status());
            Ok(())
        }
        Command::Start { log } => run_start(&mut controller, &config, &log),
        Command::Next => {
            let step = controller.advance()?;
            finish_step(&step)
        }
        Command::Retry { task_id } => {
            let token = RetryToken::parse(&task_id);
            let step = controller.retry(token.as_ref())?;
            finish_step(&step)
        }
        Command::Reset { yes } => run_reset(&mut controller, yes),
        Command::Shell => run_shell(&mut controller, &config),
    }
}

/// Loads the catalog and progress; failures here are fatal.
fn open_controller(config: &Config) -> Result<LifecycleController> {
    let catalog = Catalog::load(&config.catalog_path).context("Failed to load task catalog")?;

    if let Some(dir) = config.progress_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create progress directory {}", dir.display())
            })?;
        }
    }

    let store = ProgressStore::new(&config.progress_path);
    let injector = Injector::new(config.retry_policy());
    let controller = LifecycleController::open(catalog, store, injector).context(format!(
        "Failed to load progress from {}. Repair or remove the file and try again.",
        config.progress_path.display()
    ))?;

    info!(tasks = controller.catalog().len(), "TaskRelay ready");
    Ok(controller)
}

/// Runs the start command.
fn run_start(controller: &mut LifecycleController, config: &Config, input: &str) -> Result<()> {
    let path = resolve_session_path(input, config.chats_dir.as_deref())
        .ok_or_else(|| BindError::Unresolvable(input.trim().to_string()))?;
    if path.as_os_str() != input.trim() {
        println!("Resolved chat log: {}", path.display());
    }

    let started = controller.start(&path)?;
    println!("Session bound to: {}", started.path.display());

    if let Some((id, delivery)) = started.reinjected {
        match delivery {
            Delivery::Verified => println!("Re-delivered current task '{id}' into the new log."),
            Delivery::Unverified => {
                println!("Could not verify re-delivery of '{id}'; use 'next' when ready.")
            }
        }
    }
    Ok(())
}

/// Runs the reset command, asking for confirmation unless `yes`.
fn run_reset(controller: &mut LifecycleController, yes: bool) -> Result<()> {
    let confirmed = yes || confirm_reset()?;
    if !confirmed {
        eprintln!("Aborted.");
        return Ok(());
    }

    let reset = controller.reset(true)?;
    if let Some(backup) = &reset.backup {
        println!("Previous progress archived as: {}", backup.display());
    }
    println!(
        "Progress reset; {} tasks pending. Bind a chat log with 'start'.",
        reset.state.tasks.not_started.len()
    );
    Ok(())
}

fn confirm_reset() -> Result<bool> {
    eprint!("This archives and clears all progress. Type 'yes' to continue: ");
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

/// Prints the outcome of a step and exits non-zero if delivery failed.
fn finish_step(step: &Step) -> Result<()> {
    print_step(step);
    if step.retry_token().is_some() {
        std::process::exit(EXIT_DELIVERY_FAILED);
    }
    Ok(())
}

fn print_step(step: &Step) {
    match step {
        Step::Delivered { task, completed } => {
            if let Some(done) = completed {
                println!("Completed: {done}");
            }
            println!("Delivered: {task}");
        }
        Step::AllComplete { completed } => {
            if let Some(done) = completed {
                println!("Completed: {done}");
            }
            println!("All tasks complete.");
        }
        Step::Failed { retry } => {
            println!("Delivery of '{retry}' could not be verified; progress unchanged.");
            println!("Retry with: taskrelay retry {retry}");
        }
        Step::Stale { retry } => {
            println!("'{retry}' is no longer the next task; nothing delivered.");
        }
    }
}

/// Runs the interactive shell.
fn run_shell(controller: &mut LifecycleController, config: &Config) -> Result<()> {
    println!("TaskRelay shell. Type /help for commands.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending: Option<RetryToken> = None;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let (command, argument) = match line.trim().split_once(char::is_whitespace) {
            Some((command, rest)) => (command.to_lowercase(), rest.trim().to_string()),
            None => (line.trim().to_lowercase(), String::new()),
        };

        let outcome: Result<()> = match command.as_str() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => {
                println!("Commands: /start <log>, /next, /retry, /status, /reset, /exit");
                Ok(())
            }
            "/status" => {
                println!("{}", controller.status());
                if let Some(token) = &pending {
                    println!("Pending retry: {token}");
                }
                Ok(())
            }
            "/start" => {
                let input = if argument.is_empty() {
                    prompt_line(&mut lines, "Chat log path or shorthand: ")?
                } else {
                    argument
                };
                let result = run_start(controller, config, &input);
                if result.is_ok() {
                    pending = None;
                }
                result
            }
            "/next" => controller
                .advance()
                .map(|step| {
                    print_step(&step);
                    pending = step.retry_token().cloned();
                })
                .map_err(Into::into),
            "/retry" => controller
                .retry(pending.as_ref())
                .map(|step| {
                    print_step(&step);
                    if !matches!(step, Step::Stale { .. }) {
                        pending = step.retry_token().cloned();
                    }
                })
                .map_err(Into::into),
            "/reset" => {
                let answer = prompt_line(
                    &mut lines,
                    "This archives and clears all progress. Type 'yes' to continue: ",
                )?;
                if answer.eq_ignore_ascii_case("yes") {
                    pending = None;
                    run_reset(controller, true)
                } else {
                    println!("Cancelled.");
                    Ok(())
                }
            }
            other => {
                println!("Unknown command '{other}'. Type /help for commands.");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            report_shell_error(&e);
        }
    }

    println!("Bye.");
    Ok(())
}

fn prompt_line(lines: &mut impl Iterator<Item = io::Result<String>>, prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    Ok(lines.next().transpose()?.unwrap_or_default().trim().to_string())
}

/// Reports a failed shell command; the shell keeps running.
fn report_shell_error(error: &anyhow::Error) {
    match error.downcast_ref::<LifecycleError>() {
        Some(LifecycleError::NoActiveSession) => {
            println!("No chat log bound. Use /start first.");
        }
        Some(LifecycleError::NothingToRetry) => {
            println!("Nothing to retry. Use /next to deliver a task.");
        }
        _ => println!("Error: {error:#}"),
    }
}

/// Initializes logging to stderr so stdout stays command output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_with_shorthand() {
        let cli = Cli::try_parse_from(["taskrelay", "start", "Alice - 2025-09-09@20h27m39s"]).unwrap();
        assert!(matches!(cli.command, Command::Start { ref log } if log == "Alice - 2025-09-09@20h27m39s"));
    }

    #[test]
    fn parses_reset_flag() {
        let cli = Cli::try_parse_from(["taskrelay", "reset", "--yes"]).unwrap();
        assert!(matches!(cli.command, Command::Reset { yes: true }));
    }

    #[test]
    fn retry_requires_task_id() {
        assert!(Cli::try_parse_from(["taskrelay", "retry"]).is_err());
    }
}
