//! steep-supervisor: keeps a Steep language server running for each
//! workspace root given on the command line.
//!
//! ```text
//! main() -> SessionManager::initialize(roots)
//!             |
//!             v
//!   loop { stdin command | event tick | Ctrl-C }
//!             |
//!             v
//!   SessionManager::shutdown()
//! ```
//!
//! Diagnostics are printed whenever new ones arrive. The command list is
//! printed at startup.

mod commands;
mod console;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use steep_config::{FileSettingsSource, global_config_path};
use steep_lsp::{
    DiagnosticsSnapshot, GroupKind, ProcessLauncher, ReconcileReport, SessionManager,
    StartOutcome, StopOutcome, WorkspaceRoot,
};

use crate::commands::{Command, HELP};
use crate::console::ConsoleHost;

/// How often queued server events are drained.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const EVENT_BUDGET: usize = 256;

#[derive(Parser)]
#[command(name = "steep-supervisor")]
#[command(about = "Run one Steep language server per workspace root")]
#[command(version)]
struct Cli {
    /// Workspace roots to supervise (defaults to the current directory)
    #[arg(value_name = "ROOT")]
    roots: Vec<PathBuf>,

    /// Settings file used in place of ~/.steep/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries server output, so fall back to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.steep/logs/steep-supervisor.log
    if let Some(config_path) = global_config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("steep-supervisor.log"));
    }

    // Fallback: ./.steep/logs/steep-supervisor.log
    candidates.push(
        PathBuf::from(".steep")
            .join("logs")
            .join("steep-supervisor.log"),
    );

    candidates
}

fn print_report(report: &ReconcileReport) {
    for (root, outcome) in &report.stopped {
        match outcome {
            StopOutcome::NotRunning => {}
            StopOutcome::Stopped => eprintln!("stopped {root}"),
            StopOutcome::StoppedAfterTimeout => {
                eprintln!("stopped {root} (server never finished starting)");
            }
        }
    }
    for (root, outcome) in &report.started {
        match outcome {
            StartOutcome::Started { version } => eprintln!(
                "started {root} (steep {})",
                version.as_deref().unwrap_or("unknown version")
            ),
            StartOutcome::AlreadyActive => eprintln!("{root} is already running"),
            StartOutcome::Skipped(reason) => eprintln!("skipped {root}: {reason:?}"),
            StartOutcome::Failed(failure) => eprintln!("failed {root}: {failure}"),
        }
    }
}

fn print_diagnostics(snapshot: &DiagnosticsSnapshot) {
    for (path, items) in snapshot.files() {
        for item in items {
            println!("{}", item.display_with_path(path));
        }
    }
    let status = snapshot.status_string();
    if !status.is_empty() {
        eprintln!("{status}");
    }
}

/// Roots given on the command line, or the current directory.
fn initial_roots(roots: &[PathBuf], cwd: &Path) -> Vec<WorkspaceRoot> {
    if roots.is_empty() {
        return vec![WorkspaceRoot::new(cwd)];
    }
    roots
        .iter()
        .map(|root| WorkspaceRoot::new(commands::absolutize(root, cwd)))
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

async fn run_command(
    manager: &SessionManager,
    host: &ConsoleHost,
    known: &mut Vec<WorkspaceRoot>,
    cwd: &Path,
    command: Command,
) -> Flow {
    match command {
        Command::Restart => print_report(&manager.restart_all(known).await),
        Command::Typecheck(groups) => {
            let sent = if groups.is_empty() {
                manager.typecheck_all().await
            } else {
                manager.typecheck_groups(&groups).await
            };
            eprintln!("type check requested from {sent} server(s)");
        }
        Command::Groups => {
            let groups = manager.groups().await;
            if groups.is_empty() {
                eprintln!("no groups reported");
            }
            for group in groups {
                println!("{group}\t{}", GroupKind::of(&group).label());
            }
        }
        Command::Add(path) => {
            let root = WorkspaceRoot::new(commands::absolutize(&path, cwd));
            if !known.contains(&root) {
                known.push(root.clone());
            }
            print_report(&manager.on_roots_changed(&[root], &[]).await);
        }
        Command::Remove(path) => {
            let root = WorkspaceRoot::new(commands::absolutize(&path, cwd));
            known.retain(|r| r != &root);
            print_report(&manager.on_roots_changed(&[], &[root]).await);
        }
        Command::Status => {
            for root in known.iter() {
                let state = manager
                    .session(root)
                    .map_or_else(|| "not running".to_string(), |s| format!("{:?}", s.state()));
                eprintln!("{root}: {state}");
            }
            let version = host.server_version();
            if let Some(v) = version.version() {
                eprintln!("steep {v} ({}.{})", version.major(), version.minor());
            }
            let status = manager.snapshot().status_string();
            if !status.is_empty() {
                eprintln!("{status}");
            }
        }
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("reading current directory")?;
    let mut known = initial_roots(&cli.roots, &cwd);

    let settings = match cli.config {
        Some(path) => FileSettingsSource::with_global_path(Some(commands::absolutize(&path, &cwd))),
        None => FileSettingsSource::new(),
    };
    let host = Arc::new(ConsoleHost::default());
    let manager = SessionManager::new(Arc::new(settings), Arc::new(ProcessLauncher), host.clone());

    print_report(&manager.initialize(&known).await);
    eprintln!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    tracing::warn!("Failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            _ = ticker.tick() => {
                if manager.poll_events(EVENT_BUDGET) > 0 {
                    print_diagnostics(&manager.snapshot());
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {e}");
                        break;
                    }
                };
                match commands::parse(&line) {
                    Ok(Some(command)) => {
                        if run_command(&manager, &host, &mut known, &cwd, command).await == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
