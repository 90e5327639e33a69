// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flotilla main entry point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use flotilla::config::{self, CliOptions, ResolvedConfig};
use flotilla::orchestrate::{
    isolation, Collaborators, SpawnOptions, SpawnOrchestrator, SqliteMailbox,
};
use flotilla::runtime::{resolve_runtime, TokenUsage};
use flotilla::store::{RunStore, SessionStore};
use flotilla::telemetry::{init_telemetry, TelemetryConfig};
use flotilla::{ActivityEvent, AgentSession, RunStatus, SessionSummary};

/// Flotilla - admission control and spawn handshakes for agent fleets.
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(author, version, about = "Spawn and track terminal-hosted coding agents", long_about = None)]
struct Cli {
    /// Project root (defaults to the nearest directory with a .flotilla config)
    #[arg(long, global = true, env = "FLOTILLA_PROJECT")]
    project: Option<PathBuf>,

    /// Show debug logs on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn an agent for a task
    Spawn(SpawnArgs),

    /// List agent sessions
    Status {
        /// Include zombie and completed sessions
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// Inspect or rotate the current run
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// Agent mailboxes
    Mail {
        #[command(subcommand)]
        action: MailAction,
    },

    /// Report agent activity (called by deployed hooks)
    Log {
        /// prompt-submit, tool-use, turn-end, or session-end
        event: String,
        #[arg(long)]
        agent: String,
    },

    /// Token usage from an agent transcript
    Usage {
        transcript: PathBuf,
        /// Backend that wrote the transcript
        #[arg(long)]
        runtime: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,
}

#[derive(clap::Args)]
struct SpawnArgs {
    /// Task id in the tracker
    task_id: String,

    /// Agent name, unique among active agents
    #[arg(long)]
    name: String,

    /// scout, builder, reviewer, lead, merger, coordinator, or monitor
    #[arg(long)]
    capability: Option<String>,

    /// Spec file the agent should read first
    #[arg(long)]
    spec: Option<String>,

    /// Comma-separated files the agent may edit
    #[arg(long)]
    files: Option<String>,

    /// Name of the spawning agent
    #[arg(long)]
    parent: Option<String>,

    /// Hierarchy depth (defaults to one below the parent)
    #[arg(long)]
    depth: Option<String>,

    #[arg(long)]
    skip_depth_limit: bool,

    /// Do not check the task's status in the tracker
    #[arg(long)]
    skip_task_check: bool,

    /// Allow non-lead capabilities without a parent
    #[arg(long)]
    force_hierarchy: bool,

    /// Override the per-parent agent limit
    #[arg(long = "max-agents")]
    max_agents: Option<String>,

    /// Backend to launch (claude, codex, pi)
    #[arg(long)]
    runtime: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum RunAction {
    /// Show the current run
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Start a new run
    New {
        /// Session id of the coordinator that owns the run
        #[arg(long)]
        coordinator: Option<String>,
    },
    /// Complete the current run
    Complete {
        /// Mark the run failed instead of completed
        #[arg(long)]
        failed: bool,
    },
}

#[derive(Subcommand)]
enum MailAction {
    /// Print and mark read an agent's unread mail
    Check {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.verbose {
        TelemetryConfig::development()
    } else {
        TelemetryConfig::production()
    };
    let _telemetry = init_telemetry(&telemetry)?;

    let verbose = cli.verbose;
    let root = project_root(cli.project)?;
    let result = handle_command(cli.command, &root).await;

    #[cfg(feature = "telemetry")]
    {
        if verbose {
            let report = flotilla::telemetry::GLOBAL_METRICS.snapshot().format_report();
            tracing::debug!("\n{}", report);
        }
    }
    #[cfg(not(feature = "telemetry"))]
    let _ = verbose;

    result
}

fn project_root(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(config::find_workspace_root(&cwd)
        .or_else(|| isolation::find_workspace_root(&cwd))
        .unwrap_or(cwd))
}

async fn handle_command(command: Commands, root: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Spawn(args) => handle_spawn(args, root).await?,
        Commands::Status { all, json } => handle_status(root, all, json)?,
        Commands::Run { action } => handle_run(action, root)?,
        Commands::Mail { action } => match action {
            MailAction::Check { agent, json } => handle_mail_check(root, &agent, json).await?,
        },
        Commands::Log { event, agent } => handle_log(root, &event, &agent)?,
        Commands::Usage {
            transcript,
            runtime,
            json,
        } => handle_usage(root, &transcript, runtime, json)?,
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let config = config::load_config(root, CliOptions::default())?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
        },
        Commands::Init => {
            let path = config::init_config(root, None)?;
            println!("Created config file: {}", path.display());
        }
    }
    Ok(())
}

async fn handle_spawn(args: SpawnArgs, root: &Path) -> anyhow::Result<()> {
    let config = config::load_config(
        root,
        CliOptions {
            runtime: args.runtime.clone(),
            ..Default::default()
        },
    )?;
    let collaborators = Collaborators::for_project(root, &config)?;
    let flotilla_bin = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "flotilla".to_string());

    let orchestrator = SpawnOrchestrator::new(
        root,
        config,
        SessionStore::open(root)?,
        RunStore::open(root)?,
        collaborators,
    )
    .with_flotilla_bin(flotilla_bin);

    let json = args.json;
    let spinner = spinner(json, format!("Spawning {} for {}", args.name, args.task_id));
    let result = orchestrator
        .spawn(SpawnOptions {
            task_id: args.task_id,
            agent_name: args.name,
            capability: args.capability,
            spec_path: args.spec,
            files: args.files,
            parent_agent: args.parent,
            depth: args.depth,
            skip_depth_limit: args.skip_depth_limit,
            skip_task_check: args.skip_task_check,
            force_hierarchy: args.force_hierarchy,
            max_agents_per_lead: args.max_agents,
            runtime: args.runtime,
        })
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(summary) => {
            for warning in &summary.warnings {
                eprintln!("{} {}", "warning:".yellow().bold(), warning);
            }
            if json {
                let out = serde_json::json!({ "success": true, "session": summary });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        Err(e) if json => {
            let out = serde_json::json!({
                "success": false,
                "error": { "kind": e.kind(), "message": e.to_string() },
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn spinner(hidden: bool, message: String) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "{} {} ({})",
        "Spawned".green().bold(),
        summary.agent_name.bright_white(),
        summary.capability
    );
    println!("  Task:     {}", summary.task_id);
    println!("  Branch:   {}", summary.branch);
    println!("  Worktree: {}", summary.worktree);
    println!("  Session:  {}", summary.session_handle);
    if let Some(pid) = summary.pid {
        println!("  PID:      {}", pid);
    }
    println!("  Run:      {}", summary.run_id.dimmed());
    println!("  Runtime:  {}", summary.runtime);
}

fn handle_status(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    let store = SessionStore::open(root)?;
    let sessions = if all { store.get_all()? } else { store.get_active()? };

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("{}", "No agent sessions".dimmed());
        return Ok(());
    }

    let now = Utc::now();
    for s in &sessions {
        println!(
            "{:<20} {:<12} {:<10} {:<14} {}",
            s.agent_name.bright_white(),
            s.capability.as_str(),
            state_label(s),
            s.task_id,
            format!("idle {}s", (now - s.last_activity).num_seconds().max(0)).dimmed()
        );
    }
    Ok(())
}

fn state_label(session: &AgentSession) -> colored::ColoredString {
    use flotilla::AgentState::*;
    let label = session.state.as_str();
    match session.state {
        Booting => label.yellow(),
        Working => label.green(),
        Stalled => label.red(),
        Zombie | Completed => label.dimmed(),
    }
}

fn handle_run(action: RunAction, root: &Path) -> anyhow::Result<()> {
    let mut runs = RunStore::open(root)?;
    match action {
        RunAction::Show { json } => {
            let run = match runs.current_run_id()? {
                Some(id) => runs.get_run(&id)?,
                None => None,
            };
            match (run, json) {
                (Some(run), true) => println!("{}", serde_json::to_string_pretty(&run)?),
                (None, true) => println!("null"),
                (Some(run), false) => {
                    println!("{} {}", "Run".bold(), run.id.bright_white());
                    println!("  Status:  {}", run.status);
                    println!("  Started: {}", run.started_at.to_rfc3339());
                    println!("  Agents:  {}", run.agent_count);
                }
                (None, false) => println!("{}", "No current run".dimmed()),
            }
        }
        RunAction::New { coordinator } => {
            let run = runs.start_new_run(coordinator)?;
            println!("Started run {}", run.id);
        }
        RunAction::Complete { failed } => {
            let Some(id) = runs.current_run_id()? else {
                anyhow::bail!("no current run to complete");
            };
            let status = if failed { RunStatus::Failed } else { RunStatus::Completed };
            runs.complete_run(&id, status)?;
            println!("Run {} {}", id, status);
        }
    }
    Ok(())
}

async fn handle_mail_check(root: &Path, agent: &str, json: bool) -> anyhow::Result<()> {
    let mailbox = SqliteMailbox::open(root)?;
    let messages = mailbox.unread_for(agent, true).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No new mail for {}", agent);
        return Ok(());
    }
    for msg in &messages {
        println!(
            "[{}] {} from {}: {}",
            msg.priority,
            msg.kind,
            msg.from,
            msg.subject.bold()
        );
        println!("{}\n", msg.body);
    }
    Ok(())
}

fn handle_log(root: &Path, event: &str, agent: &str) -> anyhow::Result<()> {
    let event: ActivityEvent = event.parse()?;
    let store = SessionStore::open(root)?;
    match store.record_activity(agent, event, Utc::now())? {
        Some(state) => tracing::debug!(agent, %event, %state, "Recorded activity"),
        None => tracing::debug!(agent, %event, "No session for agent; ignoring"),
    }
    Ok(())
}

fn handle_usage(
    root: &Path,
    transcript: &Path,
    runtime: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config: ResolvedConfig = config::load_config(root, CliOptions::default())?;
    let adapter = resolve_runtime(runtime.as_deref().unwrap_or(&config.runtime.default))?;
    let Some(summary) = adapter.parse_transcript(transcript) else {
        anyhow::bail!("no transcript at {}", transcript.display());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    for (model, usage) in &summary.by_model {
        print_usage(model, usage);
    }
    print_usage("total", &summary.total());
    if summary.skipped_lines > 0 {
        eprintln!(
            "{} skipped {} unreadable lines",
            "warning:".yellow().bold(),
            summary.skipped_lines
        );
    }
    Ok(())
}

fn print_usage(label: &str, usage: &TokenUsage) {
    println!(
        "{:<32} in {:>10}  out {:>10}  cache read {:>10}  cache write {:>10}",
        label.bright_white(),
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_read_tokens,
        usage.cache_creation_tokens
    );
}
