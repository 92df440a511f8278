// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Arbiter main entry point - CLI and bot startup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;

use arbiter::bot::Arbiter;
use arbiter::config::{self, CliOptions, ResolvedConfig};
use arbiter::coordinator::{spawn_signal_listener, ProcessExit};
use arbiter::decision::PrefixDecisionEngine;
use arbiter::generator::ProcessGenerator;
use arbiter::telemetry::{init_telemetry, TelemetryConfig};
use arbiter::transport::ConsoleTransport;
use arbiter::workspace::{git_available, WorkspaceManager};
use arbiter::VERSION;

/// Arbiter - chat-driven code editing in isolated git worktrees.
#[derive(Parser)]
#[command(name = "arbiter")]
#[command(author, version, about = "Chat-driven code editing in isolated git worktrees", long_about = None)]
struct Cli {
    /// Repository to work on (default: the workspace root)
    #[arg(short, long, env = "ARBITER_REPO")]
    repo: Option<PathBuf>,

    /// Directory for session worktrees
    #[arg(long, env = "ARBITER_WORKSPACE_BASE")]
    workspace_base: Option<PathBuf>,

    /// Branch to merge finished work into
    #[arg(short, long, env = "ARBITER_DEFAULT_BRANCH")]
    branch: Option<String>,

    /// Git remote for fetch/pull/push
    #[arg(long, env = "ARBITER_REMOTE")]
    remote: Option<String>,

    /// Code generator command
    #[arg(short, long, env = "ARBITER_GENERATOR")]
    generator: Option<String>,

    /// Chat command prefix
    #[arg(long, env = "ARBITER_PREFIX")]
    prefix: Option<String>,

    /// Repair attempts after a failed merge
    #[arg(long)]
    repair_attempts: Option<u32>,

    /// Name shown for console input
    #[arg(long, env = "USER", default_value = "console")]
    user: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands for arbiter.
#[derive(Subcommand)]
enum Commands {
    /// Start the bot on the console transport (default)
    Run,

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Remove orphaned session workspaces and exit
    Prune,

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

impl Cli {
    fn cli_options(&self) -> CliOptions {
        CliOptions {
            repo_path: self.repo.clone(),
            workspace_base: self.workspace_base.clone(),
            default_branch: self.branch.clone(),
            remote: self.remote.clone(),
            generator_command: self.generator.clone(),
            command_prefix: self.prefix.clone(),
            merge_repair_attempts: self.repair_attempts,
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<ResolvedConfig> {
    let cwd = std::env::current_dir()?;
    let workspace_root = config::find_workspace_root(&cwd).unwrap_or(cwd);
    Ok(config::load_config(&workspace_root, cli.cli_options())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = match &cli.command {
        None | Some(Commands::Run) => TelemetryConfig::from_verbosity(cli.verbose),
        Some(_) if cli.verbose > 0 => TelemetryConfig::from_verbosity(cli.verbose),
        Some(_) => TelemetryConfig::quiet(),
    };
    init_telemetry(&telemetry)?;

    match &cli.command {
        None | Some(Commands::Run) => run_bot(&cli).await,
        Some(Commands::Config { action }) => {
            match action {
                Some(ConfigAction::Show) | None => {
                    let config = load(&cli)?;
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
            }
            Ok(())
        }
        Some(Commands::Init) => {
            let workspace_root = std::env::current_dir()?;
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Some(Commands::Prune) => {
            let config = load(&cli)?;
            let manager = WorkspaceManager::new(config.manager_config());
            let removed = manager.initialize().await?;
            println!(
                "Removed {} orphaned workspace(s) under {}",
                removed,
                config.workspace_base.display()
            );
            Ok(())
        }
        Some(Commands::Version) => {
            println!("arbiter {}", VERSION);
            Ok(())
        }
    }
}

async fn run_bot(cli: &Cli) -> anyhow::Result<()> {
    if !git_available().await {
        anyhow::bail!("git was not found on PATH");
    }
    let config = load(cli)?;

    println!("{}", format!("arbiter {}", VERSION).bright_blue().bold());
    println!(
        "Repository: {}  default branch: {}  workspaces: {}",
        config.repo_path.display().to_string().bright_white(),
        config.default_branch.bright_white(),
        config.workspace_base.display()
    );
    println!(
        "Type {}task <description> to start a session, {}help for commands.",
        config.command_prefix, config.command_prefix
    );

    let bot = Arbiter::new(
        &config,
        Arc::new(ConsoleTransport::new(&cli.user)),
        Arc::new(PrefixDecisionEngine::new(&config.command_prefix)),
        Arc::new(ProcessGenerator::new(config.generator_config())),
        Arc::new(ProcessExit),
    );

    let _signals = spawn_signal_listener(Arc::clone(bot.coordinator()));

    // The coordinator ends the process through `ProcessExit`; the sender only
    // has to outlive the bot.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    bot.run(shutdown_rx).await
}
