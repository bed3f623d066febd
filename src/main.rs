//! Navo - Chef cookbook test suites in containers
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use navo::cli::{commands, Cli, Commands};
use navo::config::{ConfigManager, Project};
use navo::context::RunContext;
use navo::error::{NavoError, NavoResult};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> NavoResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = info, 1 = debug, 2+ = trace; RUST_LOG wins
    let default_filter = match cli.verbose {
        0 => "navo=info",
        1 => "navo=debug",
        _ => "navo=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let project = load_project(&cli).await?;
    debug!("Repository root: {}", project.repo_root.display());

    let concurrency = cli
        .concurrency
        .or(project.config.concurrency)
        .unwrap_or_else(default_concurrency);
    let ctx = Arc::new(RunContext::from_project(project));

    match cli.command.operation() {
        Some((operation, args)) => commands::lifecycle(operation, args, ctx, concurrency).await,
        None => match cli.command {
            Commands::Login(args) => commands::login(args, ctx).await,
            Commands::List(args) => commands::list(args, &ctx).await,
            _ => Ok(()),
        },
    }
}

async fn load_project(cli: &Cli) -> NavoResult<Project> {
    match &cli.config {
        Some(path) => ConfigManager::load_from_file(path).await,
        None => {
            let cwd =
                std::env::current_dir().map_err(|e| NavoError::io("getting current directory", e))?;
            ConfigManager::load_applicable(&cwd).await
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
