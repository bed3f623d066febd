//! CLI argument definitions using clap derive

use crate::runner::Operation;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Navo - Chef cookbook test suites in containers
///
/// Builds a container per suite, converges it with chef-solo, and verifies
/// it with busser, running many suites in parallel.
#[derive(Parser, Debug)]
#[command(name = "navo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Maximum number of suites to run at once
    #[arg(short = 'j', long, global = true, env = "NAVO_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Configuration file path (defaults to the nearest .navo.toml)
    #[arg(short, long, global = true, env = "NAVO_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build images and start containers
    Create(SuiteArgs),

    /// Create, then run chef-solo
    Converge(SuiteArgs),

    /// Create, then run the integration tests
    Verify(SuiteArgs),

    /// Destroy, converge, verify, then destroy per the destroy policy
    Test(SuiteArgs),

    /// Stop and remove containers and their state
    Destroy(SuiteArgs),

    /// Open a shell in a suite's container
    Login(LoginArgs),

    /// List suites and their containers
    List(ListArgs),
}

impl Commands {
    /// Lifecycle operation for the suite commands
    pub fn operation(&self) -> Option<(Operation, &SuiteArgs)> {
        match self {
            Self::Create(args) => Some((Operation::Create, args)),
            Self::Converge(args) => Some((Operation::Converge, args)),
            Self::Verify(args) => Some((Operation::Verify, args)),
            Self::Test(args) => Some((Operation::Test, args)),
            Self::Destroy(args) => Some((Operation::Destroy, args)),
            Self::Login(_) | Self::List(_) => None,
        }
    }
}

/// Arguments for the lifecycle commands
#[derive(Parser, Debug)]
pub struct SuiteArgs {
    /// Suite name, or a regex matched against suite names (all if omitted)
    pub pattern: Option<String>,
}

/// Arguments for the login command
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Suite name, or a regex matching exactly one suite
    pub pattern: String,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Suite name or regex (all if omitted)
    pub pattern: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_test_with_pattern() {
        let cli = Cli::parse_from(["navo", "-j", "3", "test", "web.*"]);
        assert_eq!(cli.concurrency, Some(3));
        let (operation, args) = cli.command.operation().unwrap();
        assert_eq!(operation, Operation::Test);
        assert_eq!(args.pattern.as_deref(), Some("web.*"));
    }

    #[test]
    fn cli_parses_destroy_without_pattern() {
        let cli = Cli::parse_from(["navo", "destroy"]);
        let (operation, args) = cli.command.operation().unwrap();
        assert_eq!(operation, Operation::Destroy);
        assert!(args.pattern.is_none());
    }

    #[test]
    fn cli_parses_verbosity_after_subcommand() {
        let cli = Cli::parse_from(["navo", "converge", "db", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn cli_requires_login_pattern() {
        assert!(Cli::try_parse_from(["navo", "login"]).is_err());
        let cli = Cli::parse_from(["navo", "login", "web"]);
        assert!(matches!(cli.command, Commands::Login(ref args) if args.pattern == "web"));
        assert!(cli.command.operation().is_none());
    }

    #[test]
    fn cli_parses_list_format() {
        let cli = Cli::parse_from(["navo", "list", "--format", "json"]);
        match cli.command {
            Commands::List(args) => assert!(matches!(args.format, OutputFormat::Json)),
            _ => panic!("expected List command"),
        }
    }
}
