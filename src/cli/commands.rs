//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: fan a batch file out to the providers
//! - providers: list canonical providers, default models and spacing
//! - resolve: show how a provider name resolves

use clap::{Parser, Subcommand};
use probefan::scheduler::Strategy;
use std::path::PathBuf;

/// Probefan - fan probe questions out to AI-answer providers
#[derive(Parser, Debug)]
#[command(name = "probefan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every task in a batch file
    Run {
        /// Batch file (YAML or JSON)
        batch: PathBuf,

        /// Execution strategy (sequential, concurrent)
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Worker pool size for the concurrent strategy
        #[arg(short, long)]
        workers: Option<usize>,

        /// Bound on total run time, in seconds
        #[arg(long)]
        run_timeout: Option<u64>,

        /// Answer from a local echo adapter instead of calling providers
        #[arg(long)]
        dry_run: bool,

        /// Print outcomes and the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known providers
    Providers,

    /// Show how a provider name or alias resolves
    Resolve {
        /// Provider name, alias, or provider:model
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["probefan"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["probefan", "-v", "providers"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["probefan", "providers", "-c", "/path/to/probefan.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/probefan.yml")));
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["probefan", "run", "batch.yml"]).unwrap();
        match cli.command {
            Commands::Run {
                batch,
                strategy,
                workers,
                run_timeout,
                dry_run,
                json,
            } => {
                assert_eq!(batch, PathBuf::from("batch.yml"));
                assert!(strategy.is_none());
                assert!(workers.is_none());
                assert!(run_timeout.is_none());
                assert!(!dry_run);
                assert!(!json);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "probefan",
            "run",
            "batch.yml",
            "--strategy",
            "sequential",
            "--workers",
            "8",
            "--run-timeout",
            "120",
            "--dry-run",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                strategy,
                workers,
                run_timeout,
                dry_run,
                json,
                ..
            } => {
                assert_eq!(strategy, Some(Strategy::Sequential));
                assert_eq!(workers, Some(8));
                assert_eq!(run_timeout, Some(120));
                assert!(dry_run);
                assert!(json);
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["probefan", "run", "b.yml", "--strategy", "parallel"]).is_err());
    }

    #[test]
    fn test_resolve() {
        let cli = Cli::try_parse_from(["probefan", "resolve", "ChatGPT"]).unwrap();
        assert!(matches!(cli.command, Commands::Resolve { name } if name == "ChatGPT"));
    }
}
