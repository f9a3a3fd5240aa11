//! CLI definitions for Cadence.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Cadence CLI.
#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Recurring job scheduler and execution engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        env = "CADENCE_CONFIG",
        default_value = "config/cadence.toml",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in foreground (default)
    Run,

    /// Check the configuration file and exit
    Validate,

    /// Show the next fire times of a cron expression
    Next {
        /// Five-field cron expression, e.g. "0 10 * * *"
        expression: String,

        /// Number of fire times to show
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Start instant (RFC 3339), defaults to now
        #[arg(long)]
        after: Option<String>,
    },

    /// List registered jobs and execution counts
    Jobs {
        /// SQLite database to inspect, defaults to the configured store path
        #[arg(long)]
        state_db: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
