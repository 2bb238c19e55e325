//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Create a starter workflow
    Init {
        /// Where to write the workflow
        #[arg(default_value = "tollgate.yaml")]
        path: String,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow file (discovered when omitted)
        path: Option<String>,
    },

    /// Show the job graph an event would produce, without running anything
    Plan {
        /// Path to workflow file (discovered when omitted)
        path: Option<String>,

        #[command(flatten)]
        event: EventArgs,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Run a workflow for an event
    Run {
        /// Path to workflow file (discovered when omitted)
        path: Option<String>,

        #[command(flatten)]
        event: EventArgs,

        /// Exit with the status of this gate instead of the run verdict
        #[arg(short, long)]
        gate: Option<String>,

        /// Report outcomes without executing job bodies
        #[arg(long)]
        dry_run: bool,

        /// Pretend these jobs fail (`test` or `test[1]`); implies --dry-run
        #[arg(long, value_name = "JOB")]
        fail: Vec<String>,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Print the JSON Schema of the workflow format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// The event a run is triggered by.
#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    /// Event name (push, pull_request, ...)
    #[arg(short, long, env = "TOLLGATE_EVENT")]
    pub event: Option<String>,

    /// Branch or ref the event happened on
    #[arg(short, long, env = "TOLLGATE_REF")]
    pub branch: Option<String>,

    /// Target branch of a pull request
    #[arg(long, env = "TOLLGATE_BASE_REF")]
    pub base_ref: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
