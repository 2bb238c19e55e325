//! Tollgate CLI entrypoint.

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;
mod handlers;
mod workflow;

#[cfg(test)]
mod handlers_tests;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOptions;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(author, version, about = "Tollgate CI workflow runner", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(verbose > 1)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Exit code for a failed command: 2 when the workflow itself is unusable.
fn exit_code(error: &anyhow::Error) -> i32 {
    let unusable = error.chain().any(|cause| {
        cause
            .downcast_ref::<tollgate_core::Error>()
            .is_some_and(|e| e.is_build_error())
            || cause.downcast_ref::<serde_yaml::Error>().is_some()
    });
    if unusable { 2 } else { 1 }
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Init { path } => handlers::init(&path)?,
        Commands::Validate { path } => handlers::validate(path.as_deref())?,
        Commands::Plan {
            path,
            event,
            output,
        } => handlers::plan(&config, path.as_deref(), &event, output)?,
        Commands::Run {
            path,
            event,
            gate,
            dry_run,
            fail,
            output,
        } => {
            let options = RunOptions {
                path: path.as_deref(),
                event: &event,
                gate: gate.as_deref(),
                dry_run,
                fail: &fail,
                output,
            };
            return handlers::run(&config, options).await;
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            exit_code(&e)
        }
    };
    std::process::exit(code);
}
