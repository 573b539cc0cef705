//! Chappie CLI - Main Entry Point
//!
//! Runs API test collections against live endpoints and reports the result.
//! Exit status: 0 when everything passed, 1 when a request, assertion or
//! test failed, 2 on a fatal error.

use clap::{Parser, Subcommand};

use chappie_cli::commands::{inspect, run};
use chappie_cli::output::{self, print_error};

/// Chappie - collection-driven API test runner
#[derive(Parser)]
#[command(name = "chappie")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a collection
    Run(run::RunArgs),

    /// List the requests of a collection in execution order
    Inspect(inspect::InspectArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let outcome = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Inspect(args) => inspect::execute(args, cli.format).map(|()| true),
        Commands::Version => {
            println!("Chappie v{}", chappie_common::VERSION);
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(2);
        }
    }
}
