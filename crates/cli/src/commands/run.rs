//! Run Command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::{debug, info};

use chappie_common::Collection;
use chappie_engine::materialize::MaterializedRequest;
use chappie_engine::{
    AssertionExecution, RequestError, ResponseView, RunConfig, RunHooks, Runner, TestFailure,
    VariableIsolation,
};

use crate::output::{print_report, OutputFormat};
use crate::prompt::TerminalPrompt;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Collection file to execute
    pub collection: PathBuf,

    /// Run configuration file
    #[arg(short, long, default_value = "chappie.toml")]
    pub config: PathBuf,

    /// Concurrent replays of the collection per iteration
    #[arg(long, env = "CHAPPIE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Number of iterations
    #[arg(short = 'n', long, env = "CHAPPIE_ITERATIONS")]
    pub iterations: Option<usize>,

    /// Run assertion scripts without asking
    #[arg(long, conflicts_with = "deny_scripts")]
    pub allow_scripts: bool,

    /// Never run assertion scripts
    #[arg(long)]
    pub deny_scripts: bool,

    /// How concurrent replays share runtime variables
    #[arg(long, value_enum)]
    pub isolation: Option<IsolationArg>,

    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    #[arg(long)]
    pub actual_dir: Option<PathBuf>,

    #[arg(long)]
    pub diff_dir: Option<PathBuf>,

    /// Write the JSON result file here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IsolationArg {
    Isolated,
    Shared,
}

impl From<IsolationArg> for VariableIsolation {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::Isolated => VariableIsolation::Isolated,
            IsolationArg::Shared => VariableIsolation::Shared,
        }
    }
}

impl RunArgs {
    /// Config file values with command-line flags layered on top
    pub fn resolve_config(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load(&self.config)
            .with_context(|| format!("Failed to load config {}", self.config.display()))?;

        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if self.allow_scripts {
            config.assertion_execution = AssertionExecution::Allow;
        } else if self.deny_scripts {
            config.assertion_execution = AssertionExecution::Deny;
        }
        if let Some(isolation) = self.isolation {
            config.variable_isolation = isolation.into();
        }
        if let Some(dir) = &self.baseline_dir {
            config.images.baseline_dir = dir.clone();
        }
        if let Some(dir) = &self.actual_dir {
            config.images.actual_dir = dir.clone();
        }
        if let Some(dir) = &self.diff_dir {
            config.images.diff_dir = dir.clone();
        }
        if let Some(output) = &self.output {
            config.report.output = Some(output.clone());
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = Some(timeout);
        }

        config.validate().context("Invalid run configuration")?;
        Ok(config)
    }
}

/// Logs request traffic at debug level
struct LogHooks;

impl RunHooks for LogHooks {
    fn before_request(&self, request: &MaterializedRequest) {
        debug!("Making request to: {} {}", request.method, request.url);
    }

    fn after_request(&self, response: &ResponseView) {
        debug!("Response status: {}", response.status);
    }

    fn on_request_error(&self, error: &RequestError) {
        debug!("Request error: {}", error);
    }

    fn on_test_error(&self, failure: TestFailure<'_>) {
        match failure {
            TestFailure::Script(e) => debug!("Test error: {}", e),
            TestFailure::Image(e) => debug!("Image error: {}", e),
            TestFailure::Unauthorized => debug!("Test skipped: scripts not authorized"),
        }
    }
}

/// Execute a collection. Returns whether everything passed.
pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<bool> {
    let config = args.resolve_config()?;
    let collection = Collection::load(&args.collection)
        .with_context(|| format!("Could not read collection {}", args.collection.display()))?;

    info!(
        "Loaded collection '{}' with {} request(s)",
        collection.name,
        collection.request_count()
    );

    let runner = Runner::http(config)
        .context("Failed to create runner")?
        .with_hooks(Arc::new(LogHooks))
        .with_prompt(Arc::new(TerminalPrompt));

    let report = runner.run(&collection).await.context("Run failed")?;
    print_report(&report, format);

    Ok(!report.summary.has_failures())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        Harness::parse_from(std::iter::once("chappie").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("chappie.toml");
        std::fs::write(&config_path, "concurrency = 3\niterations = 4\nassertion_execution = \"deny\"\n").unwrap();

        let args = parse(&[
            "collection.json",
            "--config",
            config_path.to_str().unwrap(),
            "-n",
            "2",
            "--allow-scripts",
            "--isolation",
            "shared",
            "--baseline-dir",
            "golden",
        ]);
        let config = args.resolve_config().unwrap();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.iterations, 2);
        assert_eq!(config.assertion_execution, AssertionExecution::Allow);
        assert_eq!(config.variable_isolation, VariableIsolation::Shared);
        assert_eq!(config.images.baseline_dir, PathBuf::from("golden"));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = parse(&[
            "collection.json",
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
            "--iterations",
            "0",
        ]);
        assert!(args.resolve_config().is_err());
    }

    #[test]
    fn test_flag_repairs_invalid_config_value() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("chappie.toml");
        std::fs::write(&config_path, "iterations = 0\n").unwrap();

        let path = config_path.to_str().unwrap();
        assert!(parse(&["collection.json", "--config", path]).resolve_config().is_err());

        let config = parse(&["collection.json", "--config", path, "-n", "2"])
            .resolve_config()
            .unwrap();
        assert_eq!(config.iterations, 2);
    }
}
