//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Configuration for one run of a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of full concurrent replays of the tree per iteration
    pub concurrency: usize,

    /// Number of iterations
    pub iterations: usize,

    /// Whether assertion scripts may run
    pub assertion_execution: AssertionExecution,

    /// How concurrent traversals share runtime variables
    pub variable_isolation: VariableIsolation,

    /// Image folders and diff tolerances
    pub images: ImageConfig,

    /// Per-request timeout handed to the transport
    pub request_timeout_secs: Option<u64>,

    /// Result file output
    pub report: ReportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            iterations: 1,
            assertion_execution: AssertionExecution::default(),
            variable_isolation: VariableIsolation::default(),
            images: ImageConfig::default(),
            request_timeout_secs: None,
            report: ReportConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. Call [`RunConfig::validate`] once every override
    /// has been applied.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject schedules that would never execute anything
    pub fn validate(&self) -> EngineResult<()> {
        if self.concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "concurrency must be a positive integer".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(EngineError::InvalidConfig(
                "iterations must be a positive integer".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.images.pixel_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "pixel_threshold must be within 0.0..=1.0, got {}",
                self.images.pixel_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.images.pass_ratio) {
            return Err(EngineError::InvalidConfig(format!(
                "pass_ratio must be within 0.0..1.0, got {}",
                self.images.pass_ratio
            )));
        }
        Ok(())
    }
}

/// Authorization for running assertion scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionExecution {
    Allow,
    Deny,
    /// Ask the prompt collaborator once, before the first iteration
    #[default]
    Prompt,
}

/// Runtime variable sharing between the concurrent traversals of an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableIsolation {
    /// Each traversal writes its own runtime layer; layers are merged into the
    /// store in traversal order when the iteration ends
    #[default]
    Isolated,
    /// All traversals read and write one lock-guarded store, last write wins
    Shared,
}

/// Configuration for visual comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub baseline_dir: PathBuf,
    pub actual_dir: PathBuf,
    pub diff_dir: PathBuf,

    /// Per-pixel colour tolerance (0.0 - 1.0)
    pub pixel_threshold: f64,

    /// Minimum fraction of matching pixels, compared with a strict `>`
    pub pass_ratio: f64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("./base-images"),
            actual_dir: PathBuf::from("./actual-images"),
            diff_dir: PathBuf::from("./diff-images"),
            pixel_threshold: 0.1,
            pass_ratio: 0.99,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Where to write the JSON result file, if anywhere
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.iterations, 1);
        assert_eq!(config.assertion_execution, AssertionExecution::Prompt);
        assert_eq!(config.variable_isolation, VariableIsolation::Isolated);
        assert_eq!(config.images.pass_ratio, 0.99);
        assert_eq!(config.images.baseline_dir, PathBuf::from("./base-images"));
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chappie.toml");
        std::fs::write(
            &path,
            r#"
concurrency = 2
assertion_execution = "allow"

[images]
baseline_dir = "golden"
"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.iterations, 1);
        assert_eq!(config.assertion_execution, AssertionExecution::Allow);
        assert_eq!(config.images.baseline_dir, PathBuf::from("golden"));
        assert_eq!(config.images.diff_dir, PathBuf::from("./diff-images"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.iterations, 1);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = RunConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_defers_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chappie.toml");
        std::fs::write(&path, "iterations = 0\n").unwrap();

        let mut config = RunConfig::load(&path).unwrap();
        assert!(config.validate().is_err());
        config.iterations = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pass_ratio_range() {
        for pass_ratio in [f64::NAN, 1.0, 1.5, -0.1] {
            let mut config = RunConfig::default();
            config.images.pass_ratio = pass_ratio;
            assert!(
                matches!(config.validate(), Err(EngineError::InvalidConfig(_))),
                "{}",
                pass_ratio
            );
        }
        let mut config = RunConfig::default();
        config.images.pass_ratio = 0.0;
        assert!(config.validate().is_ok());
    }
}
