//! Error types for the execution engine

use thiserror::Error;

/// Errors that reject a whole run.
///
/// Everything that goes wrong inside a single leaf (transport failures,
/// assertion failures, image mismatches) is recorded into the run report
/// instead and never surfaces here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Collection error: {0}")]
    Collection(#[from] chappie_common::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
