//! Error types for Chappie

use thiserror::Error;

/// Result type alias using the Chappie common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading a collection
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not read collection {path}: {source}")]
    CollectionRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
