//! Chappie Common Library
//!
//! Collection model and shared error types used by the execution engine and
//! the command-line front end.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Chappie version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
