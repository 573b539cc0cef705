//! Chappie CLI
//!
//! Command-line front end for running API test collections.

pub mod commands;
pub mod output;
pub mod prompt;
