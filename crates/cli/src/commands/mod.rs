//! CLI Commands

pub mod inspect;
pub mod run;
