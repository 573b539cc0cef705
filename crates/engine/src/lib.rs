//! Chappie Collection Execution Engine
//!
//! Replays a collection of HTTP requests against live endpoints, runs the
//! assertion code attached to each request in a sandbox, compares image
//! responses against stored baselines and aggregates everything into a
//! [`RunReport`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Runner (iterations x concurrency)                          │
//! │    ├── VariableStore   environment + runtime layers         │
//! │    ├── traverse::plan  seq-ordered leaves, test ids         │
//! │    └── per leaf:                                            │
//! │          materialize -> Transport -> script::evaluate       │
//! │                                   -> VisualComparator       │
//! │                                   -> Aggregator             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RunReport { summary, results }                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod materialize;
pub mod runner;
pub mod script;
pub mod transport;
pub mod traverse;
pub mod variables;
pub mod visual;

pub use aggregate::{Aggregator, Phase, RunReport, Summary, TestResult, TestStatus};
pub use config::{AssertionExecution, ImageConfig, RunConfig, VariableIsolation};
pub use error::{EngineError, EngineResult};
pub use runner::{ExecutionPrompt, NoHooks, RunHooks, RunState, Runner, TestFailure};
pub use transport::{HttpTransport, RequestError, ResponseView, Transport, TransportResponse};
pub use variables::{VariableStore, Variables};
pub use visual::{VisualComparator, VisualError};
