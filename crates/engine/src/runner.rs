//! Run orchestration
//!
//! A run replays the whole collection `concurrency` times per iteration,
//! `iterations` times. Each replay walks the leaves in traversal order:
//! materialize, send, run the assertion script, compare images, record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use chappie_common::Collection;

use crate::aggregate::{Aggregator, AssertionTally, LeafOutcome, Phase, RunReport, TestResult, TestStatus};
use crate::config::{AssertionExecution, RunConfig, VariableIsolation};
use crate::error::EngineResult;
use crate::materialize::{materialize, MaterializedRequest};
use crate::script::{self, ScriptError};
use crate::traverse::{plan, PlannedLeaf};
use crate::transport::{HttpTransport, RequestError, ResponseView, Transport, TransportResponse};
use crate::variables::{RuntimeOverlay, VarMap, VariableStore, Variables};
use crate::visual::{ImageVerdict, VisualComparator, VisualError};

/// Message recorded for leaves whose scripts were not allowed to run
pub const UNAUTHORIZED_MESSAGE: &str = "Assertion script execution was not authorized";

/// Where a run is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running { iteration: usize, of: usize },
    Complete,
}

/// A failed test, as handed to [`RunHooks::on_test_error`]
#[derive(Debug, Clone, Copy)]
pub enum TestFailure<'a> {
    Script(&'a ScriptError),
    Image(&'a VisualError),
    Unauthorized,
}

/// Callbacks around each request. All default to doing nothing.
pub trait RunHooks: Send + Sync {
    fn before_request(&self, _request: &MaterializedRequest) {}

    /// Only called for successful responses
    fn after_request(&self, _response: &ResponseView) {}

    fn on_request_error(&self, _error: &RequestError) {}

    fn on_test_error(&self, _failure: TestFailure<'_>) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl RunHooks for NoHooks {}

/// Asks whether assertion scripts may run, when the config leaves it open
#[async_trait]
pub trait ExecutionPrompt: Send + Sync {
    async fn confirm_assertion_execution(&self) -> bool;
}

/// Executes a collection under a [`RunConfig`]
pub struct Runner {
    config: RunConfig,
    transport: Arc<dyn Transport>,
    hooks: Arc<dyn RunHooks>,
    prompt: Option<Arc<dyn ExecutionPrompt>>,
    state: Mutex<RunState>,
}

impl Runner {
    pub fn new(config: RunConfig, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            hooks: Arc::new(NoHooks),
            prompt: None,
            state: Mutex::new(RunState::Idle),
        })
    }

    /// Runner backed by the reqwest transport, honouring
    /// `request_timeout_secs`
    pub fn http(config: RunConfig) -> EngineResult<Self> {
        let timeout = config.request_timeout_secs.map(Duration::from_secs);
        let transport = HttpTransport::new(timeout)?;
        Self::new(config, Arc::new(transport))
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ExecutionPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    /// Decide once per run whether assertion scripts may execute
    async fn authorize(&self) -> bool {
        let allowed = match self.config.assertion_execution {
            AssertionExecution::Allow => true,
            AssertionExecution::Deny => false,
            AssertionExecution::Prompt => match &self.prompt {
                Some(prompt) => prompt.confirm_assertion_execution().await,
                None => {
                    warn!("No confirmation prompt available, treating as declined");
                    false
                }
            },
        };
        if allowed {
            info!("Assertion script execution enabled");
        } else {
            warn!("Assertion script execution disabled for this run");
        }
        allowed
    }

    /// Execute every iteration and return the final report.
    ///
    /// Leaf-level failures are recorded in the report; only configuration
    /// and report-writing errors fail the run.
    pub async fn run(&self, collection: &Collection) -> EngineResult<RunReport> {
        let config = &self.config;
        config.validate()?;
        self.set_state(RunState::Running {
            iteration: 0,
            of: config.iterations,
        });

        let authorized = self.authorize().await;

        let store = VariableStore::new();
        store.load(collection.active_environment());

        let leaves = plan(&collection.items);
        let visual = VisualComparator::new(config.images.clone());
        let aggregator = Aggregator::new(config.concurrency);

        info!(
            "Running {} request(s) x {} concurrent x {} iteration(s)",
            leaves.len(),
            config.concurrency,
            config.iterations
        );

        for iteration in 1..=config.iterations {
            self.set_state(RunState::Running {
                iteration,
                of: config.iterations,
            });
            store.clear();
            debug!("Starting iteration {}/{}", iteration, config.iterations);

            let pass = Pass {
                transport: self.transport.as_ref(),
                hooks: self.hooks.as_ref(),
                store: &store,
                visual: &visual,
                aggregator: &aggregator,
                isolation: config.variable_isolation,
                authorized,
                iteration: iteration as u64,
            };
            let traversals = (0..config.concurrency).map(|_| pass.traverse(&leaves));
            for layer in join_all(traversals).await.into_iter().flatten() {
                store.merge_runtime(layer);
            }

            aggregator.complete_iteration();
        }

        self.set_state(RunState::Complete);
        let report = aggregator.into_report();
        if let Some(output) = &config.report.output {
            report.write_json(output)?;
        }
        Ok(report)
    }
}

/// Shared context of the concurrent traversals of one iteration
struct Pass<'a> {
    transport: &'a dyn Transport,
    hooks: &'a dyn RunHooks,
    store: &'a VariableStore,
    visual: &'a VisualComparator,
    aggregator: &'a Aggregator,
    isolation: VariableIsolation,
    authorized: bool,
    iteration: u64,
}

impl Pass<'_> {
    /// Walk every leaf in order. Returns the traversal's private runtime
    /// variables when running isolated.
    async fn traverse(&self, leaves: &[PlannedLeaf<'_>]) -> Option<VarMap> {
        match self.isolation {
            VariableIsolation::Isolated => {
                let overlay = RuntimeOverlay::new(self.store);
                for leaf in leaves {
                    self.visit(leaf, &overlay).await;
                }
                Some(overlay.into_runtime())
            }
            VariableIsolation::Shared => {
                for leaf in leaves {
                    self.visit(leaf, self.store).await;
                }
                None
            }
        }
    }

    async fn visit(&self, leaf: &PlannedLeaf<'_>, vars: &dyn Variables) {
        info!("Running test: {}", leaf.test_id);
        let spec = &leaf.item.request;

        let request = match materialize(spec, vars) {
            Ok(request) => request,
            Err(e) => {
                warn!("Could not build request {}: {}", leaf.test_id, e);
                self.hooks.on_request_error(&e);
                self.aggregator.record(LeafOutcome {
                    request_passed: false,
                    assertions: None,
                    tests: Vec::new(),
                });
                return;
            }
        };

        self.hooks.before_request(&request);
        let started = Instant::now();
        let sent = match self.transport.execute(&request).await {
            Ok(response) if !response.is_success() => Err(RequestError::Status { response }),
            other => other,
        };

        let (response, request_passed) = match sent {
            Ok(response) => (response, true),
            Err(e) => {
                warn!("Request {} failed: {}", leaf.test_id, e);
                self.hooks.on_request_error(&e);
                match e {
                    RequestError::Status { response } => (response, false),
                    _ => {
                        self.aggregator.record(LeafOutcome {
                            request_passed: false,
                            assertions: None,
                            tests: Vec::new(),
                        });
                        return;
                    }
                }
            }
        };

        let view = ResponseView::from_response(&response);
        if request_passed {
            self.hooks.after_request(&view);
        }

        let mut tests = Vec::new();
        let mut assertions = None;

        if let Some(source) = spec.test_source() {
            if self.authorized {
                let outcome = script::evaluate(source, &view, Some(vars));
                assertions = Some(AssertionTally {
                    count: outcome.assertions,
                    passed: outcome.passed(),
                });
                match &outcome.result {
                    Ok(()) => tests.push(self.result(leaf, Phase::Assertions, None, started)),
                    Err(e) => {
                        error!("Error running test {}: {}", leaf.test_id, e);
                        self.hooks.on_test_error(TestFailure::Script(e));
                        tests.push(self.result(leaf, Phase::Assertions, Some(e.to_string()), started));
                    }
                }
            } else {
                self.hooks.on_test_error(TestFailure::Unauthorized);
                tests.push(self.result(
                    leaf,
                    Phase::Authorization,
                    Some(UNAUTHORIZED_MESSAGE.to_string()),
                    started,
                ));
            }
        }

        if request_passed && response.is_image() {
            if let Some(result) = self.compare_image(leaf, response, started).await {
                tests.push(result);
            }
        }

        self.aggregator.record(LeafOutcome {
            request_passed,
            assertions,
            tests,
        });
    }

    /// Image phase. `None` when nothing is recorded: a bootstrapped
    /// baseline or a non-200 status.
    async fn compare_image(
        &self,
        leaf: &PlannedLeaf<'_>,
        response: TransportResponse,
        started: Instant,
    ) -> Option<TestResult> {
        if response.status != 200 {
            if let Err(e) = self.visual.prepare().await {
                warn!("Could not prepare image folders: {}", e);
            }
            info!("Expected status is not 200, skipping image comparison");
            return None;
        }

        match self.visual.compare(&leaf.test_id, response.body).await {
            Ok(ImageVerdict::BaselineCreated { path }) => {
                info!("No baseline for {}, created {}", leaf.test_id, path.display());
                None
            }
            Ok(ImageVerdict::Matched(comparison)) => {
                info!(
                    "SUCCESS! {} -- Image matches ({:.4})",
                    leaf.name(),
                    comparison.correctness
                );
                Some(self.result(leaf, Phase::Image, None, started))
            }
            Err(e) => {
                error!("Image comparison failed for {}: {}", leaf.test_id, e);
                if let VisualError::Mismatch { comparison, .. } = &e {
                    info!("Actual image saved at {}", comparison.actual_path.display());
                    if let Some(diff) = &comparison.diff_path {
                        info!("Diff image saved at {}", diff.display());
                    }
                }
                self.hooks.on_test_error(TestFailure::Image(&e));
                Some(self.result(leaf, Phase::Image, Some(e.to_string()), started))
            }
        }
    }

    fn result(
        &self,
        leaf: &PlannedLeaf<'_>,
        phase: Phase,
        error: Option<String>,
        started: Instant,
    ) -> TestResult {
        TestResult {
            folder: leaf.folder.clone(),
            name: leaf.name().to_string(),
            test_id: leaf.test_id.clone(),
            phase,
            status: if error.is_none() {
                TestStatus::Pass
            } else {
                TestStatus::Fail
            },
            error,
            duration_ms: started.elapsed().as_millis() as u64,
            iteration: self.iteration,
        }
    }
}
