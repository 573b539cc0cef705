//! Run summary and per-test results

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineResult;

/// Run-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Completed iterations
    pub iterations: u64,
    pub concurrency: u64,
    pub total_requests: u64,
    pub passed_requests: u64,
    pub failed_requests: u64,
    pub total_assertions: u64,
    pub passed_assertions: u64,
    pub failed_assertions: u64,
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
}

impl Summary {
    /// Whether any request, assertion or test failed
    pub fn has_failures(&self) -> bool {
        self.failed_requests > 0 || self.failed_assertions > 0 || self.failed_tests > 0
    }
}

/// Which part of a leaf produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Assertions,
    Image,
    /// Assertion code present but execution was not authorized
    Authorization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
}

/// Outcome of one phase of one leaf in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub folder: String,
    pub name: String,
    pub test_id: String,
    pub phase: Phase,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time since the request was sent
    pub duration_ms: u64,
    /// 1-based iteration the result belongs to
    pub iteration: u64,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Pass
    }
}

/// Assertion counts contributed by one script run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionTally {
    /// `expect(...)` invocations
    pub count: u64,
    pub passed: bool,
}

/// Everything one leaf contributes to the summary
#[derive(Debug, Clone, PartialEq)]
pub struct LeafOutcome {
    pub request_passed: bool,
    pub assertions: Option<AssertionTally>,
    pub tests: Vec<TestResult>,
}

/// Summary plus the ordered result list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: Summary,
    pub results: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Write the report as pretty JSON, creating parent directories
    pub fn write_json(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Results written to: {}", path.display());
        Ok(())
    }
}

/// Shared sink for the outcomes of every traversal in a run
#[derive(Debug, Default)]
pub struct Aggregator {
    report: Mutex<RunReport>,
}

impl Aggregator {
    pub fn new(concurrency: usize) -> Self {
        let aggregator = Self::default();
        {
            let mut report = aggregator.report.lock();
            report.summary.concurrency = concurrency as u64;
            report.started_at = Some(Utc::now());
        }
        aggregator
    }

    /// Apply one leaf's outcome under a single lock
    pub fn record(&self, outcome: LeafOutcome) {
        let mut report = self.report.lock();
        let summary = &mut report.summary;

        summary.total_requests += 1;
        if outcome.request_passed {
            summary.passed_requests += 1;
        } else {
            summary.failed_requests += 1;
        }

        if let Some(tally) = outcome.assertions {
            summary.total_assertions += tally.count;
            if tally.passed {
                summary.passed_assertions += tally.count;
            } else {
                summary.failed_assertions += 1;
            }
        }

        for result in &outcome.tests {
            summary.total_tests += 1;
            if result.passed() {
                summary.passed_tests += 1;
            } else {
                summary.failed_tests += 1;
            }
        }
        report.results.extend(outcome.tests);
    }

    /// Mark one full concurrent pass as done
    pub fn complete_iteration(&self) {
        self.report.lock().summary.iterations += 1;
    }

    pub fn summary(&self) -> Summary {
        self.report.lock().summary.clone()
    }

    /// Copy of the current summary and results
    pub fn snapshot(&self) -> RunReport {
        self.report.lock().clone()
    }

    /// Final report, stamped with the finish time
    pub fn into_report(self) -> RunReport {
        let mut report = self.report.into_inner();
        report.finished_at = Some(Utc::now());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus, phase: Phase) -> TestResult {
        TestResult {
            folder: "Todos".to_string(),
            name: "Get todo".to_string(),
            test_id: "todos-get-todo".to_string(),
            phase,
            status,
            error: (status == TestStatus::Fail).then(|| "expected 1 to equal 2".to_string()),
            duration_ms: 3,
            iteration: 1,
        }
    }

    #[test]
    fn test_record_counts() {
        let aggregator = Aggregator::new(2);
        aggregator.record(LeafOutcome {
            request_passed: true,
            assertions: Some(AssertionTally { count: 3, passed: true }),
            tests: vec![result(TestStatus::Pass, Phase::Assertions)],
        });
        aggregator.record(LeafOutcome {
            request_passed: false,
            assertions: Some(AssertionTally { count: 2, passed: false }),
            tests: vec![result(TestStatus::Fail, Phase::Assertions)],
        });
        aggregator.record(LeafOutcome {
            request_passed: true,
            assertions: None,
            tests: vec![],
        });
        aggregator.complete_iteration();

        let summary = aggregator.summary();
        assert_eq!(
            summary,
            Summary {
                iterations: 1,
                concurrency: 2,
                total_requests: 3,
                passed_requests: 2,
                failed_requests: 1,
                total_assertions: 5,
                passed_assertions: 3,
                failed_assertions: 1,
                total_tests: 2,
                passed_tests: 1,
                failed_tests: 1,
            }
        );
        assert!(summary.has_failures());
        assert_eq!(aggregator.snapshot().results.len(), 2);
    }

    #[test]
    fn test_report_json_shape() {
        let aggregator = Aggregator::new(1);
        aggregator.record(LeafOutcome {
            request_passed: true,
            assertions: None,
            tests: vec![result(TestStatus::Pass, Phase::Image)],
        });

        let snapshot = aggregator.snapshot();
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at.is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/results.json");
        snapshot.write_json(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["summary"]["totalRequests"], 1);
        assert_eq!(written["summary"]["passedTests"], 1);
        assert_eq!(written["results"][0]["testId"], "todos-get-todo");
        assert_eq!(written["results"][0]["phase"], "image");
        assert_eq!(written["results"][0]["status"], "pass");
        assert!(written["results"][0].get("error").is_none());

        let back: RunReport = serde_json::from_value(written).unwrap();
        assert_eq!(back, snapshot);
        assert!(aggregator.into_report().finished_at.is_some());
    }
}
