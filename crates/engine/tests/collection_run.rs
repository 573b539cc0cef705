//! Whole-run scenarios against an in-memory transport

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde_json::{json, Value};

use chappie_common::Collection;
use chappie_engine::aggregate::{Phase, TestStatus};
use chappie_engine::materialize::MaterializedRequest;
use chappie_engine::{
    AssertionExecution, ImageConfig, RequestError, ResponseView, RunConfig, RunHooks, Runner,
    TestFailure, Transport, TransportResponse, VariableIsolation,
};

type Handler = Box<dyn Fn(&MaterializedRequest) -> Result<TransportResponse, RequestError> + Send + Sync>;

/// Transport answering from a closure and remembering every URL it saw
struct FakeTransport {
    handler: Handler,
    seen: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn new(
        handler: impl Fn(&MaterializedRequest) -> Result<TransportResponse, RequestError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: &MaterializedRequest) -> Result<TransportResponse, RequestError> {
        self.seen.lock().push(request.url.clone());
        tokio::task::yield_now().await;
        (self.handler)(request)
    }
}

fn json_response(status: u16, body: Value) -> TransportResponse {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    TransportResponse {
        status,
        headers,
        body: body.to_string().into_bytes(),
    }
}

fn png_response(marks: &[(u32, u32)]) -> TransportResponse {
    let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
    for &(x, y) in marks {
        img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
    }
    let mut body = Vec::new();
    img.write_to(&mut Cursor::new(&mut body), ImageOutputFormat::Png)
        .unwrap();

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "image/png".to_string());
    TransportResponse {
        status: 200,
        headers,
        body,
    }
}

fn leaf(name: &str, seq: i64, url: &str, tests: Option<&str>) -> Value {
    json!({
        "type": "http-request",
        "name": name,
        "seq": seq,
        "request": {
            "url": url,
            "method": "GET",
            "headers": [],
            "params": [],
            "body": { "mode": "none" },
            "tests": tests
        }
    })
}

fn collection(items: Vec<Value>) -> Collection {
    serde_json::from_value(json!({
        "name": "scenarios",
        "items": items,
        "environments": [
            { "uid": "dev", "name": "dev", "variables": [{ "name": "baseUrl", "value": "http://api.test" }] }
        ],
        "activeEnvironmentUid": "dev"
    }))
    .unwrap()
}

fn config(mode: AssertionExecution) -> RunConfig {
    RunConfig {
        assertion_execution: mode,
        ..Default::default()
    }
}

fn ok_transport() -> Arc<FakeTransport> {
    FakeTransport::new(|_| Ok(json_response(200, json!({ "id": 1 }))))
}

#[tokio::test]
async fn test_siblings_visited_in_seq_order() {
    let transport = ok_transport();
    let collection = collection(vec![
        leaf("second", 2, "{{baseUrl}}/second", None),
        leaf("first", 1, "{{baseUrl}}/first", None),
    ]);

    let runner = Runner::new(config(AssertionExecution::Allow), transport.clone()).unwrap();
    let report = runner.run(&collection).await.unwrap();

    assert_eq!(transport.seen(), ["http://api.test/first", "http://api.test/second"]);
    assert_eq!(report.summary.total_requests, 2);
    assert_eq!(report.summary.passed_requests, 2);
    assert_eq!(report.summary.total_tests, 0);
    assert!(report.results.is_empty());
    assert!(!report.summary.has_failures());
}

#[tokio::test]
async fn test_second_expectation_throws() {
    let collection = collection(vec![leaf(
        "Get todo",
        1,
        "{{baseUrl}}/todos/1",
        Some("expect(res.status).to.equal(200);\nexpect(res.data.id).to.equal(2);"),
    )]);

    let runner = Runner::new(config(AssertionExecution::Allow), ok_transport()).unwrap();
    let report = runner.run(&collection).await.unwrap();

    let summary = &report.summary;
    assert_eq!(summary.total_assertions, 2);
    assert_eq!(summary.passed_assertions, 0);
    assert_eq!(summary.failed_assertions, 1);
    assert_eq!(summary.failed_tests, 1);

    let result = &report.results[0];
    assert_eq!(result.status, TestStatus::Fail);
    assert_eq!(result.phase, Phase::Assertions);
    assert_eq!(result.test_id, "get-todo");
    assert_eq!(result.error.as_deref(), Some("expected 1 to equal 2"));
}

#[tokio::test]
async fn test_concurrent_replays_complete() {
    let script = "bru.setVar('x', '1');\nexpect(bru.getVar('x')).to.exist;";
    for isolation in [VariableIsolation::Isolated, VariableIsolation::Shared] {
        let collection = collection(vec![leaf("set", 1, "{{baseUrl}}/x", Some(script))]);
        let config = RunConfig {
            concurrency: 2,
            variable_isolation: isolation,
            ..config(AssertionExecution::Allow)
        };

        let report = Runner::new(config, ok_transport())
            .unwrap()
            .run(&collection)
            .await
            .unwrap();

        assert_eq!(report.summary.total_requests, 2);
        assert_eq!(report.summary.concurrency, 2);
        assert_eq!(report.summary.iterations, 1);
    }
}

#[tokio::test]
async fn test_unauthorized_scripts_fail_without_assertions() {
    let collection = collection(vec![leaf(
        "guarded",
        1,
        "{{baseUrl}}/guarded",
        Some("expect(res.status).to.equal(200);"),
    )]);

    let runner = Runner::new(config(AssertionExecution::Deny), ok_transport()).unwrap();
    let report = runner.run(&collection).await.unwrap();

    assert_eq!(report.summary.passed_requests, 1);
    assert_eq!(report.summary.total_assertions, 0);
    assert_eq!(report.summary.failed_assertions, 0);
    assert_eq!(report.summary.failed_tests, 1);
    assert_eq!(report.results[0].phase, Phase::Authorization);
}

#[tokio::test]
async fn test_error_response_still_runs_assertions() {
    let transport = FakeTransport::new(|_| Ok(json_response(404, json!({ "error": "Not found" }))));
    let collection = collection(vec![leaf(
        "missing",
        1,
        "{{baseUrl}}/nope",
        Some("expect(res.status).to.equal(404);\nexpect(res.data.error).to.equal('Not found');"),
    )]);

    let report = Runner::new(config(AssertionExecution::Allow), transport)
        .unwrap()
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(report.summary.failed_requests, 1);
    assert_eq!(report.summary.passed_assertions, 2);
    assert_eq!(report.summary.passed_tests, 1);
}

#[tokio::test]
async fn test_connection_failure_skips_assertions() {
    let transport = FakeTransport::new(|_| Err(RequestError::Connection("connection refused".to_string())));
    let collection = collection(vec![
        leaf("down", 1, "{{baseUrl}}/down", Some("expect(true).to.be.true;")),
        leaf("bad url", 2, "not a url", None),
    ]);

    let report = Runner::new(config(AssertionExecution::Allow), transport.clone())
        .unwrap()
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(report.summary.total_requests, 2);
    assert_eq!(report.summary.failed_requests, 2);
    assert_eq!(report.summary.total_tests, 0);
    assert_eq!(report.summary.total_assertions, 0);
    assert_eq!(transport.seen().len(), 1);
}

#[tokio::test]
async fn test_runtime_variables_reset_each_iteration() {
    let transport = FakeTransport::new(|request| {
        let body = if request.url.ends_with("/login") {
            json!({ "token": "abc" })
        } else {
            json!({})
        };
        Ok(json_response(200, body))
    });
    // The consumer runs before the producer, so it only ever sees the token
    // if it leaked from the previous iteration
    let collection = collection(vec![
        leaf("consume", 1, "{{baseUrl}}/items/{{token}}", None),
        leaf("login", 2, "{{baseUrl}}/login", Some("bru.setVar('token', res.data.token);")),
        leaf("reuse", 3, "{{baseUrl}}/again/{{token}}", None),
    ]);
    let config = RunConfig {
        iterations: 2,
        ..config(AssertionExecution::Allow)
    };

    let report = Runner::new(config, transport.clone())
        .unwrap()
        .run(&collection)
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(seen.len(), 6);
    assert!(seen[0].starts_with("http://api.test/items/"));
    assert!(!seen[0].ends_with("abc"));
    assert_eq!(seen[2], "http://api.test/again/abc");
    assert!(!seen[3].ends_with("abc"));
    assert_eq!(seen[5], "http://api.test/again/abc");
    assert_eq!(report.summary.iterations, 2);
    assert_eq!(report.summary.total_requests, 6);
}

#[derive(Default)]
struct CountingHooks {
    before: AtomicUsize,
    after: AtomicUsize,
    request_errors: AtomicUsize,
    test_errors: AtomicUsize,
}

impl RunHooks for CountingHooks {
    fn before_request(&self, _request: &MaterializedRequest) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_request(&self, _response: &ResponseView) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }

    fn on_request_error(&self, _error: &RequestError) {
        self.request_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_test_error(&self, failure: TestFailure<'_>) {
        assert!(matches!(failure, TestFailure::Script(_)));
        self.test_errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_hooks_invoked() {
    let transport = FakeTransport::new(|request| {
        if request.url.ends_with("/broken") {
            Ok(json_response(500, json!({})))
        } else {
            Ok(json_response(200, json!({})))
        }
    });
    let collection = collection(vec![
        leaf("fine", 1, "{{baseUrl}}/fine", Some("expect(1).to.equal(2);")),
        leaf("broken", 2, "{{baseUrl}}/broken", None),
    ]);
    let hooks = Arc::new(CountingHooks::default());

    Runner::new(config(AssertionExecution::Allow), transport)
        .unwrap()
        .with_hooks(hooks.clone())
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(hooks.before.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.request_errors.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.test_errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_image_baseline_then_compare() {
    let dir = tempfile::tempdir().unwrap();
    let marks: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let current = marks.clone();
    let transport = FakeTransport::new(move |_| Ok(png_response(&current.lock())));

    let collection = collection(vec![json!({
        "type": "folder",
        "name": "Images",
        "seq": 1,
        "items": [leaf("Logo", 1, "{{baseUrl}}/logo.png", None)]
    })]);
    let config = RunConfig {
        images: ImageConfig {
            baseline_dir: dir.path().join("base"),
            actual_dir: dir.path().join("actual"),
            diff_dir: dir.path().join("diff"),
            ..Default::default()
        },
        report: chappie_engine::config::ReportConfig {
            output: Some(dir.path().join("reports/results.json")),
        },
        ..config(AssertionExecution::Deny)
    };

    // First run creates the baseline and records nothing
    let report = Runner::new(config.clone(), transport.clone())
        .unwrap()
        .run(&collection)
        .await
        .unwrap();
    assert_eq!(report.summary.total_tests, 0);
    assert!(dir.path().join("base/images-logo.png").exists());
    assert!(dir.path().join("actual/images-logo.png").exists());

    // Same image passes
    let report = Runner::new(config.clone(), transport.clone())
        .unwrap()
        .run(&collection)
        .await
        .unwrap();
    assert_eq!(report.summary.passed_tests, 1);
    assert_eq!(report.results[0].phase, Phase::Image);

    // One pixel out of a hundred is exactly 0.99 and fails
    marks.lock().push((4, 4));
    let report = Runner::new(config, transport)
        .unwrap()
        .run(&collection)
        .await
        .unwrap();
    assert_eq!(report.summary.failed_tests, 1);
    assert_eq!(report.summary.total_assertions, 0);
    assert!(report.results[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("Image mismatch"));
    assert!(dir.path().join("diff/images-logo.png").exists());
    assert!(dir.path().join("reports/results.json").exists());
}

#[tokio::test]
async fn test_non_200_image_prepares_folders_only() {
    for status in [203, 206] {
        let dir = tempfile::tempdir().unwrap();
        for stale in ["actual", "diff"] {
            std::fs::create_dir_all(dir.path().join(stale)).unwrap();
            std::fs::write(dir.path().join(stale).join("old.png"), b"stale").unwrap();
        }
        let transport = FakeTransport::new(move |_| {
            Ok(TransportResponse {
                status,
                ..png_response(&[])
            })
        });

        let collection = collection(vec![json!({
            "type": "folder",
            "name": "Images",
            "seq": 1,
            "items": [leaf("Logo", 1, "{{baseUrl}}/logo.png", None)]
        })]);
        let config = RunConfig {
            images: ImageConfig {
                baseline_dir: dir.path().join("base"),
                actual_dir: dir.path().join("actual"),
                diff_dir: dir.path().join("diff"),
                ..Default::default()
            },
            ..config(AssertionExecution::Deny)
        };

        let report = Runner::new(config, transport.clone())
            .unwrap()
            .run(&collection)
            .await
            .unwrap();
        assert_eq!(transport.seen().len(), 1);
        assert_eq!(report.summary.total_tests, 0, "status {}", status);
        assert!(report.results.is_empty());
        assert!(!dir.path().join("base/images-logo.png").exists());
        assert!(!dir.path().join("actual/images-logo.png").exists());
        assert!(!dir.path().join("diff/images-logo.png").exists());
        assert!(dir.path().join("base").is_dir());
        assert!(!dir.path().join("actual/old.png").exists());
        assert!(!dir.path().join("diff/old.png").exists());
    }
}
