//! Runs against a local todo API over real HTTP

use std::io::Cursor;
use std::net::SocketAddr;

use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use image::{ImageOutputFormat, Rgba, RgbaImage};
use serde_json::{json, Value};

use chappie_common::Collection;
use chappie_engine::{AssertionExecution, ImageConfig, RunConfig, Runner};

async fn list_todos() -> Json<Value> {
    Json(json!([
        { "userId": 1, "id": 1, "title": "delectus aut autem", "completed": false },
        { "userId": 1, "id": 2, "title": "quis ut nam facilis", "completed": true }
    ]))
}

async fn get_todo(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({
        "userId": 1,
        "id": id,
        "title": format!("Todo item {}", id),
        "completed": false
    }))
}

async fn create_todo(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut created = body;
    created["id"] = json!(201);
    (StatusCode::CREATED, Json(created))
}

async fn chart() -> impl IntoResponse {
    let img = RgbaImage::from_pixel(16, 16, Rgba([30, 144, 255, 255]));
    let mut body = Vec::new();
    img.write_to(&mut Cursor::new(&mut body), ImageOutputFormat::Png)
        .unwrap();
    ([(header::CONTENT_TYPE, "image/png")], body)
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

async fn spawn_mock_server() -> SocketAddr {
    let app = Router::new()
        .route("/todos", get(list_todos).post(create_todo))
        .route("/todos/:id", get(get_todo))
        .route("/chart.png", get(chart))
        .fallback(not_found);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn todo_collection(addr: SocketAddr) -> Collection {
    serde_json::from_value(json!({
        "name": "todos",
        "items": [
            {
                "type": "folder",
                "name": "Todos",
                "seq": 1,
                "items": [
                    {
                        "type": "http-request",
                        "name": "List todos",
                        "seq": 1,
                        "request": {
                            "url": "{{baseUrl}}/todos",
                            "method": "GET",
                            "headers": [{ "name": "Accept", "value": "application/json", "enabled": true }],
                            "params": [],
                            "body": { "mode": "none" },
                            "tests": "expect(res.getStatus()).to.equal(200);\nexpect(res.getBody()).to.be.an('array').with.lengthOf(2);\nbru.setVar('todoId', res.data[1].id);"
                        }
                    },
                    {
                        "type": "http-request",
                        "name": "Get todo",
                        "seq": 2,
                        "request": {
                            "url": "{{baseUrl}}/todos/{{todoId}}",
                            "method": "GET",
                            "params": [],
                            "tests": "test('todo shape', function (res, tv4, expect) {\n  expect(res.data.id).to.equal(2);\n  expect(tv4.validate(res.data, { type: 'object', required: ['id', 'title', 'completed'] })).to.be.true;\n  expect(res.getHeader('content-type')).to.include('application/json');\n});"
                        }
                    },
                    {
                        "type": "http-request",
                        "name": "Create todo",
                        "seq": 3,
                        "request": {
                            "url": "{{baseUrl}}/todos",
                            "method": "POST",
                            "body": { "mode": "json", "json": "{\"title\": \"{{title}}\", \"completed\": false}" },
                            "tests": "expect(res.status).to.equal(201);\nexpect(res.data.title).to.equal('write more tests');"
                        }
                    },
                    {
                        "type": "http-request",
                        "name": "Missing",
                        "seq": 4,
                        "request": {
                            "url": "{{baseUrl}}/nowhere",
                            "method": "GET",
                            "tests": "expect(res.status).to.equal(404);"
                        }
                    }
                ]
            },
            {
                "type": "folder",
                "name": "Charts",
                "seq": 2,
                "items": [
                    {
                        "type": "http-request",
                        "name": "Blue chart",
                        "seq": 1,
                        "request": { "url": "{{baseUrl}}/chart.png", "method": "GET" }
                    }
                ]
            }
        ],
        "environments": [
            {
                "uid": "local",
                "name": "local",
                "variables": [
                    { "name": "baseUrl", "value": format!("http://{}", addr) },
                    { "name": "title", "value": "write more tests" },
                    { "name": "apiToken", "value": "disabled-token", "enabled": false }
                ]
            }
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_todo_collection_over_http() {
    let addr = spawn_mock_server().await;
    let collection = todo_collection(addr);
    let dir = tempfile::tempdir().unwrap();

    let config = RunConfig {
        iterations: 2,
        assertion_execution: AssertionExecution::Allow,
        images: ImageConfig {
            baseline_dir: dir.path().join("base-images"),
            actual_dir: dir.path().join("actual-images"),
            diff_dir: dir.path().join("diff-images"),
            ..Default::default()
        },
        request_timeout_secs: Some(10),
        ..Default::default()
    };

    let report = Runner::http(config).unwrap().run(&collection).await.unwrap();
    let summary = &report.summary;

    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.total_requests, 10);
    assert_eq!(summary.failed_requests, 2, "the 404 leaf fails its request");
    assert_eq!(summary.failed_tests, 0, "{:#?}", report.results);
    // 4 script leaves per iteration, plus the chart compared on iteration 2
    assert_eq!(summary.total_tests, 9);
    assert_eq!(summary.total_assertions, 2 * (2 + 3 + 2 + 1));
    assert_eq!(summary.passed_assertions, summary.total_assertions);

    assert!(dir.path().join("base-images/charts-blue-chart.png").exists());
    assert!(dir.path().join("actual-images/charts-blue-chart.png").exists());

    let ids: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.iteration == 1)
        .map(|r| r.test_id.as_str())
        .collect();
    assert_eq!(
        ids,
        ["todos-list-todos", "todos-get-todo", "todos-create-todo", "todos-missing"]
    );
}
