use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use scheduler_core::models::{
    HttpTarget, JobTarget, RpcTarget, ShellTarget, TRUNCATED_MARKER,
};
use scheduler_dispatcher::executors::{
    CallError, CallbackExecutor, HttpCallbackExecutor, JsonRpcCallbackExecutor,
};

async fn echo(headers: HeaderMap, body: String) -> String {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    format!("{content_type}|{body}")
}

async fn rpc(Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    match request["method"].as_str() {
        Some("sum") => {
            let sum: i64 = request["params"]
                .as_array()
                .map(|values| values.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            Json(json!({"jsonrpc": "2.0", "id": id, "result": {"sum": sum}}))
        }
        Some("greet") => Json(json!({"jsonrpc": "2.0", "id": id, "result": "hi"})),
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"}
        })),
    }
}

async fn start_server() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "hello" }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/large", get(|| async { "x".repeat(64 * 1024) }))
        .route(
            "/large-fail",
            get(|| async { (StatusCode::BAD_GATEWAY, "e".repeat(64 * 1024)) }),
        )
        .route("/echo", post(echo))
        .route("/rpc", post(rpc));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> JobTarget {
    JobTarget::Http(HttpTarget {
        url: format!("http://{addr}{path}"),
        method: method.into(),
        body: body.map(str::to_string),
        headers: HashMap::new(),
    })
}

fn rpc_target(addr: SocketAddr, method: &str, params: Value) -> JobTarget {
    JobTarget::Rpc(RpcTarget {
        service: format!("http://{addr}/rpc"),
        method: method.into(),
        params,
    })
}

#[tokio::test]
async fn test_http_success_and_failure() {
    let addr = start_server().await;
    let executor = HttpCallbackExecutor::new();
    let timeout = Duration::from_secs(2);

    let response = executor
        .call(&http(addr, "GET", "/ok", None), timeout)
        .await
        .unwrap();
    assert_eq!(response.status_code, Some(200));
    assert_eq!(response.body, "hello");

    let err = executor
        .call(&http(addr, "GET", "/fail", None), timeout)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CallError::Rejected {
            status_code: Some(500),
            message: "HTTP状态码 500".into(),
            body: Some("boom".into()),
        }
    );
}

#[tokio::test]
async fn test_http_body_defaults_to_json_content_type() {
    let addr = start_server().await;
    let executor = HttpCallbackExecutor::new();

    let response = executor
        .call(
            &http(addr, "post", "/echo", Some(r#"{"k":1}"#)),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(response.body, r#"application/json|{"k":1}"#);

    let mut target = http(addr, "POST", "/echo", Some("plain"));
    if let JobTarget::Http(http) = &mut target {
        http.headers.insert("Content-Type".into(), "text/plain".into());
    }
    let response = executor.call(&target, Duration::from_secs(2)).await.unwrap();
    assert_eq!(response.body, "text/plain|plain");
}

#[tokio::test]
async fn test_http_large_body_capped_while_reading() {
    let addr = start_server().await;
    let executor = HttpCallbackExecutor::new().with_max_body_bytes(100);
    let timeout = Duration::from_secs(2);

    let response = executor
        .call(&http(addr, "GET", "/large", None), timeout)
        .await
        .unwrap();
    assert_eq!(response.body, format!("{}{}", "x".repeat(100), TRUNCATED_MARKER));

    let err = executor
        .call(&http(addr, "GET", "/large-fail", None), timeout)
        .await
        .unwrap_err();
    match err {
        CallError::Rejected { status_code, body, .. } => {
            assert_eq!(status_code, Some(502));
            assert_eq!(body.unwrap().len(), 100 + TRUNCATED_MARKER.len());
        }
        other => panic!("502应视为失败: {other:?}"),
    }

    // 未超过上限的响应保持原样
    let response = executor
        .call(&http(addr, "GET", "/ok", None), timeout)
        .await
        .unwrap();
    assert_eq!(response.body, "hello");
}

#[tokio::test]
async fn test_http_timeout() {
    let addr = start_server().await;
    let executor = HttpCallbackExecutor::new();
    let err = executor
        .call(&http(addr, "GET", "/slow", None), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Timeout(_)));
}

#[tokio::test]
async fn test_http_executor_rejects_other_targets() {
    let executor = HttpCallbackExecutor::new();
    let err = executor
        .call(
            &JobTarget::Shell(ShellTarget {
                command: "true".into(),
            }),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
    assert_eq!(err, CallError::Unsupported("shell".into()));
}

#[tokio::test]
async fn test_json_rpc_results_and_errors() {
    let addr = start_server().await;
    let executor = JsonRpcCallbackExecutor::new();
    let timeout = Duration::from_secs(2);

    let response = executor
        .call(&rpc_target(addr, "sum", json!([1, 2, 3])), timeout)
        .await
        .unwrap();
    assert_eq!(response.body, r#"{"sum":6}"#);

    let response = executor
        .call(&rpc_target(addr, "greet", Value::Null), timeout)
        .await
        .unwrap();
    assert_eq!(response.body, "hi");

    let err = executor
        .call(&rpc_target(addr, "missing", Value::Null), timeout)
        .await
        .unwrap_err();
    match err {
        CallError::Rejected { message, .. } => assert!(message.contains("Method not found")),
        other => panic!("unexpected error: {other:?}"),
    }
}
