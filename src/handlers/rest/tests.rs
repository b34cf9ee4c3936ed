use super::*;
use std::time::Duration;

use axum::body::Body;
use http::Request;
use serde_json::Value;
use tower::ServiceExt;

use crate::transport::{MockTransport, Outcome, TransportError, TransportKind, TransportSet};

struct Harness {
    app: Router,
    http: Arc<MockTransport>,
    rpc: Arc<MockTransport>,
    queue: Arc<MockTransport>,
}

fn harness() -> Harness {
    let http = Arc::new(MockTransport::new(TransportKind::Http));
    let rpc = Arc::new(MockTransport::new(TransportKind::Rpc));
    let queue = Arc::new(MockTransport::new(TransportKind::Queue));
    let set = TransportSet {
        http: http.clone(),
        rpc: rpc.clone(),
        grpc: Arc::new(MockTransport::new(TransportKind::Grpc)),
        queue: queue.clone(),
    };
    let dispatcher = Arc::new(Dispatcher::new(set, Duration::from_secs(1)));
    Harness {
        app: router(dispatcher),
        http,
        rpc,
        queue,
    }
}

async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_rest_health() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let resp = harness().app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rest_broker_probe() {
    let (status, json) = post_json(harness().app, "/", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"], false);
    assert_eq!(json["message"], "Hit the broker");
}

#[tokio::test]
async fn test_rest_dispatch_success() {
    let h = harness();
    h.http
        .push_result(Ok(Outcome {
            message: "Logged in user admin@example.com".into(),
            data: Some(serde_json::json!({"id": 1, "email": "admin@example.com"})),
        }))
        .await;

    let (status, json) = post_json(
        h.app,
        "/dispatch",
        r#"{"action":"auth","auth":{"email":"admin@example.com","password":"verysecret"}}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["error"], false);
    assert_eq!(json["message"], "Logged in user admin@example.com");
    assert_eq!(json["data"]["id"], 1);
}

#[tokio::test]
async fn test_rest_dispatch_invalid_request() {
    let h = harness();
    let (status, json) = post_json(h.app, "/dispatch", "{oops").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], true);
    assert_eq!(json["message"], "invalid request");
    assert!(json.get("data").is_none());
    assert_eq!(h.http.submitted_count().await, 0);
}

#[tokio::test]
async fn test_rest_dispatch_unreachable_is_sanitized() {
    let h = harness();
    h.rpc
        .push_failure(TransportError::Unreachable(
            "logger-service:5001: Connection refused (os error 111)".into(),
        ))
        .await;

    let (status, json) = post_json(
        h.app,
        "/dispatch",
        r#"{"action":"log","log":{"name":"event","data":"hello"}}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["message"], "service temporarily unavailable");
}

#[tokio::test]
async fn test_rest_log_via_queue_with_severity() {
    let h = harness();
    let (status, json) = post_json(
        h.app,
        "/log/queue",
        r#"{"name":"disk","data":"full","severity":"ERROR"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["error"], false);
    let submitted = h.queue.take_submitted().await;
    assert_eq!(submitted.len(), 1);
    assert!(matches!(
        &submitted[0],
        crate::transport::Payload::QueueLog { severity: Severity::Error, .. }
    ));
}

#[tokio::test]
async fn test_rest_log_via_unknown_transport() {
    let (status, json) = post_json(
        harness().app,
        "/log/smoke-signal",
        r#"{"name":"n","data":"d"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "unknown action");
}

#[tokio::test]
async fn test_rest_log_rejects_bad_severity() {
    let (status, json) = post_json(
        harness().app,
        "/log/queue",
        r#"{"name":"n","data":"d","severity":"LOUD"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "invalid request");
}
