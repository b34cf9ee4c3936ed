//! Shared utilities for integration tests.
//!
//! Stands up in-process fake backends speaking each wire protocol:
//! - HTTP (axum): `/authenticate`, `/log`, `/send`
//! - JSON-RPC lines over TCP: `RPCServer.LogInfo`
//! - gRPC (tonic): `switchyard.logger.LogService/WriteLog`

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use switchyard::config::Config;
use switchyard::envelope::LogPayload;
use switchyard::proto::log_service_server::{LogService, LogServiceServer};
use switchyard::proto::{LogRequest, LogResponse};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "verysecret";

/// Entries recorded by a fake backend.
pub type Recorded<T> = Arc<Mutex<Vec<T>>>;

pub fn recorded<T: Clone>(entries: &Recorded<T>) -> Vec<T> {
    entries.lock().unwrap().clone()
}

/// Wait until `entries` holds at least `count` items, or panic after 5s.
pub async fn wait_for<T: Clone>(entries: &Recorded<T>, count: usize) -> Vec<T> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = recorded(entries);
        if current.len() >= count {
            return current;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} entries, have {}",
            count,
            current.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ============================================================================
// HTTP backends
// ============================================================================

#[derive(Clone, Default)]
pub struct HttpBackendState {
    pub auth_calls: Recorded<String>,
    pub logs: Recorded<LogPayload>,
    pub mails: Recorded<Value>,
}

/// Fake authentication, logging and mail capabilities on one port.
pub struct FakeHttpBackend {
    pub url: String,
    pub state: HttpBackendState,
}

impl FakeHttpBackend {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Every reply is held back by `delay`.
    pub async fn start_with_delay(delay: Duration) -> Self {
        let state = HttpBackendState::default();
        let app = Router::new()
            .route("/authenticate", post(authenticate))
            .route("/log", post(write_log))
            .route("/send", post(send_mail))
            .layer(axum::middleware::from_fn(
                move |req: axum::extract::Request, next: axum::middleware::Next| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    next.run(req).await
                },
            ))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn calls(&self) -> usize {
        self.state.auth_calls.lock().unwrap().len()
            + self.state.logs.lock().unwrap().len()
            + self.state.mails.lock().unwrap().len()
    }
}

async fn authenticate(
    State(state): State<HttpBackendState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default();
    state.auth_calls.lock().unwrap().push(email.clone());

    if email == ADMIN_EMAIL && password == ADMIN_PASSWORD {
        (
            StatusCode::ACCEPTED,
            Json(json!({
                "error": false,
                "message": format!("Logged in user {}", email),
                "data": {
                    "id": 1,
                    "email": email,
                    "first_name": "Admin",
                    "last_name": "User",
                    "active": 1,
                },
            })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": true, "message": "invalid credentials"})),
        )
    }
}

async fn write_log(
    State(state): State<HttpBackendState>,
    Json(entry): Json<LogPayload>,
) -> (StatusCode, Json<Value>) {
    state.logs.lock().unwrap().push(entry);
    (
        StatusCode::ACCEPTED,
        Json(json!({"error": false, "message": "logged"})),
    )
}

async fn send_mail(
    State(state): State<HttpBackendState>,
    Json(mail): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let to = mail["to"].as_str().unwrap_or_default().to_string();
    state.mails.lock().unwrap().push(mail);
    (
        StatusCode::ACCEPTED,
        Json(json!({"error": false, "message": format!("Message sent to {}", to)})),
    )
}

// ============================================================================
// JSON-RPC backend
// ============================================================================

/// Fake logger speaking line-delimited JSON-RPC.
pub struct FakeRpcBackend {
    pub addr: SocketAddr,
    pub entries: Recorded<LogPayload>,
    task: JoinHandle<()>,
}

impl FakeRpcBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let entries: Recorded<LogPayload> = Arc::default();

        let recorder = entries.clone();
        let task = tokio::spawn(async move {
            // Dropping the set (on abort) closes every open connection.
            let mut connections = JoinSet::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let recorder = recorder.clone();
                connections.spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request: Value = serde_json::from_str(&line).unwrap();
                        let entry: LogPayload =
                            serde_json::from_value(request["params"][0].clone()).unwrap();
                        let name = entry.name.clone();
                        recorder.lock().unwrap().push(entry);

                        let reply = json!({
                            "id": request["id"],
                            "result": format!("Processed payload via RPC: {}", name),
                            "error": null,
                        });
                        let mut out = serde_json::to_vec(&reply).unwrap();
                        out.push(b'\n');
                        if write.write_all(&out).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            entries,
            task,
        }
    }

    /// Stop listening and drop every open connection.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        // Connection tasks are cancelled asynchronously.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ============================================================================
// gRPC backend
// ============================================================================

#[derive(Clone, Default)]
struct FakeLogService {
    entries: Recorded<LogPayload>,
}

#[tonic::async_trait]
impl LogService for FakeLogService {
    async fn write_log(
        &self,
        request: Request<LogRequest>,
    ) -> Result<Response<LogResponse>, Status> {
        let entry = request
            .into_inner()
            .log_entry
            .ok_or_else(|| Status::invalid_argument("log_entry is required"))?;
        self.entries.lock().unwrap().push(LogPayload {
            name: entry.name,
            data: entry.data,
        });
        Ok(Response::new(LogResponse {
            result: "logged via gRPC".to_string(),
        }))
    }
}

/// Fake logger serving the generated tonic service.
pub struct FakeGrpcBackend {
    pub url: String,
    pub entries: Recorded<LogPayload>,
}

impl FakeGrpcBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = FakeLogService::default();
        let entries = service.entries.clone();

        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(LogServiceServer::new(service))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            entries,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Config pointing every backend at the given addresses.
pub fn config_for(http_url: &str, rpc_addr: &str, grpc_url: &str) -> Config {
    let mut config = Config::for_test();
    config.backends.auth_url = http_url.to_string();
    config.backends.logger_url = http_url.to_string();
    config.backends.mail_url = http_url.to_string();
    config.backends.rpc_address = rpc_addr.to_string();
    config.backends.grpc_address = grpc_url.to_string();
    config.timeouts.dispatch_ms = 2000;
    config.timeouts.connect_ms = 500;
    config
}
