//! REST API for the gateway.
//!
//! Endpoints:
//! - `POST /`: reachability probe
//! - `GET /health`: health check
//! - `POST /dispatch`: action envelope, routed by the dispatcher
//! - `POST /log/:via`: log entry through a named transport (`http`, `rpc`,
//!   `grpc`, `queue`)
//!
//! Bodies are taken as raw bytes and decoded here, so malformed input gets
//! the uniform response shape instead of a framework rejection.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::bus::Severity;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::response::{render, GatewayResponse};

/// Shared state for axum handlers.
type AppState = Arc<Dispatcher>;

/// Start the REST server on `addr` and serve until `shutdown` resolves.
pub async fn serve(
    dispatcher: Arc<Dispatcher>,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(dispatcher);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Build the axum router (separated for testing).
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/", post(broker))
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .route("/log/:via", post(log_via))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(dispatcher)
}

// ============================================================================
// Handlers
// ============================================================================

async fn broker() -> Json<GatewayResponse> {
    Json(GatewayResponse {
        error: false,
        message: "Hit the broker".to_string(),
        data: None,
    })
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn dispatch(State(dispatcher): State<AppState>, body: Bytes) -> Response {
    render(dispatcher.dispatch(&body).await)
}

/// Log entry with an optional severity (queue routing only).
#[derive(Debug, Deserialize)]
struct LogRequest {
    name: String,
    data: String,
    #[serde(default)]
    severity: Severity,
}

async fn log_via(
    State(dispatcher): State<AppState>,
    Path(via): Path<String>,
    body: Bytes,
) -> Response {
    let request: LogRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejected log request");
            return render(Err(DispatchError::Decode(e.to_string())));
        }
    };
    let entry = crate::envelope::LogPayload {
        name: request.name,
        data: request.data,
    };
    render(dispatcher.dispatch_log(&via, entry, request.severity).await)
}

#[cfg(test)]
mod tests;
