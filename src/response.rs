//! Outward response envelope.
//!
//! Every reply, from any backend over any transport, has the same shape:
//! `{"error": bool, "message": string, "data"?: any}`. Failures never carry
//! `data` and never carry transport-internal detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::DispatchError;
use crate::errmsg;
use crate::transport::{Outcome, TransportError};

/// Uniform reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub error: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl GatewayResponse {
    pub fn success(outcome: Outcome) -> Self {
        Self {
            error: false,
            message: outcome.message,
            data: outcome.data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&DispatchError> for GatewayResponse {
    fn from(err: &DispatchError) -> Self {
        let message = match err {
            DispatchError::Decode(_) => errmsg::INVALID_REQUEST.to_string(),
            DispatchError::UnknownAction(_) => errmsg::UNKNOWN_ACTION.to_string(),
            DispatchError::Transport(e) => match e {
                TransportError::Unreachable(_) | TransportError::Reconnect(_) => {
                    errmsg::SERVICE_UNAVAILABLE.to_string()
                }
                TransportError::Timeout(_) => errmsg::SERVICE_TIMEOUT.to_string(),
                // The backend's own words are the one detail that passes through.
                TransportError::Application { message, .. } => message.clone(),
                TransportError::Serialization(_) => errmsg::INVALID_REQUEST.to_string(),
                TransportError::Publish(_) => errmsg::QUEUE_FAILED.to_string(),
                TransportError::Unsupported { .. } | TransportError::Config(_) => {
                    errmsg::INTERNAL_ERROR.to_string()
                }
            },
        };
        Self::failure(message)
    }
}

/// HTTP status for a dispatch failure.
pub fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Decode(_) | DispatchError::UnknownAction(_) => StatusCode::BAD_REQUEST,
        DispatchError::Transport(e) => match e {
            TransportError::Unreachable(_) | TransportError::Reconnect(_) => {
                StatusCode::BAD_GATEWAY
            }
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TransportError::Application { status, .. } => match status {
                Some(code) if (400..500).contains(code) => {
                    StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_REQUEST)
                }
                Some(code) if *code >= 500 => StatusCode::BAD_GATEWAY,
                _ => StatusCode::BAD_REQUEST,
            },
            TransportError::Serialization(_) => StatusCode::BAD_REQUEST,
            TransportError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
            TransportError::Unsupported { .. } | TransportError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

/// Render a dispatch result as an HTTP response.
pub fn render(result: Result<Outcome, DispatchError>) -> Response {
    match result {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(GatewayResponse::success(outcome))).into_response(),
        Err(err) => (status_for(&err), Json(GatewayResponse::from(&err))).into_response(),
    }
}
