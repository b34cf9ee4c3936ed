//! Transport clients for backend capabilities.
//!
//! Every client implements [`Transport`]: accept a [`Payload`], report an
//! [`Outcome`] or a typed [`TransportError`]. Supports:
//! - HTTP: request/response JSON calls (authentication, logging, mail)
//! - RPC: line-delimited JSON-RPC over one persistent TCP connection
//! - gRPC: the `switchyard.logger.LogService` schema contract
//! - Queue: publish to the log topic exchange with broker confirmation
//!
//! Connections are established lazily on first use and shared by all
//! concurrent callers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::bus::{Publisher, Severity};
use crate::config::Config;
use crate::envelope::{Action, AuthPayload, LogPayload, MailPayload};

pub mod grpc;
pub mod http;
pub mod mock;
pub mod queue;
pub mod rpc;

pub use grpc::GrpcTransport;
pub use self::http::HttpTransport;
pub use mock::MockTransport;
pub use queue::QueueTransport;
pub use rpc::RpcTransport;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors reported by transport clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Backend could not be reached (connection refused, reset, DNS).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// A previously established connection dropped and could not be
    /// re-established.
    #[error("reconnect failed: {0}")]
    Reconnect(String),

    #[error("backend timed out: {0}")]
    Timeout(String),

    /// Backend was reached and explicitly reported a failure.
    #[error("backend error: {message}")]
    Application {
        message: String,
        /// HTTP status the backend answered with, when there was one.
        status: Option<u16>,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("publish failed: {0}")]
    Publish(String),

    /// Payload handed to a client that cannot carry it.
    #[error("{transport} transport cannot carry {payload} payloads")]
    Unsupported {
        transport: TransportKind,
        payload: &'static str,
    },

    #[error("invalid transport configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Failures where retrying later may succeed: the backend was never
    /// reached or did not answer in time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_)
                | TransportError::Reconnect(_)
                | TransportError::Timeout(_)
        )
    }
}

/// Unit of work handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Authenticate(AuthPayload),
    WriteLog(LogPayload),
    SendMail(MailPayload),
    /// Log entry for the async path, routed by severity.
    QueueLog {
        entry: LogPayload,
        severity: Severity,
    },
}

impl Payload {
    pub fn label(&self) -> &'static str {
        match self {
            Payload::Authenticate(_) => "authenticate",
            Payload::WriteLog(_) => "write_log",
            Payload::SendMail(_) => "send_mail",
            Payload::QueueLog { .. } => "queue_log",
        }
    }
}

impl From<Action> for Payload {
    fn from(action: Action) -> Self {
        match action {
            Action::Authenticate(auth) => Payload::Authenticate(auth),
            Action::WriteLog(log) => Payload::WriteLog(log),
            Action::SendMail(mail) => Payload::SendMail(mail),
        }
    }
}

/// Successful result of a backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub message: String,
    pub data: Option<Value>,
}

impl Outcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

/// Wire protocol discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Rpc,
    Grpc,
    Queue,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Http,
        TransportKind::Rpc,
        TransportKind::Grpc,
        TransportKind::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Rpc => "rpc",
            TransportKind::Grpc => "grpc",
            TransportKind::Queue => "queue",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submit a unit of work over one wire protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn submit(&self, payload: Payload) -> Result<Outcome>;
}

/// One client per wire protocol, owned for the process lifetime.
#[derive(Clone)]
pub struct TransportSet {
    pub http: Arc<dyn Transport>,
    pub rpc: Arc<dyn Transport>,
    pub grpc: Arc<dyn Transport>,
    pub queue: Arc<dyn Transport>,
}

impl TransportSet {
    /// Build all four clients from configuration. No connection is made
    /// until a client's first call.
    pub fn from_config(config: &Config, publisher: Arc<dyn Publisher>) -> Result<Self> {
        Ok(Self {
            http: Arc::new(HttpTransport::new(&config.backends, &config.timeouts)?),
            rpc: Arc::new(RpcTransport::new(
                &config.backends.rpc_address,
                &config.backends.rpc_method,
                config.timeouts.connect(),
            )),
            grpc: Arc::new(GrpcTransport::new(
                &config.backends.grpc_address,
                &config.timeouts,
            )?),
            queue: Arc::new(QueueTransport::new(publisher)),
        })
    }

    pub fn get(&self, kind: TransportKind) -> &Arc<dyn Transport> {
        match kind {
            TransportKind::Http => &self.http,
            TransportKind::Rpc => &self.rpc,
            TransportKind::Grpc => &self.grpc,
            TransportKind::Queue => &self.queue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Unreachable("refused".into()).is_transient());
        assert!(TransportError::Reconnect("refused".into()).is_transient());
        assert!(TransportError::Timeout("5s".into()).is_transient());
        assert!(!TransportError::Application {
            message: "invalid credentials".into(),
            status: Some(401),
        }
        .is_transient());
        assert!(!TransportError::Publish("nack".into()).is_transient());
        assert!(!TransportError::Serialization("bad".into()).is_transient());
    }

    #[test]
    fn test_transport_kind_parse() {
        for kind in TransportKind::ALL {
            assert_eq!(TransportKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransportKind::parse("smtp"), None);
        assert_eq!(TransportKind::parse("HTTP"), None);
    }

    #[test]
    fn test_payload_from_action() {
        let action = Action::WriteLog(LogPayload {
            name: "event".into(),
            data: "hello".into(),
        });
        let payload = Payload::from(action);
        assert_eq!(payload.label(), "write_log");
    }

    #[tokio::test]
    async fn test_transport_set_from_default_config() {
        let set = TransportSet::from_config(
            &Config::for_test(),
            Arc::new(crate::bus::ChannelExchange::new()),
        )
        .unwrap();
        for kind in TransportKind::ALL {
            assert_eq!(set.get(kind).kind(), kind);
        }
    }
}
