//! Schema RPC transport (gRPC).
//!
//! Calls `switchyard.logger.LogService/WriteLog`. The channel connects
//! lazily and multiplexes concurrent calls over HTTP/2.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::warn;

use super::{Outcome, Payload, Result, Transport, TransportError, TransportKind};
use crate::config::TimeoutConfig;
use crate::proto::log_service_client::LogServiceClient;
use crate::proto::{LogEntry, LogRequest};

/// gRPC client for the logging capability.
pub struct GrpcTransport {
    client: LogServiceClient<Channel>,
    call_timeout: Duration,
    /// Set after the first call that reached the backend.
    reached: AtomicBool,
}

impl GrpcTransport {
    pub fn new(address: &str, timeouts: &TimeoutConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(address.to_string())
            .map_err(|e| TransportError::Config(format!("gRPC address '{}': {}", address, e)))?
            .connect_timeout(timeouts.connect());

        Ok(Self {
            client: LogServiceClient::new(endpoint.connect_lazy()),
            call_timeout: timeouts.dispatch(),
            reached: AtomicBool::new(false),
        })
    }

    fn map_status(&self, status: Status) -> TransportError {
        match status.code() {
            Code::Unavailable => {
                let detail = status.message().to_string();
                if self.reached.load(Ordering::SeqCst) {
                    TransportError::Reconnect(detail)
                } else {
                    TransportError::Unreachable(detail)
                }
            }
            Code::DeadlineExceeded => TransportError::Timeout(status.message().to_string()),
            _ => TransportError::Application {
                message: status.message().to_string(),
                status: None,
            },
        }
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Grpc
    }

    async fn submit(&self, payload: Payload) -> Result<Outcome> {
        let entry = match payload {
            Payload::WriteLog(entry) => entry,
            other => {
                return Err(TransportError::Unsupported {
                    transport: TransportKind::Grpc,
                    payload: other.label(),
                })
            }
        };

        let mut request = tonic::Request::new(LogRequest {
            log_entry: Some(LogEntry {
                name: entry.name,
                data: entry.data,
            }),
        });
        // Sent as grpc-timeout so the server can abandon work we stopped
        // waiting for.
        request.set_timeout(self.call_timeout);

        match self.client.clone().write_log(request).await {
            Ok(response) => {
                self.reached.store(true, Ordering::SeqCst);
                let result = response.into_inner().result;
                Ok(Outcome::message(if result.is_empty() {
                    "logged".to_string()
                } else {
                    result
                }))
            }
            Err(status) => {
                warn!(code = ?status.code(), message = %status.message(), "gRPC call failed");
                Err(self.map_status(status))
            }
        }
    }
}
