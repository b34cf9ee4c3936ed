//! Queue-publish transport.
//!
//! Serializes a log entry and publishes it to the log topic exchange under
//! `log.<SEVERITY>`. Returns once the broker confirms the publish; the
//! entry is persisted later by whichever consumer drains the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Outcome, Payload, Result, Transport, TransportError, TransportKind};
use crate::bus::{BusError, Publisher, Severity};

/// Reported to the caller once the broker has accepted the entry.
pub const QUEUED_MESSAGE: &str = "logged via RabbitMQ";

/// Async log publisher.
pub struct QueueTransport {
    publisher: Arc<dyn Publisher>,
}

impl QueueTransport {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Transport for QueueTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Queue
    }

    async fn submit(&self, payload: Payload) -> Result<Outcome> {
        let (entry, severity) = match payload {
            Payload::QueueLog { entry, severity } => (entry, severity),
            Payload::WriteLog(entry) => (entry, Severity::default()),
            other => {
                return Err(TransportError::Unsupported {
                    transport: TransportKind::Queue,
                    payload: other.label(),
                })
            }
        };

        let body = serde_json::to_vec(&entry)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        let routing_key = severity.routing_key();

        self.publisher
            .publish(&routing_key, body)
            .await
            .map_err(from_bus_error)?;

        debug!(routing_key = %routing_key, name = %entry.name, "Queued log entry");
        Ok(Outcome::message(QUEUED_MESSAGE))
    }
}

fn from_bus_error(err: BusError) -> TransportError {
    match err {
        BusError::Connection(msg) => TransportError::Unreachable(msg),
        BusError::Reconnect(msg) => TransportError::Reconnect(msg),
        BusError::Publish(msg) | BusError::Subscribe(msg) => TransportError::Publish(msg),
    }
}
