//! Action router.
//!
//! Decodes an inbound envelope, picks the transport from a static table,
//! and runs exactly one bounded backend call. The dispatcher never retries:
//! some actions (mail) are not safe to repeat blindly.

use std::time::Duration;

use tracing::{debug, warn};

use crate::bus::Severity;
use crate::envelope::{self, Action, EnvelopeError, LogPayload};
use crate::transport::{Outcome, Payload, TransportError, TransportKind, TransportSet};

/// Errors surfaced by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Decode(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<EnvelopeError> for DispatchError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::UnknownAction(tag) => DispatchError::UnknownAction(tag),
            EnvelopeError::MissingPayload(kind) => {
                DispatchError::UnknownAction(format!("no '{}' payload", kind))
            }
            other => DispatchError::Decode(other.to_string()),
        }
    }
}

/// Routes actions to transport clients.
pub struct Dispatcher {
    transports: TransportSet,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(transports: TransportSet, call_timeout: Duration) -> Self {
        Self {
            transports,
            call_timeout,
        }
    }

    /// Static action-to-transport table.
    pub fn route(action: &Action) -> TransportKind {
        match action {
            Action::Authenticate(_) => TransportKind::Http,
            Action::WriteLog(_) => TransportKind::Rpc,
            Action::SendMail(_) => TransportKind::Http,
        }
    }

    /// Decode a raw envelope and dispatch it. Nothing is sent to any backend
    /// unless the envelope decodes and validates.
    pub async fn dispatch(&self, body: &[u8]) -> Result<Outcome, DispatchError> {
        let action = envelope::decode(body).map_err(|e| {
            debug!(error = %e, "Rejected envelope");
            DispatchError::from(e)
        })?;
        self.dispatch_action(action).await
    }

    #[tracing::instrument(name = "dispatch", skip_all, fields(action = %action.kind()))]
    pub async fn dispatch_action(&self, action: Action) -> Result<Outcome, DispatchError> {
        let kind = Self::route(&action);
        self.submit(kind, Payload::from(action)).await
    }

    /// Write a log entry through an explicitly named transport.
    ///
    /// `severity` only matters for the queue transport.
    #[tracing::instrument(name = "dispatch_log", skip_all, fields(via = %via))]
    pub async fn dispatch_log(
        &self,
        via: &str,
        entry: LogPayload,
        severity: Severity,
    ) -> Result<Outcome, DispatchError> {
        let kind = TransportKind::parse(via)
            .ok_or_else(|| DispatchError::UnknownAction(format!("log via '{}'", via)))?;
        let payload = match kind {
            TransportKind::Queue => Payload::QueueLog { entry, severity },
            _ => Payload::WriteLog(entry),
        };
        self.submit(kind, payload).await
    }

    /// Fire-and-forget log path: returns after the broker confirms the
    /// publish, not after the entry is persisted.
    pub async fn dispatch_async(
        &self,
        entry: LogPayload,
        severity: Severity,
    ) -> Result<Outcome, DispatchError> {
        self.submit(TransportKind::Queue, Payload::QueueLog { entry, severity })
            .await
    }

    async fn submit(&self, kind: TransportKind, payload: Payload) -> Result<Outcome, DispatchError> {
        let transport = self.transports.get(kind);
        let label = payload.label();

        match tokio::time::timeout(self.call_timeout, transport.submit(payload)).await {
            Ok(Ok(outcome)) => {
                debug!(transport = %kind, payload = label, "Backend call succeeded");
                Ok(outcome)
            }
            Ok(Err(e)) => {
                warn!(transport = %kind, payload = label, error = %e, "Backend call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    transport = %kind,
                    payload = label,
                    timeout = ?self.call_timeout,
                    "Backend call timed out"
                );
                Err(TransportError::Timeout(format!("no reply within {:?}", self.call_timeout)).into())
            }
        }
    }
}
