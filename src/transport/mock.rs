//! Mock transport for testing.
//!
//! Records every submitted payload and answers with scripted results.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Outcome, Payload, Result, Transport, TransportError, TransportKind};

/// Mock transport for testing.
pub struct MockTransport {
    kind: TransportKind,
    submitted: RwLock<Vec<Payload>>,
    /// Consumed front-first; once empty every call succeeds.
    scripted: RwLock<VecDeque<Result<Outcome>>>,
    delay: RwLock<Option<Duration>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            submitted: RwLock::new(Vec::new()),
            scripted: RwLock::new(VecDeque::new()),
            delay: RwLock::new(None),
        }
    }

    /// Queue the result of the next call.
    pub async fn push_result(&self, result: Result<Outcome>) {
        self.scripted.write().await.push_back(result);
    }

    /// Queue a failure for the next call.
    pub async fn push_failure(&self, err: TransportError) {
        self.push_result(Err(err)).await;
    }

    /// Delay every call, to exercise caller timeouts.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn submitted_count(&self) -> usize {
        self.submitted.read().await.len()
    }

    pub async fn take_submitted(&self) -> Vec<Payload> {
        std::mem::take(&mut *self.submitted.write().await)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn submit(&self, payload: Payload) -> Result<Outcome> {
        self.submitted.write().await.push(payload);
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.scripted
            .write()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Outcome::message("ok")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::LogPayload;

    #[tokio::test]
    async fn test_mock_records_and_scripts() {
        let mock = MockTransport::new(TransportKind::Rpc);
        mock.push_failure(TransportError::Timeout("slow".into())).await;

        let payload = Payload::WriteLog(LogPayload::default());
        assert!(mock.submit(payload.clone()).await.is_err());
        assert_eq!(mock.submit(payload.clone()).await.unwrap().message, "ok");

        assert_eq!(mock.submitted_count().await, 2);
        assert_eq!(mock.take_submitted().await, vec![payload.clone(), payload]);
        assert_eq!(mock.submitted_count().await, 0);
    }
}
