//! Queue consumer / forwarder.
//!
//! Binds a durable queue to the log exchange, then forwards each delivered
//! log entry to the logging capability over a synchronous transport.
//!
//! Acknowledgment discipline:
//! - undecodable body: acked and dropped (poison message)
//! - forward succeeded, or the backend explicitly rejected the entry: acked
//! - backend unreachable or timed out: requeued for redelivery
//!
//! Forwarding is therefore at-least-once; the logging capability must
//! tolerate duplicate entries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, Subscriber, Subscription};
use crate::config::ConsumerConfig;
use crate::envelope::LogPayload;
use crate::transport::{Payload, Transport, TransportError};
use crate::utils::retry::reconnect_backoff;

/// Observable consumer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Subscribing,
    Listening,
    Handling,
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

/// Errors that stop the consumer.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("broker lost after {attempts} failed subscribe attempts: {last_error}")]
    BrokerLost { attempts: u32, last_error: String },

    #[error("invalid consumer configuration: {0}")]
    Config(String),
}

/// Decode one delivery and forward it, bounded by `timeout`.
pub async fn handle_delivery(body: &[u8], sink: &dyn Transport, timeout: Duration) -> Disposition {
    let entry: LogPayload = match serde_json::from_slice(body) {
        Ok(entry) => entry,
        Err(e) => {
            error!(error = %e, bytes = body.len(), "Dropping undecodable message");
            return Disposition::Ack;
        }
    };

    let name = entry.name.clone();
    match tokio::time::timeout(timeout, sink.submit(Payload::WriteLog(entry))).await {
        Ok(Ok(_)) => {
            debug!(name = %name, "Forwarded log entry");
            Disposition::Ack
        }
        Ok(Err(e)) => classify_failure(&name, &e),
        Err(_) => {
            warn!(name = %name, timeout = ?timeout, "Forward timed out, requeueing");
            Disposition::Requeue
        }
    }
}

fn classify_failure(name: &str, err: &TransportError) -> Disposition {
    if err.is_transient() {
        warn!(name = %name, error = %err, "Forward failed, requeueing");
        Disposition::Requeue
    } else {
        warn!(name = %name, error = %err, "Backend rejected log entry, dropping");
        Disposition::Ack
    }
}

/// How a drained subscription ended.
enum ConsumeEnd {
    Shutdown,
    /// The subscription ended after settling `settled` deliveries.
    Lost { settled: u64 },
}

/// Long-lived consumer that drains one queue, one message at a time.
pub struct QueueConsumer {
    subscriber: Arc<dyn Subscriber>,
    sink: Arc<dyn Transport>,
    config: ConsumerConfig,
    call_timeout: Duration,
    state: watch::Sender<ConsumerState>,
}

impl QueueConsumer {
    pub fn new(
        subscriber: Arc<dyn Subscriber>,
        sink: Arc<dyn Transport>,
        config: ConsumerConfig,
        call_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            subscriber,
            sink,
            config,
            call_timeout,
            state,
        }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Consume until `shutdown` resolves or the broker is lost for good.
    ///
    /// Every re-subscribe, whether after a failed subscribe or a lost
    /// subscription, waits one backoff delay. `reconnect.max_attempts`
    /// consecutive failures end the run with [`ConsumerError::BrokerLost`].
    /// A subscription counts as healthy, resetting the count, once it has
    /// settled a delivery or stayed up for `reconnect.max_delay_ms`.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), ConsumerError> {
        if self.config.queue.is_empty() {
            return Err(ConsumerError::Config("queue name is empty".to_string()));
        }
        if self.config.bindings.is_empty() {
            return Err(ConsumerError::Config("no routing-key bindings".to_string()));
        }

        tokio::pin!(shutdown);
        let mut backoff = reconnect_backoff(&self.config.reconnect).build();
        let mut attempts: u32 = 0;

        loop {
            self.set_state(ConsumerState::Subscribing);
            let subscribed = tokio::select! {
                _ = &mut shutdown => break,
                result = self.subscriber.subscribe(&self.config.queue, &self.config.bindings) => result,
            };

            let (failure, counted) = match subscribed {
                Ok(subscription) => {
                    info!(
                        queue = %self.config.queue,
                        bindings = ?self.config.bindings,
                        "Listening for log events"
                    );
                    let started = Instant::now();
                    let settled = match self.consume(subscription, &mut shutdown).await {
                        ConsumeEnd::Shutdown => break,
                        ConsumeEnd::Lost { settled } => settled,
                    };
                    let healthy = settled > 0 || started.elapsed() >= self.stable_after();
                    if healthy {
                        attempts = 0;
                        backoff = reconnect_backoff(&self.config.reconnect).build();
                    }
                    warn!(queue = %self.config.queue, settled, "Subscription lost");
                    ("subscription ended".to_string(), !healthy)
                }
                Err(e) => {
                    warn!(error = %e, "Subscribe failed");
                    (e.to_string(), true)
                }
            };

            self.set_state(ConsumerState::Disconnected);
            if counted {
                attempts += 1;
            }
            let delay = match backoff.next() {
                Some(delay) if !counted || attempts < self.config.reconnect.max_attempts => delay,
                _ => {
                    error!(error = %failure, attempts, "Giving up on broker");
                    return Err(ConsumerError::BrokerLost {
                        attempts,
                        last_error: failure,
                    });
                }
            };
            debug!(attempt = attempts, delay = ?delay, "Re-subscribing after delay");
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConsumerState::Disconnected);
        info!(queue = %self.config.queue, "Consumer stopped");
        Ok(())
    }

    fn stable_after(&self) -> Duration {
        Duration::from_millis(self.config.reconnect.max_delay_ms)
    }

    /// Drain a subscription until shutdown or until the subscription ends.
    async fn consume<S>(&self, mut subscription: Box<dyn Subscription>, shutdown: &mut S) -> ConsumeEnd
    where
        S: Future<Output = ()> + Unpin,
    {
        let mut settled: u64 = 0;
        loop {
            self.set_state(ConsumerState::Listening);
            let next = tokio::select! {
                _ = &mut *shutdown => return ConsumeEnd::Shutdown,
                next = subscription.next_delivery() => next,
            };

            let mut delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(error = %e, "Delivery failed");
                    return ConsumeEnd::Lost { settled };
                }
                None => return ConsumeEnd::Lost { settled },
            };

            self.set_state(ConsumerState::Handling);
            if delivery.redelivered() {
                debug!(routing_key = %delivery.routing_key(), "Handling redelivered message");
            }

            let disposition = handle_delivery(delivery.body(), self.sink.as_ref(), self.call_timeout).await;
            if let Err(e) = self.settle(delivery.as_mut(), disposition).await {
                warn!(error = %e, "Failed to settle delivery");
                return ConsumeEnd::Lost { settled };
            }
            settled += 1;

            if disposition == Disposition::Requeue {
                tokio::select! {
                    _ = &mut *shutdown => return ConsumeEnd::Shutdown,
                    _ = tokio::time::sleep(self.config.requeue_delay()) => {}
                }
            }
        }
    }

    async fn settle(
        &self,
        delivery: &mut dyn Delivery,
        disposition: Disposition,
    ) -> crate::bus::Result<()> {
        match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Requeue => delivery.requeue().await,
        }
    }
}

#[cfg(test)]
mod tests;
