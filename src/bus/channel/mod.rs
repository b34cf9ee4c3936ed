//! In-memory topic exchange for single-process mode.
//!
//! Mirrors the broker semantics the forwarder relies on: durable named
//! queues, topic bindings, per-queue FIFO, explicit ack, and requeue with
//! the redelivered flag set. Ideal for local development and testing
//! without external dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{topic_matches, Delivery, Publisher, Result, Subscriber, Subscription};

#[derive(Debug, Clone)]
struct Message {
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    bindings: Vec<String>,
    messages: VecDeque<Message>,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Bumped by `disconnect`; subscriptions from an older epoch end.
    epoch: AtomicU64,
}

impl Queue {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_back(&self, message: Message) {
        self.state().messages.push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: Message) {
        self.state().messages.push_front(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.state().messages.pop_front()
    }
}

/// Process-local topic exchange.
#[derive(Default)]
pub struct ChannelExchange {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
}

impl ChannelExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, Arc<Queue>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of ready (undelivered or requeued) messages in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.queues()
            .get(queue)
            .map(|q| q.state().messages.len())
            .unwrap_or(0)
    }

    /// End every live subscription on `queue`, as a broker connection loss would.
    ///
    /// The queue and its messages survive; subscribers must re-subscribe.
    pub fn disconnect(&self, queue: &str) {
        if let Some(q) = self.queues().get(queue) {
            q.epoch.fetch_add(1, Ordering::SeqCst);
            q.notify.notify_waiters();
            info!(queue = %queue, "Channel subscriptions disconnected");
        }
    }
}

#[async_trait]
impl Publisher for ChannelExchange {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let matching: Vec<Arc<Queue>> = self
            .queues()
            .values()
            .filter(|q| {
                q.state()
                    .bindings
                    .iter()
                    .any(|pattern| topic_matches(pattern, routing_key))
            })
            .cloned()
            .collect();

        // Unroutable messages are dropped, as on a broker without `mandatory`.
        for queue in &matching {
            queue.push_back(Message {
                routing_key: routing_key.to_string(),
                body: body.clone(),
                redelivered: false,
            });
        }

        debug!(
            routing_key = %routing_key,
            queues = matching.len(),
            "Published to channel exchange"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscriber for ChannelExchange {
    async fn subscribe(&self, queue: &str, bindings: &[String]) -> Result<Box<dyn Subscription>> {
        let q = self
            .queues()
            .entry(queue.to_string())
            .or_default()
            .clone();

        {
            let mut state = q.state();
            for pattern in bindings {
                if !state.bindings.contains(pattern) {
                    state.bindings.push(pattern.clone());
                }
            }
        }

        info!(queue = %queue, bindings = ?bindings, "Bound channel queue");

        let epoch = q.epoch.load(Ordering::SeqCst);
        Ok(Box::new(ChannelSubscription { queue: q, epoch }))
    }
}

struct ChannelSubscription {
    queue: Arc<Queue>,
    epoch: u64,
}

impl ChannelSubscription {
    fn is_current(&self) -> bool {
        self.queue.epoch.load(Ordering::SeqCst) == self.epoch
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        loop {
            let notified = self.queue.notify.notified();
            if !self.is_current() {
                return None;
            }
            if let Some(message) = self.queue.pop() {
                return Some(Ok(Box::new(ChannelDelivery {
                    message,
                    queue: self.queue.clone(),
                    settled: false,
                })));
            }
            notified.await;
        }
    }
}

struct ChannelDelivery {
    message: Message,
    queue: Arc<Queue>,
    settled: bool,
}

impl ChannelDelivery {
    fn requeue_now(&mut self) {
        let mut message = self.message.clone();
        message.redelivered = true;
        self.queue.push_front(message);
        self.settled = true;
    }
}

#[async_trait]
impl Delivery for ChannelDelivery {
    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    async fn ack(&mut self) -> Result<()> {
        self.settled = true;
        Ok(())
    }

    async fn requeue(&mut self) -> Result<()> {
        if !self.settled {
            self.requeue_now();
        }
        Ok(())
    }
}

// An unsettled delivery goes back to the queue, like an unacked message on
// a closed AMQP channel.
impl Drop for ChannelDelivery {
    fn drop(&mut self) {
        if !self.settled {
            self.requeue_now();
        }
    }
}
