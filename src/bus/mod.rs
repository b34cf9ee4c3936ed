//! Message bus for the async log path.
//!
//! This module contains:
//! - `Publisher` trait: hands a serialized work item to a topic exchange
//! - `Subscriber` / `Subscription` / `Delivery` traits: consume with explicit ack/requeue
//! - `Severity`: routing-key derivation (`log.<SEVERITY>`)
//! - Implementations: AMQP (RabbitMQ), in-memory channel exchange

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBus;
pub use channel::ChannelExchange;

/// Topic exchange carrying log events.
pub const LOG_EXCHANGE: &str = "logs_topic";

/// Routing-key prefix for log events.
pub const LOG_ROUTING_PREFIX: &str = "log";

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Reconnect failed: {0}")]
    Reconnect(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// Publishes serialized work items to the log exchange.
///
/// Returns once the broker has confirmed the publish, not once a consumer
/// has handled it.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()>;
}

/// Opens subscriptions: declares a durable queue and binds it to the
/// exchange with each routing-key pattern.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, queue: &str, bindings: &[String]) -> Result<Box<dyn Subscription>>;
}

/// A live subscription handle.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the subscription ended.
    ///
    /// Waits indefinitely; idle consumption is the steady state.
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>>>;
}

/// One delivered message. Exactly one of `ack` / `requeue` settles it.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];

    fn routing_key(&self) -> &str;

    /// True when the broker has delivered this message before.
    fn redelivered(&self) -> bool;

    /// Acknowledge: the broker discards the message.
    async fn ack(&mut self) -> Result<()>;

    /// Negative-acknowledge with requeue: the broker redelivers the message.
    async fn requeue(&mut self) -> Result<()>;
}

// ============================================================================
// Routing
// ============================================================================

/// Log severity carried in the routing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning")]
    Warning,
    #[serde(alias = "error")]
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    /// Routing key of shape `log.<SEVERITY>`.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", LOG_ROUTING_PREFIX, self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AMQP topic matching: words are dot-separated, `*` matches exactly one
/// word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Publisher and subscriber halves of the configured messaging backend.
#[derive(Clone)]
pub struct Messaging {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
}

/// Initialize the messaging backend based on configuration.
///
/// Broker connections are established lazily on first publish/subscribe.
pub fn init_messaging(
    config: &MessagingConfig,
) -> std::result::Result<Messaging, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Amqp => {
            #[cfg(feature = "amqp")]
            {
                let bus = Arc::new(AmqpBus::new(&config.amqp)?);
                info!(messaging_type = "amqp", exchange = %config.amqp.exchange, "Messaging initialized");
                Ok(Messaging {
                    publisher: bus.clone(),
                    subscriber: bus,
                })
            }

            #[cfg(not(feature = "amqp"))]
            {
                Err("AMQP support requires the 'amqp' feature. Rebuild with --features amqp".into())
            }
        }
        MessagingType::Channel => {
            let exchange = Arc::new(ChannelExchange::new());
            info!(messaging_type = "channel", "Messaging initialized");
            Ok(Messaging {
                publisher: exchange.clone(),
                subscriber: exchange,
            })
        }
    }
}
