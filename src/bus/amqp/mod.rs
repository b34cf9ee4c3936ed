//! AMQP (RabbitMQ) bus implementation.
//!
//! Publishes to a durable topic exchange with publisher confirms, and
//! consumes from durable queues bound with routing-key patterns.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use backon::BackoffBuilder;
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    message::Delivery as LapinDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Consumer, ExchangeKind,
};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::{BusError, Delivery, Publisher, Result, Subscriber, Subscription};
use crate::config::AmqpConfig;
use crate::utils::retry::publish_backoff;

/// Consumer tag used on every subscription.
const CONSUMER_TAG: &str = "switchyard-forwarder";

/// AMQP bus using RabbitMQ.
///
/// Log events are published to a topic exchange with routing key
/// `log.<SEVERITY>`. Subscribers bind durable queues with patterns like
/// `log.*` or `log.ERROR`.
pub struct AmqpBus {
    pool: Pool,
    exchange: String,
    /// Exchange declared once per process, on first use.
    declared: OnceCell<()>,
    /// Set after the first successful broker connection.
    connected: AtomicBool,
}

impl AmqpBus {
    /// Create a new AMQP bus. No connection is made until first use.
    pub fn new(config: &AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size.max(1))
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        Ok(Self {
            pool,
            exchange: config.exchange.clone(),
            declared: OnceCell::new(),
            connected: AtomicBool::new(false),
        })
    }

    /// Get a channel from the pool.
    ///
    /// The pool recycles broken connections, so a dropped broker connection is
    /// re-established here. Failing after an earlier success is a reconnect
    /// failure rather than a plain connection failure.
    async fn get_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            self.connection_error(format!("Failed to get connection from pool: {}", e))
        })?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| self.connection_error(format!("Failed to create channel: {}", e)))?;

        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(exchange = %self.exchange, "Connected to AMQP");
        }
        Ok(channel)
    }

    fn connection_error(&self, message: String) -> BusError {
        if self.connected.load(Ordering::SeqCst) {
            BusError::Reconnect(message)
        } else {
            BusError::Connection(message)
        }
    }

    async fn declare_exchange(&self, channel: &Channel) -> Result<()> {
        self.declared
            .get_or_try_init(|| async {
                channel
                    .exchange_declare(
                        &self.exchange,
                        ExchangeKind::Topic,
                        ExchangeDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BusError::Connection(format!("Failed to declare exchange: {}", e))
                    })?;
                debug!(exchange = %self.exchange, "Declared topic exchange");
                Ok::<_, BusError>(())
            })
            .await
            .map(|_| ())
    }

    /// Channel acquisition with bounded backoff. Publishing itself is not
    /// retried: a nack is reported to the caller.
    async fn publish_channel(&self) -> Result<Channel> {
        let mut backoff = publish_backoff().build();
        loop {
            match self.get_channel().await {
                Ok(channel) => return Ok(channel),
                Err(e) => match backoff.next() {
                    Some(delay) => {
                        warn!(error = %e, delay = ?delay, "Failed to get channel, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Declare, enable confirms, publish and await the broker's answer.
    async fn publish_on(&self, channel: &Channel, routing_key: &str, body: &[u8]) -> Result<()> {
        self.declare_exchange(channel).await?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Publish(format!("Failed to enable confirms: {}", e)))?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2); // persistent

        let confirm = channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {}", e)))?;

        if confirmation.is_nack() {
            error!(exchange = %self.exchange, "Broker rejected publish");
            return Err(BusError::Publish("Broker rejected publish".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %routing_key))]
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let channel = self.publish_channel().await?;
        let result = self.publish_on(&channel, routing_key, &body).await;

        // One channel per publish, closed on every path.
        if let Err(e) = channel.close(200, "OK").await {
            debug!(error = %e, "Failed to close publish channel");
        }

        if result.is_ok() {
            debug!(exchange = %self.exchange, "Published log event");
        }
        result
    }
}

#[async_trait]
impl Subscriber for AmqpBus {
    async fn subscribe(&self, queue: &str, bindings: &[String]) -> Result<Box<dyn Subscription>> {
        let channel = self.get_channel().await?;
        self.declare_exchange(&channel).await?;

        // One unacknowledged message in flight per consumer.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set prefetch: {}", e)))?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {}", e)))?;

        for routing_key in bindings {
            channel
                .queue_bind(
                    queue,
                    &self.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {}", e)))?;
        }

        info!(
            queue = %queue,
            bindings = ?bindings,
            "Bound queue to exchange"
        );

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        Ok(Box::new(AmqpSubscription {
            _channel: channel,
            consumer,
        }))
    }
}

struct AmqpSubscription {
    // Keeps the channel open for the consumer's lifetime.
    _channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next_delivery(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(Box::new(AmqpDelivery {
                routing_key: delivery.routing_key.to_string(),
                inner: delivery,
            }))),
            Err(e) => Some(Err(BusError::Subscribe(format!(
                "Consumer delivery error: {}",
                e
            )))),
        }
    }
}

struct AmqpDelivery {
    routing_key: String,
    inner: LapinDelivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn redelivered(&self) -> bool {
        self.inner.redelivered
    }

    async fn ack(&mut self) -> Result<()> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to ack: {}", e)))
    }

    async fn requeue(&mut self) -> Result<()> {
        self.inner
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to nack: {}", e)))
    }
}
