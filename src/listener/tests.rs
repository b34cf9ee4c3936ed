use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::ReconnectConfig;
use crate::transport::{MockTransport, TransportKind};

fn sink() -> MockTransport {
    MockTransport::new(TransportKind::Http)
}

const ENTRY: &[u8] = br#"{"name":"test-event","data":"hello"}"#;

#[tokio::test]
async fn test_forward_success_acks() {
    let sink = sink();
    let disposition = handle_delivery(ENTRY, &sink, Duration::from_secs(1)).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(
        sink.take_submitted().await,
        vec![Payload::WriteLog(LogPayload {
            name: "test-event".into(),
            data: "hello".into(),
        })]
    );
}

#[tokio::test]
async fn test_poison_message_acks_without_forwarding() {
    let sink = sink();
    let bodies: [&[u8]; 3] = [b"not json", br#"{"name":1}"#, b""];
    for body in bodies {
        assert_eq!(
            handle_delivery(body, &sink, Duration::from_secs(1)).await,
            Disposition::Ack
        );
    }
    assert_eq!(sink.submitted_count().await, 0);
}

#[tokio::test]
async fn test_transient_failure_requeues() {
    let sink = sink();
    sink.push_failure(TransportError::Unreachable("refused".into()))
        .await;
    sink.push_failure(TransportError::Reconnect("refused".into()))
        .await;

    assert_eq!(
        handle_delivery(ENTRY, &sink, Duration::from_secs(1)).await,
        Disposition::Requeue
    );
    assert_eq!(
        handle_delivery(ENTRY, &sink, Duration::from_secs(1)).await,
        Disposition::Requeue
    );
}

#[tokio::test]
async fn test_application_failure_acks() {
    let sink = sink();
    sink.push_failure(TransportError::Application {
        message: "name too long".into(),
        status: Some(422),
    })
    .await;

    assert_eq!(
        handle_delivery(ENTRY, &sink, Duration::from_secs(1)).await,
        Disposition::Ack
    );
}

#[tokio::test]
async fn test_slow_forward_requeues() {
    let sink = sink();
    sink.set_delay(Duration::from_secs(5)).await;

    assert_eq!(
        handle_delivery(ENTRY, &sink, Duration::from_millis(20)).await,
        Disposition::Requeue
    );
}

#[tokio::test]
async fn test_rejects_empty_bindings() {
    let consumer = QueueConsumer::new(
        Arc::new(crate::bus::ChannelExchange::new()),
        Arc::new(sink()),
        ConsumerConfig {
            bindings: vec![],
            ..Default::default()
        },
        Duration::from_secs(1),
    );

    let result = consumer.run(std::future::pending()).await;
    assert!(matches!(result, Err(ConsumerError::Config(_))));
}

#[tokio::test]
async fn test_shutdown_before_first_message() {
    let consumer = QueueConsumer::new(
        Arc::new(crate::bus::ChannelExchange::new()),
        Arc::new(sink()),
        ConsumerConfig::default(),
        Duration::from_secs(1),
    );
    let state = consumer.state();

    consumer
        .run(tokio::time::sleep(Duration::from_millis(20)))
        .await
        .unwrap();
    assert_eq!(*state.borrow(), ConsumerState::Disconnected);
}

/// Broker that accepts every subscription and ends it straight away.
#[derive(Default)]
struct FlappingBroker {
    subscribes: AtomicUsize,
}

struct EndedSubscription;

#[async_trait]
impl Subscription for EndedSubscription {
    async fn next_delivery(&mut self) -> Option<crate::bus::Result<Box<dyn Delivery>>> {
        None
    }
}

#[async_trait]
impl Subscriber for FlappingBroker {
    async fn subscribe(
        &self,
        _queue: &str,
        _bindings: &[String],
    ) -> crate::bus::Result<Box<dyn Subscription>> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EndedSubscription))
    }
}

#[tokio::test]
async fn test_flapping_subscription_backs_off_and_gives_up() {
    let broker = Arc::new(FlappingBroker::default());
    let consumer = QueueConsumer::new(
        broker.clone(),
        Arc::new(sink()),
        ConsumerConfig {
            reconnect: ReconnectConfig {
                max_attempts: 3,
                min_delay_ms: 10,
                max_delay_ms: 1000,
            },
            ..Default::default()
        },
        Duration::from_secs(1),
    );

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), consumer.run(std::future::pending()))
        .await
        .expect("consumer should give up");

    match result {
        Err(ConsumerError::BrokerLost { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected BrokerLost, got {:?}", other),
    }
    assert_eq!(broker.subscribes.load(Ordering::SeqCst), 3);
    // Two delays of at least min_delay separate the three subscribes.
    assert!(started.elapsed() >= Duration::from_millis(20));
}
