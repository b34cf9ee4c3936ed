//! switchyard-gateway: inbound HTTP gateway
//!
//! Serves the action envelope API and owns one client per wire protocol.
//!
//! ## Architecture
//! ```text
//! [Client] -> [switchyard-gateway] -> HTTP     -> [authentication / mailer]
//!                     |            -> JSON-RPC -> [logger]
//!                     |            -> gRPC     -> [logger]
//!                     v
//!              [logs_topic exchange] -> [switchyard-listener] -> [logger]
//! ```
//!
//! With `messaging.type: channel` the exchange is in-process and the
//! forwarder runs inside the gateway.
//!
//! ## Configuration
//! - First argument: optional config file path
//! - SWITCHYARD_CONFIG: config file path
//! - SWITCHYARD__*: per-field overrides (e.g. SWITCHYARD__SERVER__PORT)

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use switchyard::bus::init_messaging;
use switchyard::config::{Config, MessagingType};
use switchyard::dispatcher::Dispatcher;
use switchyard::handlers;
use switchyard::listener::QueueConsumer;
use switchyard::transport::TransportSet;
use switchyard::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting switchyard-gateway");

    let messaging = init_messaging(&config.messaging).map_err(|e| {
        error!("Failed to initialize messaging: {}", e);
        e
    })?;
    let transports = TransportSet::from_config(&config, messaging.publisher.clone())?;
    let dispatcher = Arc::new(Dispatcher::new(
        transports.clone(),
        config.timeouts.dispatch(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    // In-process exchange: nobody else can drain it, so forward here.
    let forwarder = if config.messaging.messaging_type == MessagingType::Channel {
        let consumer = QueueConsumer::new(
            messaging.subscriber.clone(),
            transports.http.clone(),
            config.messaging.consumer.clone(),
            config.timeouts.dispatch(),
        );
        let mut stop = stop_rx.clone();
        info!("Running in-process forwarder");
        Some(tokio::spawn(async move {
            consumer
                .run(async move {
                    let _ = stop.changed().await;
                })
                .await
        }))
    } else {
        None
    };

    let mut stop = stop_rx;
    handlers::serve(dispatcher, &config.server.addr(), async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = stop.changed() => {}
        }
    })
    .await
    .map_err(|e| {
        error!("Gateway server failed: {}", e);
        e
    })?;

    let _ = stop_tx.send(true);
    if let Some(forwarder) = forwarder {
        match forwarder.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Forwarder stopped: {}", e),
            Err(e) => error!("Forwarder task failed: {}", e),
        }
    }

    info!("Gateway stopped");
    Ok(())
}
