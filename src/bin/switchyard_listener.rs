//! switchyard-listener: queue consumer / forwarder
//!
//! Binds a durable queue to the log exchange and forwards every log entry
//! to the logging capability over HTTP.
//!
//! ## Architecture
//! ```text
//! [logs_topic] --log.*--> [logs.forwarder queue] -> [switchyard-listener] -> [logger /log]
//! ```
//!
//! Exits non-zero once the broker stays unreachable for
//! `messaging.consumer.reconnect.max_attempts` consecutive subscribe
//! attempts, leaving restarts to the supervisor.

use std::sync::Arc;

use tracing::{error, info};

use switchyard::bus::init_messaging;
use switchyard::config::Config;
use switchyard::listener::QueueConsumer;
use switchyard::transport::HttpTransport;
use switchyard::utils::bootstrap::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        queue = %config.messaging.consumer.queue,
        bindings = ?config.messaging.consumer.bindings,
        "Starting switchyard-listener"
    );

    let messaging = init_messaging(&config.messaging).map_err(|e| {
        error!("Failed to initialize messaging: {}", e);
        e
    })?;
    let sink = Arc::new(HttpTransport::new(&config.backends, &config.timeouts)?);

    let consumer = QueueConsumer::new(
        messaging.subscriber,
        sink,
        config.messaging.consumer.clone(),
        config.timeouts.dispatch(),
    );

    consumer.run(shutdown_signal()).await.map_err(|e| {
        error!("Listener stopped: {}", e);
        e
    })?;

    info!("Listener stopped");
    Ok(())
}
