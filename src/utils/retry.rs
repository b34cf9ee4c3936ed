//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the consumer
//! re-subscribe policy and the bounded retry around broker channel
//! acquisition on publish.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::ReconnectConfig;

/// Backoff for re-subscribing after broker loss.
///
/// Bounded by `max_attempts` consecutive failures. Jitter enabled.
pub fn reconnect_backoff(config: &ReconnectConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts as usize)
        .with_jitter()
}

/// Backoff for acquiring a broker channel before a publish.
///
/// - Min delay: 50ms
/// - Max delay: 500ms
/// - Max attempts: 3
/// - Jitter enabled
///
/// Kept short: the caller is an inbound request waiting on the outcome.
pub fn publish_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(3)
        .with_jitter()
}
