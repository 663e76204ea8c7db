//! Retry delay policies for the two platform connections.

use std::time::Duration;

use backon::BackoffBuilder;

/// Default pause between hub handshake attempts.
pub const DEFAULT_HUB_RETRY_DELAY: Duration = Duration::from_millis(700);

/// Constant-delay, unbounded retry sequence for the hub handshake.
///
/// Connectivity is assumed eventually restorable, so this never runs dry.
pub fn hub_retry(delay: Duration) -> impl Iterator<Item = Duration> {
    backon::ConstantBuilder::default()
        .with_delay(delay)
        .without_max_times()
        .build()
}

/// Exponential backoff for re-running the guild connection pump.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
pub fn guild_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}
