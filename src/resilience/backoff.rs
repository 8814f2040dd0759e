//! Exponential backoff with jitter between failover attempts.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before trying the destination at `attempt` (0 = primary, no delay).
///
/// Doubles from `base_delay_ms` per attempt, capped at `max_delay_ms`, plus up
/// to 10% jitter.
pub fn failover_delay(attempt: u32, config: &RetryConfig) -> Duration {
    if attempt == 0 || config.base_delay_ms == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay_ms = config
        .base_delay_ms
        .saturating_mul(factor)
        .min(config.max_delay_ms);

    let jitter_ms = match delay_ms / 10 {
        0 => 0,
        range => rand::thread_rng().gen_range(0..range),
    };

    Duration::from_millis(delay_ms + jitter_ms)
}
