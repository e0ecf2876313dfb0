//! Per-item exponential failure backoff for the work queue
//!
//! Every failed attempt for an item doubles its next requeue delay until the cap is
//! reached. `forget` wipes the history so the next failure starts at the base delay.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

/// Base delay for the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Maximum delay between retries
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Decides how long an item waits before it is handed out again
pub trait RateLimiter<K>: Send + Sync {
    /// Record a failure for `item` and return the delay before its next attempt
    fn when(&self, item: &K) -> Duration;

    /// Drop the failure history of `item`
    fn forget(&self, item: &K);

    /// Failures recorded for `item` since the last `forget`
    fn num_requeues(&self, item: &K) -> u32;
}

/// Exponential backoff keyed by item: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ExponentialBackoff<K> {
    // std Mutex so queue operations stay synchronous
    failures: Mutex<HashMap<K, u32>>,
    base: Duration,
    max: Duration,
}

impl<K> ExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base,
            max,
        }
    }
}

impl<K> Default for ExponentialBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Delay for the given number of previous failures
fn backoff_delay(base: Duration, max: Duration, previous_failures: u32) -> Duration {
    // 2^31 already exceeds any sane cap
    let factor = 2u32.saturating_pow(previous_failures.min(31));
    base.checked_mul(factor).unwrap_or(max).min(max)
}

impl<K> RateLimiter<K> for ExponentialBackoff<K>
where
    K: Eq + Hash + Clone + Send,
{
    fn when(&self, item: &K) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = backoff_delay(self.base, self.max, *count);
        *count = count.saturating_add(1);

        debug!(
            attempt = *count,
            delay_ms = delay.as_millis() as u64,
            "Computed retry backoff"
        );
        delay
    }

    fn forget(&self, item: &K) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(item);
    }

    fn num_requeues(&self, item: &K) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(item).copied().unwrap_or(0)
    }
}
