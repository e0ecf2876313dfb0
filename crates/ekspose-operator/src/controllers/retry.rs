//! Retry policy for failed reconciliations
//!
//! Errors are classified as transient or permanent. Transient failures are
//! requeued with the work queue's per-key exponential backoff until the retry
//! budget is spent; permanent failures and exhausted budgets wait for the next
//! watch event for the same Deployment.

use tracing::{debug, warn};

/// Error classification for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network issues, API server unavailability, throttling, write conflicts
    Transient,
    /// Objects that already exist or are already gone, rejected requests
    Permanent,
}

/// What to do with a key after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue with backoff
    Requeue,
    /// Forget the key until a new event arrives for it
    GiveUp,
}

/// Decide whether failed attempt number `attempt` (1-based) is retried
pub fn decide(attempt: u32, max_retries: u32, kind: ErrorKind) -> RetryDecision {
    match kind {
        ErrorKind::Transient if attempt <= max_retries => {
            debug!(attempt, max_retries, "Scheduling retry with exponential backoff");
            RetryDecision::Requeue
        }
        ErrorKind::Transient => {
            warn!(
                attempt,
                max_retries,
                "Max retries exceeded, waiting for next Deployment event"
            );
            RetryDecision::GiveUp
        }
        ErrorKind::Permanent => {
            warn!("Permanent error, waiting for next Deployment event");
            RetryDecision::GiveUp
        }
    }
}
