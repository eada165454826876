//! Bounded-backoff retry for persistence operations.
//!
//! Transient backend faults (connectivity, lock contention, timeouts) are
//! retried a fixed number of times with exponential delay; domain errors are
//! returned immediately. Exhaustion surfaces the last
//! [`PollError::StorageUnavailable`] to the caller.

use crate::errors::PollError;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry budget applied at the store boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Defaults to `3`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, doubled after each failure.
    /// Defaults to `50` ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 50 }
    }
}

/// Runs `op`, retrying transient failures within the policy's budget.
///
/// # Errors
///
/// Returns the operation's error unchanged: immediately for domain errors,
/// after the final attempt for transient ones.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &'static str,
    mut op: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PollError>>,
{
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    op = op_name,
                    attempt,
                    error = %err,
                    "transient storage failure, retrying"
                );
                metrics::record_storage_retry(op_name);
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
