//! Retry with capped exponential backoff
//!
//! Generic wrapper shared by the write path (single `SET`) and the read path
//! (one multi-get per fetch group).
//!
//! ## Schedule
//! ```text
//! attempt:  1      2        3        ...  n
//! delay:    -   base·2⁰  base·2¹    ...  min(base·2ⁿ⁻², max)
//! ```
//! No delay follows the final attempt; its error is handed back to the caller.

use std::future::Future;
use std::time::Duration;

use crate::error::ChunkError;

/// Bounded retry budget with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay slept after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay slept when all attempts fail
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }
}

/// Final failure of a retried operation
#[derive(Debug)]
pub struct Exhausted {
    /// Attempts made before giving up
    pub attempts: u32,

    /// Error of the last attempt
    pub last: ChunkError,
}

/// Run `op` until it succeeds, the budget is spent, or it fails with a
/// non-retriable error.
///
/// `label` only feeds the retry log lines.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> std::result::Result<T, Exhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts || !err.is_retriable() {
                    return Err(Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "Attempt {}/{} for {} failed: {}. Retrying in {:?}",
                    attempt,
                    max_attempts,
                    label,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = RetryPolicy::new(8, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_schedule_has_one_delay_less_than_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );

        let single = RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(60));
        assert!(single.schedule().is_empty());
    }
}
