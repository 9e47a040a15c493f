//! Delay schedules for retrying work, and a cancellable wait.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy with exponential backoff.
///
/// `delay_for(n)` is the wait before retry `n` (zero-based):
/// `min(initial * factor^n, max)`. A factor of 1.0 gives a fixed delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(max_retries: u32, initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            backoff_factor: factor.max(1.0),
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_retries,
            initial_delay_ms: ms,
            max_delay_ms: ms,
            backoff_factor: 1.0,
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let scaled = self.initial_delay_ms as f64 * self.backoff_factor.powi(retry as i32);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// The full sequence of waits this policy will make.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|n| self.delay_for(n))
    }
}

/// Returned when a wait was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait cancelled")]
pub struct Cancelled;

/// Sleeps for `delay` unless `cancel` fires first. Cancellation wins ties.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000]);
    }

    #[test]
    fn test_fixed_schedule() {
        let policy = BackoffPolicy::fixed(2, Duration::from_secs(2));
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(7), Duration::from_secs(2));
        assert_eq!(policy.delays().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes_after_delay() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        wait(Duration::from_secs(3), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_aborts_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert_eq!(wait(Duration::from_secs(10), &cancel).await, Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
