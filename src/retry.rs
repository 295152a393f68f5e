//! Optimistic-concurrency retry.
//!
//! Writers that read-modify-write a resource wrap the whole sequence in
//! [`retry_on_conflict`]. When the API server rejects the write with a
//! resource-version conflict the closure runs again from the read, so the
//! mutation is always computed against fresh state.
//!
//! ```ignore
//! retry_on_conflict(&cfg.retry, "update targetSize", || async {
//!     let mut vas = client.get_autoscaler(ns, name).await?;
//!     vas.spec.target_size = size;
//!     client.replace_autoscaler(&vas).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Result;

/// Backoff applied between conflicting writes.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub steps: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: f64,
    /// Random extra delay, as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_delay: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn with_steps(steps: u32) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + extra))
    }
}

/// Run `operation` until it succeeds, fails with anything other than a
/// conflict, or the configured number of steps is used up. On exhaustion
/// the last conflict is returned.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = config.steps.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < steps => {
                let wait = config.jittered(delay);
                debug!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = wait.as_millis() as u64,
                    "Write conflict, retrying"
                );
                tokio::time::sleep(wait).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.factor);
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(operation = %operation_name, attempt, "Conflict retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperatorError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(steps: u32) -> RetryConfig {
        RetryConfig {
            steps,
            initial_delay: Duration::from_millis(1),
            factor: 1.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result = retry_on_conflict(&fast(3), "op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_on_conflict(&fast(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OperatorError::conflict("vas"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_on_conflict(&fast(5), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(OperatorError::not_found("vdb"))
            }
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_conflict() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_on_conflict(&fast(3), "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(OperatorError::conflict("vdb"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
