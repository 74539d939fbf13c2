//! # Retry Manager
//!
//! Generic bounded retry with a fixed delay between attempts. Intended for
//! coarse-grained recovery (e.g., an entire episode-transition sequence),
//! not for idempotency-sensitive operations: the caller owns side-effect
//! awareness of the wrapped operation.
//!
//! `execute` never returns an error; exhaustion is communicated through the
//! [`RetryOutcome`]. There is no external cancellation — a caller wanting
//! early abort must make the wrapped operation itself abort-aware.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_millis(2000),
        }
    }
}

/// The result of a retried operation. Never an `Err`: inspect `success`.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    /// Attempts actually made (1-based).
    pub attempts: u32,
    pub total_duration: Duration,
    /// Display form of the final error when every attempt failed.
    pub last_error: Option<String>,
}

/// Bounded fixed-backoff retry executor.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` up to `max_retries + 1` times.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> RetryOutcome<T>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_observer(operation, |_, _| {}).await
    }

    /// Run `operation`, invoking `on_retry(attempt, error)` before each wait.
    ///
    /// The observer sees the attempt number that just failed; it is the hook
    /// retry call sites use for telemetry.
    pub async fn execute_with_observer<T, E, F, Fut, O>(
        &self,
        mut operation: F,
        mut on_retry: O,
    ) -> RetryOutcome<T>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(u32, &E),
    {
        let started = Instant::now();
        let total_attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=total_attempts {
            match operation().await {
                Ok(data) => {
                    debug!(attempt, "Operation succeeded");
                    return RetryOutcome {
                        success: true,
                        data: Some(data),
                        attempts: attempt,
                        total_duration: started.elapsed(),
                        last_error: None,
                    };
                }
                Err(e) => {
                    warn!(attempt, total_attempts, error = %e, "Operation attempt failed");
                    if attempt < total_attempts {
                        on_retry(attempt, &e);
                    }
                    last_error = Some(e.to_string());
                }
            }

            if attempt < total_attempts {
                tokio::time::sleep(self.config.delay).await;
            }
        }

        RetryOutcome {
            success: false,
            data: None,
            attempts: total_attempts,
            total_duration: started.elapsed(),
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_manager(max_retries: u32) -> RetryManager {
        RetryManager::new(RetryConfig {
            max_retries,
            delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let manager = fast_manager(5);
        let outcome = manager
            .execute(|| async { Ok::<_, String>(42) })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.data, Some(42));
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.last_error.is_none());
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let manager = fast_manager(5);
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = Arc::clone(&calls);
        let outcome = manager
            .execute(move || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reported_through_outcome_not_error() {
        let manager = fast_manager(2);
        let outcome: RetryOutcome<()> = manager
            .execute(|| async { Err::<(), _>("broken") })
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3, "max_retries + 1 attempts");
        assert_eq!(outcome.last_error.as_deref(), Some("broken"));
        assert!(outcome.data.is_none());
    }

    #[tokio::test]
    async fn test_observer_sees_each_failed_attempt_but_not_the_last() {
        let manager = fast_manager(2);
        let observed = Arc::new(std::sync::Mutex::new(Vec::new()));

        let observed_clone = Arc::clone(&observed);
        let _: RetryOutcome<()> = manager
            .execute_with_observer(
                || async { Err::<(), _>("nope") },
                move |attempt, error: &&str| {
                    observed_clone.lock().unwrap().push((attempt, error.to_string()));
                },
            )
            .await;

        // Called before each wait: after attempts 1 and 2, not after the final.
        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].0, 1);
        assert_eq!(observed[1].0, 2);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let manager = fast_manager(0);
        let outcome: RetryOutcome<()> = manager
            .execute(|| async { Err::<(), _>("once") })
            .await;

        assert_eq!(outcome.attempts, 1);
    }
}
