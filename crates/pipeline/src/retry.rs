//! Linear-backoff retry for GPU-bound post-processing steps.
//!
//! A step that fails right after a generation often does so because the
//! server still holds GPU memory. [`RetryPolicy::run`] re-runs the step
//! after a growing pause until it succeeds, fails with a non-retryable
//! error, runs out of attempts, or the [`CancellationToken`] fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Tunable parameters for the linear-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Pause before attempt `n` (n >= 2) is `step * n`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Pause before the given 1-based attempt. Zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.step * attempt
        }
    }

    /// Run `op` until it succeeds. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tracing::info!(
                    step = label,
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs(),
                    "Retrying after pause",
                );
                // Wait before the next attempt, respecting cancellation.
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(step = label, attempt, "Succeeded on retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_cancelled() || !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(step = label, error = %e, "All {max_attempts} attempts failed");
                    return Err(PipelineError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        step = label,
                        error = %e,
                        "Attempt {attempt}/{max_attempts} failed",
                    );
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn crash() -> PipelineError {
        PipelineError::ProcessFailed {
            program: "python".into(),
            exit_code: Some(1),
            stderr: String::new(),
        }
    }

    #[test]
    fn linear_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(4));
        assert_eq!(policy.delay_before(3), Duration::from_secs(6));
    }

    #[test]
    fn custom_step() {
        let policy = RetryPolicy {
            step: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.delay_before(3), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let policy = RetryPolicy {
            step: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result = policy
            .run("test", &CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(crash())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            step: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let err = policy
            .run("test", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(crash()) }
            })
            .await
            .unwrap_err();

        assert_matches!(err, PipelineError::RetriesExhausted { attempts: 3, .. });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("test", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(PipelineError::TooFewFrames(1)) }
            })
            .await
            .unwrap_err();

        assert_matches!(err, PipelineError::TooFewFrames(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_token_stops_retry() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::default();

        let err = policy
            .run("test", &cancel, |_| {
                // Cancel after the first failure; the pause must observe it.
                cancel.cancel();
                async { Err::<(), _>(crash()) }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }
}
