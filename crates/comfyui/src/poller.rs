//! Wait for a submitted prompt to finish.
//!
//! [`wait_for_completion`] polls the queue and history endpoints on a fixed
//! interval until the prompt completes, fails, the deadline passes or the
//! [`CancellationToken`] fires. Each state change is logged once.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApiError, JobBackend};
use crate::messages::HistoryEntry;
use crate::status::{observe, JobState};

/// Polling parameters.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between polls.
    pub interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
    /// Consecutive transient failures tolerated before the error is
    /// returned. Other errors end polling at once.
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
            max_consecutive_errors: 5,
        }
    }
}

impl PollConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Timed out after {}s waiting for prompt {prompt_id} (last state: {last_state})", .elapsed.as_secs())]
    Timeout {
        prompt_id: String,
        elapsed: Duration,
        last_state: JobState,
    },

    #[error("Prompt {prompt_id} failed: {message}")]
    Failed { prompt_id: String, message: String },

    #[error("Cancelled while waiting for prompt {0}")]
    Cancelled(String),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

/// A finished prompt.
#[derive(Debug, Clone)]
pub struct Completion {
    pub prompt_id: String,
    pub history: HistoryEntry,
    pub elapsed: Duration,
}

/// Poll until `prompt_id` reaches a terminal state.
pub async fn wait_for_completion<B: JobBackend>(
    backend: &B,
    prompt_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<Completion, PollError> {
    let start = Instant::now();
    let mut last_state = JobState::Unknown;
    let mut logged_label: Option<&'static str> = None;
    let mut consecutive_errors = 0u32;

    loop {
        let remaining = config.timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(PollError::Timeout {
                prompt_id: prompt_id.to_string(),
                elapsed: start.elapsed(),
                last_state,
            });
        }

        let polled = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(prompt_id, "Polling cancelled");
                return Err(PollError::Cancelled(prompt_id.to_string()));
            }
            polled = tokio::time::timeout(remaining, observe(backend, prompt_id)) => polled,
        };

        match polled {
            // Deadline hit mid-request; the top of the loop reports it.
            Err(_) => continue,
            Ok(Ok(observation)) => {
                consecutive_errors = 0;
                let state = observation.state;
                if logged_label != Some(state.label()) {
                    logged_label = Some(state.label());
                    tracing::info!(
                        prompt_id,
                        state = %state,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Job state changed",
                    );
                }

                match state {
                    JobState::Completed => {
                        return Ok(Completion {
                            prompt_id: prompt_id.to_string(),
                            history: observation.history.unwrap_or_default(),
                            elapsed: start.elapsed(),
                        });
                    }
                    JobState::Failed { message } => {
                        return Err(PollError::Failed {
                            prompt_id: prompt_id.to_string(),
                            message,
                        });
                    }
                    other => last_state = other,
                }
            }
            Ok(Err(e)) if !e.is_transient() => {
                tracing::warn!(prompt_id, error = %e, "Poll failed");
                return Err(PollError::Api(e));
            }
            Ok(Err(e)) => {
                consecutive_errors += 1;
                tracing::warn!(
                    prompt_id,
                    error = %e,
                    "Poll attempt {consecutive_errors} failed",
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    return Err(PollError::Api(e));
                }
            }
        }

        // Wait before the next poll, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled(prompt_id.to_string())),
            _ = tokio::time::sleep(config.interval.min(remaining)) => {}
        }
    }
}
