//! Submit a bound prompt, wait for it and locate the result.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use comfyctl_comfyui::outputs;
use comfyctl_comfyui::{wait_for_completion, ComfyUIApi, PollConfig, SubmitResponse};
use comfyctl_core::api_prompt::ApiPrompt;
use comfyctl_core::generation::BoundPrompt;
use comfyctl_core::naming;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Named phase durations, in the order recorded.
#[derive(Debug, Clone, Default)]
pub struct Timings {
    phases: Vec<(&'static str, Duration)>,
}

impl Timings {
    pub fn record(&mut self, phase: &'static str, elapsed: Duration) {
        self.phases.push((phase, elapsed));
    }

    pub fn get(&self, phase: &str) -> Option<Duration> {
        self.phases.iter().find(|(p, _)| *p == phase).map(|(_, d)| *d)
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|(_, d)| *d).sum()
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (phase, elapsed) in &self.phases {
            writeln!(f, "  {phase:<14} {}", naming::format_time(elapsed.as_secs_f64()))?;
        }
        write!(f, "  {:<14} {}", "total", naming::format_time(self.total().as_secs_f64()))
    }
}

/// A finished generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub prompt_id: String,
    pub seed: u64,
    pub video: PathBuf,
    pub timings: Timings,
}

/// Drives prompts through one server.
#[derive(Debug, Clone)]
pub struct JobRunner {
    api: ComfyUIApi,
    output_root: PathBuf,
    poll_interval: Duration,
    client_id: String,
}

impl JobRunner {
    pub fn new(api: ComfyUIApi, output_root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            api,
            output_root: output_root.into(),
            poll_interval,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Validate references and queue a prompt.
    pub async fn submit(&self, prompt: &ApiPrompt) -> Result<SubmitResponse, PipelineError> {
        prompt.validate_references()?;
        let body = prompt.to_value()?;
        let response = self.api.submit_prompt(&body, &self.client_id).await?;
        if !response.node_errors.is_empty() {
            tracing::warn!(
                prompt_id = %response.prompt_id,
                nodes = response.node_errors.len(),
                "Server reported node errors on submission",
            );
        }
        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            nodes = prompt.nodes.len(),
            "Prompt queued",
        );
        Ok(response)
    }

    /// Submit `bound`, wait up to `timeout`, and resolve the output video.
    ///
    /// On cancellation the running prompt is interrupted and removed from
    /// the queue before [`PipelineError::Cancelled`] is returned.
    pub async fn run(
        &self,
        bound: &BoundPrompt,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, PipelineError> {
        let mut timings = Timings::default();

        let started = Instant::now();
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            submitted = self.submit(&bound.prompt) => submitted?,
        };
        timings.record("submit", started.elapsed());

        let config = PollConfig::default()
            .with_interval(self.poll_interval)
            .with_timeout(timeout);
        let started = Instant::now();
        let completion = match wait_for_completion(&self.api, &submitted.prompt_id, &config, cancel).await {
            Ok(completion) => completion,
            Err(e) => {
                let e = PipelineError::from(e);
                if e.is_cancelled() {
                    self.abort(&submitted.prompt_id).await;
                }
                return Err(e);
            }
        };
        timings.record("generation", started.elapsed());

        let video = outputs::resolve_output(
            Some(&completion.history),
            &self.output_root,
            Some(&bound.source_name),
        )
        .ok_or_else(|| PipelineError::NoOutput {
            prompt_id: submitted.prompt_id.clone(),
        })?;

        tracing::info!(
            prompt_id = %submitted.prompt_id,
            seed = bound.seed,
            video = %video.display(),
            elapsed = %naming::format_time(completion.elapsed.as_secs_f64()),
            "Generation complete",
        );
        Ok(GenerationOutcome {
            prompt_id: submitted.prompt_id,
            seed: bound.seed,
            video,
            timings,
        })
    }

    /// Stop a prompt: interrupt it if running and drop it if still queued.
    pub async fn abort(&self, prompt_id: &str) {
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(prompt_id, error = %e, "Failed to interrupt execution");
        }
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove prompt from queue");
        }
        tracing::info!(prompt_id, "Prompt aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_total_and_lookup() {
        let mut t = Timings::default();
        t.record("submit", Duration::from_millis(500));
        t.record("generation", Duration::from_secs(90));
        assert_eq!(t.total(), Duration::from_millis(90_500));
        assert_eq!(t.get("generation"), Some(Duration::from_secs(90)));
        assert_eq!(t.get("interpolation"), None);
    }

    #[test]
    fn timings_display_uses_human_format() {
        let mut t = Timings::default();
        t.record("generation", Duration::from_secs(125));
        let text = t.to_string();
        assert!(text.contains("generation     2m 5.0s"));
        assert!(text.ends_with("total          2m 5.0s"));
    }

    #[tokio::test]
    async fn cancelled_before_submit() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = JobRunner::new(ComfyUIApi::new("http://127.0.0.1:9"), "output", Duration::from_secs(1));
        let bound = BoundPrompt {
            prompt: ApiPrompt::default(),
            seed: 1,
            filename_prefix: "video/x".into(),
            source_name: "x".into(),
        };
        let err = runner.run(&bound, Duration::from_secs(1), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
