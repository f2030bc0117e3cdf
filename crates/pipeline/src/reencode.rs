//! H.264 re-encoding of finished videos, singly or in batches.

use std::path::{Path, PathBuf};

use comfyctl_core::ffmpeg::{self, EncodeSettings};
use comfyctl_core::naming;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct ReencodeJob {
    pub input: PathBuf,
    /// Defaults to `{stem}_reencoded{ext}` beside the input.
    pub output: Option<PathBuf>,
    /// Replace the input through a temporary file in the same directory.
    pub in_place: bool,
    pub settings: EncodeSettings,
}

impl ReencodeJob {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            in_place: false,
            settings: EncodeSettings::reencode(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReencodeOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

impl ReencodeOutcome {
    /// Output size relative to input; below 1.0 means smaller.
    pub fn size_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        self.output_bytes as f64 / self.input_bytes as f64
    }
}

async fn file_size(path: &Path) -> Result<u64, PipelineError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| PipelineError::io(path, e))
}

/// Re-encode one file.
pub async fn reencode_file(job: &ReencodeJob) -> Result<ReencodeOutcome, PipelineError> {
    if job.in_place && job.output.is_some() {
        return Err(PipelineError::Invalid(
            "An output path cannot be combined with in-place replacement".to_string(),
        ));
    }
    let input_bytes = file_size(&job.input).await?;

    let output = if job.in_place {
        let parent = job
            .input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let suffix = job
            .input
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix(".reencode-")
            .suffix(&suffix)
            .tempfile_in(parent)
            .map_err(|e| PipelineError::io(parent, e))?
            .into_temp_path();

        ffmpeg::reencode(&job.input, &temp, &job.settings).await?;
        temp.persist(&job.input)
            .map_err(|e| PipelineError::io(job.input.as_path(), e.error))?;
        job.input.clone()
    } else {
        let output = job
            .output
            .clone()
            .unwrap_or_else(|| naming::reencoded_output(&job.input));
        ffmpeg::reencode(&job.input, &output, &job.settings).await?;
        output
    };

    let output_bytes = file_size(&output).await?;
    let outcome = ReencodeOutcome {
        input: job.input.clone(),
        output,
        input_bytes,
        output_bytes,
    };
    tracing::info!(
        input = %outcome.input.display(),
        output = %outcome.output.display(),
        input_bytes,
        output_bytes,
        "Re-encoded video",
    );
    Ok(outcome)
}

/// Results of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<ReencodeOutcome>,
    pub failed: Vec<(PathBuf, PipelineError)>,
    /// Inputs not attempted because the batch was cancelled.
    pub skipped: Vec<PathBuf>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Re-encode several files with shared settings. Failures are collected
/// rather than stopping the batch; cancellation stops it.
pub async fn reencode_batch(
    inputs: &[PathBuf],
    settings: &EncodeSettings,
    in_place: bool,
    cancel: &CancellationToken,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for (i, input) in inputs.iter().enumerate() {
        if cancel.is_cancelled() {
            summary.skipped.extend(inputs[i..].iter().cloned());
            break;
        }
        let job = ReencodeJob {
            input: input.clone(),
            output: None,
            in_place,
            settings: settings.clone(),
        };
        tracing::info!(file = %input.display(), index = i + 1, total = inputs.len(), "Re-encoding");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = reencode_file(&job) => result,
        };
        match result {
            Ok(outcome) => summary.succeeded.push(outcome),
            Err(e) if e.is_cancelled() => {
                summary.skipped.extend(inputs[i..].iter().cloned());
                break;
            }
            Err(e) => {
                tracing::warn!(file = %input.display(), error = %e, "Re-encode failed");
                summary.failed.push((input.clone(), e));
            }
        }
    }

    tracing::info!(
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        skipped = summary.skipped.len(),
        "Batch finished",
    );
    summary
}
