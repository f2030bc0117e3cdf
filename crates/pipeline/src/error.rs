use std::path::PathBuf;
use std::time::Duration;

use comfyctl_comfyui::{ComfyUIApiError, PollError};
use comfyctl_core::ffmpeg::FfmpegError;
use comfyctl_core::CoreError;

/// Errors from the generation and post-processing pipelines.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Poll(PollError),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {exit_code:?}: {stderr}")]
    ProcessFailed {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {}s", .elapsed.as_secs())]
    ProcessTimeout { program: String, elapsed: Duration },

    #[error("Need at least 2 frames to interpolate, got {0}")]
    TooFewFrames(usize),

    #[error("Interpolator produced no frames in {0}")]
    NoInterpolatedFrames(PathBuf),

    #[error("Prompt {prompt_id} finished but no output video was found")]
    NoOutput { prompt_id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PipelineError>,
    },

    #[error("Cancelled")]
    Cancelled,
}

impl From<PollError> for PipelineError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Cancelled(_) => Self::Cancelled,
            other => Self::Poll(other),
        }
    }
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    /// Failures worth another attempt: the external process crashed or
    /// produced nothing, typically while the GPU is still held by the server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProcessFailed { .. }
                | Self::ProcessTimeout { .. }
                | Self::NoInterpolatedFrames(_)
                | Self::Ffmpeg(FfmpegError::ExecutionFailed { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_cancellation_maps_to_cancelled() {
        let e: PipelineError = PollError::Cancelled("p".into()).into();
        assert!(e.is_cancelled());
    }

    #[test]
    fn retryable_classification() {
        let failed = PipelineError::ProcessFailed {
            program: "python".into(),
            exit_code: Some(1),
            stderr: "CUDA error".into(),
        };
        assert!(failed.is_retryable());
        assert!(!PipelineError::TooFewFrames(1).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
    }
}
