//! One-shot job state lookup from the queue and history endpoints.

use std::fmt;

use crate::api::{ComfyUIApiError, JobBackend};
use crate::messages::HistoryEntry;

/// Where a submitted prompt currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Waiting behind `position` other prompts.
    Pending { position: usize },
    Running,
    Completed,
    Failed { message: String },
    /// Neither queued nor in history. Happens briefly after submission,
    /// or for IDs the server never saw.
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Short label used in logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending { position } => write!(f, "pending (position {})", position + 1),
            Self::Failed { message } => write!(f, "failed: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

/// State plus the history entry when one exists.
#[derive(Debug, Clone)]
pub struct Observation {
    pub state: JobState,
    pub history: Option<HistoryEntry>,
}

/// Classify a prompt. Running wins over history so a re-queued ID is not
/// reported finished early; history wins over pending.
pub async fn observe<B: JobBackend>(backend: &B, prompt_id: &str) -> Result<Observation, ComfyUIApiError> {
    let queue = backend.queue().await?;
    if queue.is_running(prompt_id) {
        return Ok(Observation { state: JobState::Running, history: None });
    }

    if let Some(entry) = backend.history(prompt_id).await? {
        let state = if entry.is_error() {
            JobState::Failed { message: entry.error_message() }
        } else if entry.is_success() {
            JobState::Completed
        } else {
            // Recorded but neither success nor error: the run was interrupted.
            JobState::Failed { message: "execution did not complete".to_string() }
        };
        return Ok(Observation { state, history: Some(entry) });
    }

    let state = match queue.pending_position(prompt_id) {
        Some(position) => JobState::Pending { position },
        None => JobState::Unknown,
    };
    Ok(Observation { state, history: None })
}
