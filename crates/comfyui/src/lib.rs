//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed history/queue/system-stats
//! responses, job state lookup, completion polling and output file
//! resolution for driving a ComfyUI server from the command line.

pub mod api;
pub mod messages;
pub mod outputs;
pub mod poller;
pub mod status;

pub use api::{ComfyUIApi, ComfyUIApiError, JobBackend, SubmitResponse};
pub use poller::{wait_for_completion, Completion, PollConfig, PollError};
pub use status::JobState;
