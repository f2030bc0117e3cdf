//! Generation and media post-processing pipelines.
//!
//! Runs bound prompts through a ComfyUI server, interpolates and
//! re-encodes the resulting videos with ffmpeg and an external
//! interpolator, and benchmarks generation across frame counts.

pub mod benchmark;
pub mod error;
pub mod generation;
pub mod interpolate;
pub mod reencode;
pub mod retry;
pub mod subprocess;

pub use error::PipelineError;
pub use generation::{GenerationOutcome, JobRunner, Timings};
pub use retry::RetryPolicy;
