//! Workflow graph surgery and generation-parameter binding.
//!
//! Loads and writes the node-graph tool's saved workflows, applies
//! transactional edits (splice, pass-through removal, mode and widget
//! changes) under referential-integrity validation, edits API-format
//! prompts, and wraps the ffmpeg tools the media pipelines need.

pub mod api_prompt;
pub mod edit;
pub mod error;
pub mod ffmpeg;
pub mod generation;
pub mod graph;
pub mod html;
pub mod inspect;
pub mod integrity;
pub mod naming;
pub mod presets;
pub mod splice;
pub mod types;

pub use error::CoreError;
pub use graph::{JsonStyle, Link, Node, NodeCollection, WorkflowDocument};
