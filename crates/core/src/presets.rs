//! Ready-made node specifications for common splice insertions.

use serde_json::json;

use crate::splice::NodeSpec;
use crate::types::{NodeId, SlotIndex};

const UNLOAD_COLOR: &str = "#A88";
const UNLOAD_BGCOLOR: &str = "#C99";

/// GPU memory cleanup pass-through (`easy cleanGpuUsed`).
pub fn clean_gpu(title: &str) -> NodeSpec {
    NodeSpec::new("easy cleanGpuUsed")
        .with_title(title)
        .with_size(220.0, 26.0)
        .with_colors(UNLOAD_COLOR, UNLOAD_BGCOLOR)
}

/// Cache flush pass-through (`easy clearCacheAll`).
pub fn clear_cache(title: &str) -> NodeSpec {
    NodeSpec::new("easy clearCacheAll")
        .with_title(title)
        .with_size(220.0, 26.0)
        .with_colors(UNLOAD_COLOR, UNLOAD_BGCOLOR)
}

/// The unload pair inserted between two sampler passes.
pub fn unload_pair() -> Vec<NodeSpec> {
    vec![clean_gpu("Unload Model"), clear_cache("Clear Cache")]
}

/// Pass-through that deletes a model once its data input has been computed.
pub fn delete_model(model_source: Option<(NodeId, SlotIndex)>) -> NodeSpec {
    NodeSpec::new("Delete Model (Passthrough Any)")
        .with_input("data", "*")
        .with_output("*", "*")
        .with_aux_input("model", "MODEL", model_source)
        .with_title("Delete Model")
        .with_colors(UNLOAD_COLOR, UNLOAD_BGCOLOR)
}

/// Model-patching cache accelerator inserted on a `MODEL` link.
pub fn taylor_seer(title: &str) -> NodeSpec {
    NodeSpec::new("TaylorSeerLite")
        .with_input("model", "MODEL")
        .with_output("MODEL", "MODEL")
        .with_title(title)
        .with_widgets(json!(["wanvideo", 5, 1, 1, 50]))
}

/// Look up a preset by CLI name.
pub fn by_name(name: &str) -> Option<Vec<NodeSpec>> {
    match name {
        "clean-gpu" => Some(vec![clean_gpu("Unload Model")]),
        "clear-cache" => Some(vec![clear_cache("Clear Cache")]),
        "unload" => Some(unload_pair()),
        "delete-model" => Some(vec![delete_model(None)]),
        "taylorseer" => Some(vec![taylor_seer("TaylorSeerLite")]),
        _ => None,
    }
}

/// Names accepted by [`by_name`].
pub const PRESET_NAMES: &[&str] = &["clean-gpu", "clear-cache", "unload", "delete-model", "taylorseer"];
