//! API-format prompts: the node map submitted to the job queue.
//!
//! Each entry maps a string node ID to `{class_type, inputs, _meta}`. An
//! input value is either a literal or a reference `[source_id, slot]` to
//! another node's output.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// One node of an API-format prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiNode {
    pub fn new(class_type: impl Into<String>, title: Option<&str>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: Map::new(),
            meta: title.map(|t| serde_json::json!({ "title": t })),
            extra: Map::new(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref()?.get("title")?.as_str()
    }
}

/// Parse `[source_id, slot]` as a node reference.
pub fn as_reference(value: &Value) -> Option<(&str, u64)> {
    match value.as_array()?.as_slice() {
        [Value::String(id), slot] => Some((id.as_str(), slot.as_u64()?)),
        _ => None,
    }
}

/// Build a reference value to `source`'s output `slot`.
pub fn reference(source: &str, slot: u64) -> Value {
    serde_json::json!([source, slot])
}

/// Whether `value` looks like an API-format prompt (object whose entries
/// all carry `class_type`).
pub fn looks_like_api_prompt(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) if !obj.is_empty() => obj
            .values()
            .all(|v| v.get("class_type").is_some_and(Value::is_string)),
        _ => false,
    }
}

/// An API-format prompt, ordered as loaded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiPrompt {
    pub nodes: IndexMap<String, ApiNode>,
}

impl ApiPrompt {
    /// Load a prompt template from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let prompt = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), nodes = prompt.nodes.len(), "Loaded prompt template");
        Ok(prompt)
    }

    /// Parse a template in plain node-map form, or in the queue history
    /// tuple form `[number, client_id, {nodes}, extra, outputs]`.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let nodes = match value {
            Value::Array(mut items) => {
                if items.len() < 3 {
                    return Err(CoreError::Validation(
                        "Prompt tuple must have at least 3 elements".to_string(),
                    ));
                }
                items.swap_remove(2)
            }
            Value::Object(mut obj) if obj.contains_key("prompt") && !obj.contains_key("class_type") => {
                obj.remove("prompt").unwrap_or(Value::Null)
            }
            other => other,
        };
        if !nodes.is_object() {
            return Err(CoreError::Validation(
                "Prompt template does not contain a node map".to_string(),
            ));
        }
        Ok(serde_json::from_value(nodes)?)
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| CoreError::io(path, e))
    }

    pub fn node(&self, id: &str) -> Option<&ApiNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut ApiNode, CoreError> {
        self.nodes.get_mut(id).ok_or_else(|| {
            CoreError::Validation(format!("Prompt has no node '{id}'"))
        })
    }

    /// IDs of nodes whose class type is `class_type`, in prompt order.
    pub fn find_by_class(&self, class_type: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.class_type == class_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Set a literal input value.
    pub fn set_input(&mut self, id: &str, name: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        self.require_mut(id)?
            .inputs
            .insert(name.to_string(), value.into());
        Ok(())
    }

    /// Wire `target`'s input `name` to `source`'s output `slot`.
    pub fn connect(&mut self, target: &str, name: &str, source: &str, slot: u64) -> Result<(), CoreError> {
        if !self.contains(source) {
            return Err(CoreError::Validation(format!(
                "Cannot connect to missing node '{source}'"
            )));
        }
        self.set_input(target, name, reference(source, slot))
    }

    /// Remove an input; returns the previous value.
    pub fn remove_input(&mut self, id: &str, name: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.require_mut(id)?.inputs.shift_remove(name))
    }

    /// Insert or replace a node.
    pub fn insert_node(&mut self, id: impl Into<String>, node: ApiNode) {
        self.nodes.insert(id.into(), node);
    }

    /// `preferred` if no node uses it, otherwise one past the highest
    /// numeric ID.
    pub fn free_id(&self, preferred: &str) -> String {
        if !self.contains(preferred) {
            return preferred.to_string();
        }
        let max = self
            .nodes
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }

    /// Remove a node. References to it elsewhere are left for
    /// [`ApiPrompt::validate_references`] to report.
    pub fn remove_node(&mut self, id: &str) -> Option<ApiNode> {
        self.nodes.shift_remove(id)
    }

    /// Every input reference that names a missing node, as
    /// `(node, input, missing_source)`.
    pub fn dangling_references(&self) -> Vec<(String, String, String)> {
        let mut dangling = Vec::new();
        for (id, node) in &self.nodes {
            for (name, value) in &node.inputs {
                if let Some((source, _)) = as_reference(value) {
                    if !self.nodes.contains_key(source) {
                        dangling.push((id.clone(), name.clone(), source.to_string()));
                    }
                }
            }
        }
        dangling
    }

    /// Fail if any input references a missing node.
    pub fn validate_references(&self) -> Result<(), CoreError> {
        let dangling = self.dangling_references();
        if dangling.is_empty() {
            return Ok(());
        }
        Err(CoreError::Validation(format!(
            "Prompt references missing nodes: {}",
            dangling
                .iter()
                .map(|(id, name, src)| format!("{id}.{name} -> {src}"))
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEMPLATE: &str = r#"{
        "97": {"inputs": {"image": "old.png"}, "class_type": "LoadImage", "_meta": {"title": "Load Image"}},
        "98": {"inputs": {"width": 640, "height": 640, "length": 81, "start_image": ["97", 0]},
               "class_type": "WanImageToVideo"},
        "108": {"inputs": {"filename_prefix": "video/x", "images": ["98", 0]}, "class_type": "SaveVideo"}
    }"#;

    #[test]
    fn loads_plain_and_tuple_forms() {
        let plain = ApiPrompt::from_json_str(TEMPLATE).unwrap();
        assert_eq!(plain.nodes.len(), 3);
        assert_eq!(plain.node("97").unwrap().title(), Some("Load Image"));

        let tuple = format!(r#"[1, "client", {TEMPLATE}, {{}}, ["108"]]"#);
        let from_tuple = ApiPrompt::from_json_str(&tuple).unwrap();
        assert_eq!(from_tuple, plain);

        let keys: Vec<&String> = plain.nodes.keys().collect();
        assert_eq!(keys, vec!["97", "98", "108"]);
    }

    #[test]
    fn short_tuple_is_rejected() {
        assert!(ApiPrompt::from_json_str(r#"[1, "c"]"#).is_err());
    }

    #[test]
    fn set_connect_and_remove_inputs() {
        let mut p = ApiPrompt::from_json_str(TEMPLATE).unwrap();
        p.set_input("98", "width", 832).unwrap();
        assert_eq!(p.node("98").unwrap().inputs["width"], json!(832));

        p.connect("108", "audio", "97", 0).unwrap();
        assert_eq!(as_reference(&p.node("108").unwrap().inputs["audio"]), Some(("97", 0)));
        assert!(p.connect("108", "audio", "500", 0).is_err());

        assert_eq!(p.remove_input("98", "start_image").unwrap(), Some(json!(["97", 0])));
        assert!(p.set_input("404", "x", 1).is_err());
    }

    #[test]
    fn dangling_references_after_node_removal() {
        let mut p = ApiPrompt::from_json_str(TEMPLATE).unwrap();
        assert!(p.validate_references().is_ok());
        p.remove_node("97");
        assert_eq!(
            p.dangling_references(),
            vec![("98".to_string(), "start_image".to_string(), "97".to_string())]
        );
        assert!(p.validate_references().is_err());
    }

    #[test]
    fn find_by_class_and_detection() {
        let p = ApiPrompt::from_json_str(TEMPLATE).unwrap();
        assert_eq!(p.find_by_class("SaveVideo"), vec!["108"]);
        assert!(looks_like_api_prompt(&serde_json::from_str(TEMPLATE).unwrap()));
        assert!(!looks_like_api_prompt(&json!({"nodes": [], "links": []})));
    }
}
