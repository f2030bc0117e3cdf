//! ComfyUI REST response types.
//!
//! Covers `/history/{id}`, `/queue`, `/system_stats` and the error body of
//! a rejected `/prompt`. Fields the server adds over time are tolerated;
//! node outputs are kept as raw JSON and interpreted on demand because
//! each node type reports different keys.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One prompt's entry in `GET /history/{prompt_id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs keyed by node ID, in execution order.
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status recorded with a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"`.
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[name, data]` pairs such as `["execution_error", {...}]`.
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

/// Payload of an `execution_error` status message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

impl std::fmt::Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.node_id, &self.node_type) {
            (Some(id), Some(t)) => write!(f, "node {id} ({t}): ")?,
            (Some(id), None) => write!(f, "node {id}: ")?,
            _ => {}
        }
        write!(f, "{}", self.exception_message.trim())?;
        if !self.exception_type.is_empty() {
            write!(f, " [{}]", self.exception_type)?;
        }
        Ok(())
    }
}

/// A file written by an output node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl HistoryEntry {
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str.as_deref() == Some("error"))
    }

    /// Finished successfully: status says so, or outputs are present.
    pub fn is_success(&self) -> bool {
        if self.is_error() {
            return false;
        }
        let status_ok = self
            .status
            .as_ref()
            .is_some_and(|s| s.status_str.as_deref() == Some("success") || s.completed);
        status_ok || !self.outputs.is_empty()
    }

    /// The `execution_error` message, if execution failed.
    pub fn execution_error(&self) -> Option<ErrorData> {
        let status = self.status.as_ref()?;
        status
            .messages
            .iter()
            .find(|(name, _)| name == "execution_error")
            .and_then(|(_, data)| serde_json::from_value(data.clone()).ok())
    }

    /// Human-readable failure description.
    pub fn error_message(&self) -> String {
        self.execution_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "execution failed without an error message".to_string())
    }

    /// Files listed under `key` (`videos`, `gifs`, `images`) across all
    /// output nodes, in node order. Malformed entries are skipped.
    pub fn files(&self, key: &str) -> Vec<OutputFile> {
        self.outputs
            .values()
            .filter_map(|out| out.get(key)?.as_array())
            .flatten()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }
}

/// Parse the `GET /history/{id}` body, which wraps the entry in a map
/// keyed by prompt ID (empty while the prompt has not finished).
pub fn parse_history(prompt_id: &str, body: Value) -> Result<Option<HistoryEntry>, serde_json::Error> {
    let Value::Object(mut map) = body else {
        return Ok(None);
    };
    match map.remove(prompt_id) {
        Some(entry) => Ok(Some(serde_json::from_value(entry)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// `GET /queue` body. Items are `[number, prompt_id, prompt, extra, outputs]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Vec<Value>>,
    #[serde(default)]
    pub queue_pending: Vec<Vec<Value>>,
}

fn item_prompt_id(item: &[Value]) -> Option<&str> {
    item.get(1)?.as_str()
}

fn item_number(item: &[Value]) -> Option<i64> {
    item.first()?.as_i64()
}

impl QueueSnapshot {
    pub fn running_ids(&self) -> Vec<&str> {
        self.queue_running.iter().filter_map(|i| item_prompt_id(i)).collect()
    }

    /// Pending prompt IDs in execution order (lowest queue number first).
    pub fn pending_ids(&self) -> Vec<&str> {
        let mut items: Vec<&Vec<Value>> = self.queue_pending.iter().collect();
        items.sort_by_key(|i| item_number(i).unwrap_or(i64::MAX));
        items.into_iter().filter_map(|i| item_prompt_id(i)).collect()
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.running_ids().contains(&prompt_id)
    }

    /// Zero-based position among pending prompts.
    pub fn pending_position(&self, prompt_id: &str) -> Option<usize> {
        self.pending_ids().iter().position(|id| *id == prompt_id)
    }
}

// ---------------------------------------------------------------------------
// System stats
// ---------------------------------------------------------------------------

/// `GET /system_stats` body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SystemStats {
    #[serde(default)]
    pub system: SystemInfo,
    #[serde(default)]
    pub devices: Vec<DeviceStats>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub comfyui_version: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub ram_total: u64,
    #[serde(default)]
    pub ram_free: u64,
}

/// One compute device. Sizes are bytes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceStats {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
}

impl DeviceStats {
    pub fn vram_used(&self) -> u64 {
        self.vram_total.saturating_sub(self.vram_free)
    }
}

/// VRAM reading in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VramUsage {
    pub used_mb: f64,
    pub total_mb: f64,
    pub percent: f64,
}

impl SystemStats {
    /// Usage of the first device, if any reports VRAM.
    pub fn vram(&self) -> Option<VramUsage> {
        let device = self.devices.iter().find(|d| d.vram_total > 0)?;
        let mb = |b: u64| b as f64 / (1024.0 * 1024.0);
        let used_mb = mb(device.vram_used());
        let total_mb = mb(device.vram_total);
        Some(VramUsage {
            used_mb,
            total_mb,
            percent: used_mb / total_mb * 100.0,
        })
    }
}

// ---------------------------------------------------------------------------
// Prompt rejection
// ---------------------------------------------------------------------------

/// Parsed body of a rejected `POST /prompt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptRejection {
    pub error_type: String,
    pub message: String,
    pub details: String,
    /// Per-node validation errors keyed by node ID.
    pub node_errors: IndexMap<String, Value>,
}

impl PromptRejection {
    /// Parse a rejection body. The error fields appear either nested under
    /// `error` or at the top level depending on server version.
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let obj = value.as_object()?;
        let err = obj.get("error").filter(|e| e.is_object()).unwrap_or(&value);
        let text = |key: &str| {
            err.get(key)
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .unwrap_or_default()
        };
        let node_errors = obj
            .get("node_errors")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Some(Self {
            error_type: text("type"),
            message: text("message"),
            details: text("details"),
            node_errors,
        })
    }
}

impl std::fmt::Display for PromptRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.error_type)?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details)?;
        }
        for (node, errors) in &self.node_errors {
            write!(f, "; node {node}: {errors}")?;
        }
        Ok(())
    }
}
