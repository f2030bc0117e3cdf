//! Recover workflow JSON embedded in a saved web page.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::CoreError;

/// Anchors ending at the opening brace of an embedded workflow object.
static OBJECT_ANCHORS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r#""workflow"\s*:\s*\{"#).expect("valid regex"),
        Regex::new(r#""workflowData"\s*:\s*\{"#).expect("valid regex"),
        Regex::new(r#"workflowJson\s*:\s*\{"#).expect("valid regex"),
    ]
});

/// Opening tag of the page-data script block.
static NEXT_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script[^>]*id=["']__NEXT_DATA__["'][^>]*>"#).expect("valid regex")
});

/// Parse the first JSON value starting at `text[start..]`, ignoring
/// whatever follows it.
fn parse_value_at(text: &str, start: usize) -> Option<Value> {
    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn is_workflow(value: &Value) -> bool {
    value.get("nodes").is_some() && value.get("links").is_some()
}

/// Depth-first search for a workflow object, including workflows stored
/// as JSON-encoded strings.
fn find_workflow(value: &Value) -> Option<Value> {
    if is_workflow(value) {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => map.values().find_map(find_workflow),
        Value::Array(items) => items.iter().find_map(find_workflow),
        Value::String(s) if s.trim_start().starts_with('{') => {
            let inner: Value = serde_json::from_str(s).ok()?;
            find_workflow(&inner)
        }
        _ => None,
    }
}

/// Extract the first workflow document embedded in `html`.
pub fn extract_workflow(html: &str) -> Result<Value, CoreError> {
    for anchor in OBJECT_ANCHORS.iter() {
        for m in anchor.find_iter(html) {
            // The match ends just past the opening brace.
            if let Some(found) = parse_value_at(html, m.end() - 1).as_ref().and_then(find_workflow) {
                tracing::debug!(pattern = anchor.as_str(), "Found embedded workflow");
                return Ok(found);
            }
        }
    }

    if let Some(m) = NEXT_DATA_RE.find(html) {
        if let Some(found) = parse_value_at(html, m.end()).as_ref().and_then(find_workflow) {
            tracing::debug!("Found workflow in page data block");
            return Ok(found);
        }
    }

    Err(CoreError::Validation(
        "No workflow JSON found in page; it may be loaded by script at runtime. \
         Download the workflow file from the page instead"
            .to_string(),
    ))
}
