//! Transactional editing entry point and simple attribute edits.
//!
//! Every mutation of a [`WorkflowDocument`] goes through
//! [`WorkflowDocument::transact`]: the edit runs on a working copy, the ID
//! counters are raised to cover the maxima, integrity is re-checked, and the
//! copy replaces the document only if the edit introduced no new violation.

use serde_json::Value;

use crate::error::CoreError;
use crate::graph::{node_modes, Node, WorkflowDocument};
use crate::integrity::{self, Violation};
use crate::types::NodeId;

/// Selects nodes by their `type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMatcher {
    Exact(String),
    Contains(String),
}

impl TypeMatcher {
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            TypeMatcher::Exact(t) => node.node_type == *t,
            TypeMatcher::Contains(s) => node.node_type.contains(s.as_str()),
        }
    }
}

impl std::fmt::Display for TypeMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeMatcher::Exact(t) => write!(f, "type == {t:?}"),
            TypeMatcher::Contains(s) => write!(f, "type contains {s:?}"),
        }
    }
}

/// Parse a mode name or number (`active`/`0`, `muted`/`2`, `bypass`/`4`).
pub fn parse_mode(s: &str) -> Result<i64, CoreError> {
    match s.to_ascii_lowercase().as_str() {
        "0" | "active" | "always" => Ok(node_modes::ALWAYS),
        "2" | "muted" | "mute" | "never" => Ok(node_modes::NEVER),
        "4" | "bypass" | "bypassed" => Ok(node_modes::BYPASS),
        other => Err(CoreError::Validation(format!(
            "Unknown node mode '{other}' (expected active, muted or bypass)"
        ))),
    }
}

impl WorkflowDocument {
    /// Run `edit` against a working copy and commit it only if it leaves
    /// the document without new integrity violations.
    ///
    /// Violations already present before the edit are logged as warnings
    /// and do not block it. On error the document is left unchanged.
    pub fn transact<T, F>(&mut self, edit: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut WorkflowDocument) -> Result<T, CoreError>,
    {
        let before = integrity::validate(self);
        let mut working = self.clone();

        let out = edit(&mut working)?;
        working.sync_last_ids();

        let introduced: Vec<Violation> = integrity::validate(&working)
            .into_iter()
            .filter(|v| !before.contains(v))
            .collect();
        if !introduced.is_empty() {
            tracing::warn!(count = introduced.len(), "Rejected workflow edit");
            return Err(CoreError::Integrity(introduced));
        }

        for v in &before {
            tracing::warn!(violation = %v, "Pre-existing integrity violation");
        }

        *self = working;
        Ok(out)
    }

    /// Set `mode` on every node matching `matcher`. Returns the IDs changed.
    pub fn set_mode(&mut self, matcher: &TypeMatcher, mode: i64) -> Result<Vec<NodeId>, CoreError> {
        self.transact(|doc| {
            let mut changed = Vec::new();
            for node in doc.nodes.iter_mut() {
                if matcher.matches(node) && node.mode != mode {
                    node.mode = mode;
                    changed.push(node.id);
                }
            }
            tracing::info!(
                %matcher,
                mode = node_modes::label(mode),
                count = changed.len(),
                "Set node mode",
            );
            Ok(changed)
        })
    }

    /// Set position `index` of `widgets_values` on every matching node.
    ///
    /// Nodes whose widget values are not a list long enough to hold
    /// `index` are skipped with a warning. Errors if no node matched.
    pub fn set_widget_value(
        &mut self,
        matcher: &TypeMatcher,
        index: usize,
        value: Value,
    ) -> Result<Vec<NodeId>, CoreError> {
        self.transact(|doc| {
            let mut matched = 0usize;
            let mut changed = Vec::new();
            for node in doc.nodes.iter_mut().filter(|n| matcher.matches(n)) {
                matched += 1;
                match node.widgets_values.as_mut().and_then(Value::as_array_mut) {
                    Some(values) if index < values.len() => {
                        values[index] = value.clone();
                        changed.push(node.id);
                    }
                    _ => {
                        tracing::warn!(
                            node_id = node.id,
                            index,
                            "Node has no widget value at this position, skipping",
                        );
                    }
                }
            }
            if matched == 0 {
                return Err(CoreError::Validation(format!("No node with {matcher}")));
            }
            Ok(changed)
        })
    }
}
