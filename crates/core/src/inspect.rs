//! Read-only reports over workflow documents: summaries, side-by-side
//! comparison and node availability against a server's node registry.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::graph::{node_modes, Node, WorkflowDocument};
use crate::integrity;
use crate::types::{LinkId, NodeId};

/// Whether a node type loads model weights.
pub fn is_model_loader(node_type: &str) -> bool {
    ["UNETLoader", "ModelLoader", "CheckpointLoader"]
        .iter()
        .any(|p| node_type.contains(p))
}

/// Whether a node type is a sampler.
pub fn is_sampler(node_type: &str) -> bool {
    node_type.contains("Sampler") && !node_type.contains("ModelSampling")
}

/// A loader or sampler node with its status and consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeBrief {
    pub id: NodeId,
    pub node_type: String,
    pub title: Option<String>,
    pub status: &'static str,
    /// First widget value, typically the model file name for loaders.
    pub primary_widget: Option<String>,
    pub downstream: Vec<NodeId>,
}

impl NodeBrief {
    fn of(doc: &WorkflowDocument, node: &Node) -> Self {
        let primary_widget = node
            .widgets_values
            .as_ref()
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            });
        let mut downstream: Vec<NodeId> = doc.links_from(node.id).map(|l| l.dst_node).collect();
        downstream.sort_unstable();
        downstream.dedup();
        Self {
            id: node.id,
            node_type: node.node_type.clone(),
            title: node.title().map(str::to_string),
            status: node_modes::label(node.mode),
            primary_widget,
            downstream,
        }
    }
}

/// Structural summary of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub node_count: usize,
    pub link_count: usize,
    pub max_node_id: NodeId,
    pub last_node_id: NodeId,
    pub max_link_id: LinkId,
    pub last_link_id: LinkId,
    pub type_counts: BTreeMap<String, usize>,
    pub loaders: Vec<NodeBrief>,
    pub samplers: Vec<NodeBrief>,
    pub disabled: Vec<NodeId>,
    pub violations: Vec<String>,
}

pub fn summarize(doc: &WorkflowDocument) -> WorkflowSummary {
    let mut type_counts = BTreeMap::new();
    for node in doc.nodes.iter() {
        *type_counts.entry(node.node_type.clone()).or_insert(0) += 1;
    }

    WorkflowSummary {
        node_count: doc.nodes.len(),
        link_count: doc.links.len(),
        max_node_id: doc.max_node_id(),
        last_node_id: doc.last_node_id,
        max_link_id: doc.max_link_id(),
        last_link_id: doc.last_link_id,
        type_counts,
        loaders: doc
            .nodes_where(|n| is_model_loader(&n.node_type))
            .map(|n| NodeBrief::of(doc, n))
            .collect(),
        samplers: doc
            .nodes_where(|n| is_sampler(&n.node_type))
            .map(|n| NodeBrief::of(doc, n))
            .collect(),
        disabled: doc.nodes_where(Node::is_disabled).map(|n| n.id).collect(),
        violations: integrity::validate(doc)
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

/// Differences between two documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowComparison {
    pub only_in_left: Vec<String>,
    pub only_in_right: Vec<String>,
    /// Types present in both with different counts: `(type, left, right)`.
    pub count_changes: Vec<(String, usize, usize)>,
    pub left_loaders: Vec<NodeBrief>,
    pub right_loaders: Vec<NodeBrief>,
    pub left_samplers: Vec<NodeBrief>,
    pub right_samplers: Vec<NodeBrief>,
}

impl WorkflowComparison {
    pub fn is_structurally_equal(&self) -> bool {
        self.only_in_left.is_empty() && self.only_in_right.is_empty() && self.count_changes.is_empty()
    }
}

pub fn compare(left: &WorkflowDocument, right: &WorkflowDocument) -> WorkflowComparison {
    let l = summarize(left);
    let r = summarize(right);

    let only_in_left = l
        .type_counts
        .keys()
        .filter(|t| !r.type_counts.contains_key(*t))
        .cloned()
        .collect();
    let only_in_right = r
        .type_counts
        .keys()
        .filter(|t| !l.type_counts.contains_key(*t))
        .cloned()
        .collect();
    let count_changes = l
        .type_counts
        .iter()
        .filter_map(|(t, &lc)| {
            let rc = *r.type_counts.get(t)?;
            (lc != rc).then(|| (t.clone(), lc, rc))
        })
        .collect();

    WorkflowComparison {
        only_in_left,
        only_in_right,
        count_changes,
        left_loaders: l.loaders,
        right_loaders: r.loaders,
        left_samplers: l.samplers,
        right_samplers: r.samplers,
    }
}

/// Node types used by `doc` that are not in `available`, with the IDs of
/// the nodes using them.
pub fn missing_node_types(
    doc: &WorkflowDocument,
    available: &HashSet<String>,
) -> BTreeMap<String, Vec<NodeId>> {
    let mut missing: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
    for node in doc.nodes.iter() {
        if !available.contains(&node.node_type) && !is_frontend_only(&node.node_type) {
            missing.entry(node.node_type.clone()).or_default().push(node.id);
        }
    }
    missing
}

/// Node types that exist only in the editor and never reach the server.
fn is_frontend_only(node_type: &str) -> bool {
    matches!(node_type, "Note" | "MarkdownNote" | "Reroute" | "PrimitiveNode")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> WorkflowDocument {
        WorkflowDocument::from_json_str(text).unwrap()
    }

    const WF: &str = r#"{
        "last_node_id": 5, "last_link_id": 2,
        "nodes": [
            {"id": 1, "type": "UNETLoader", "mode": 0, "widgets_values": ["high.safetensors", "default"],
             "outputs": [{"name": "MODEL", "type": "MODEL", "links": [1]}]},
            {"id": 2, "type": "UNETLoader", "mode": 4, "widgets_values": ["low.safetensors", "default"],
             "outputs": [{"name": "MODEL", "type": "MODEL", "links": [2]}]},
            {"id": 3, "type": "KSamplerAdvanced", "mode": 0, "title": "High pass",
             "inputs": [{"name": "model", "type": "MODEL", "link": 1}]},
            {"id": 4, "type": "KSamplerAdvanced", "mode": 0,
             "inputs": [{"name": "model", "type": "MODEL", "link": 2}]},
            {"id": 5, "type": "Note", "mode": 0}
        ],
        "links": [[1, 1, 0, 3, 0, "MODEL"], [2, 2, 0, 4, 0, "MODEL"]]
    }"#;

    #[test]
    fn summary_lists_loaders_with_status() {
        let s = summarize(&doc(WF));
        assert_eq!(s.node_count, 5);
        assert_eq!(s.link_count, 2);
        assert_eq!(s.type_counts["UNETLoader"], 2);
        assert_eq!(s.loaders.len(), 2);
        assert_eq!(s.loaders[0].status, "ACTIVE");
        assert_eq!(s.loaders[0].primary_widget.as_deref(), Some("high.safetensors"));
        assert_eq!(s.loaders[0].downstream, vec![3]);
        assert_eq!(s.loaders[1].status, "BYPASSED");
        assert_eq!(s.samplers[0].title.as_deref(), Some("High pass"));
        assert_eq!(s.disabled, vec![2]);
        assert!(s.violations.is_empty());
    }

    #[test]
    fn comparison_finds_type_differences() {
        let left = doc(WF);
        let mut right = doc(WF);
        right.nodes.remove(5);
        right.nodes.insert(crate::graph::Node {
            id: 6,
            node_type: "TaylorSeerLite".into(),
            order: None,
            mode: 0,
            inputs: vec![],
            outputs: vec![],
            widgets_values: None,
            extra: Default::default(),
        });

        let cmp = compare(&left, &right);
        assert_eq!(cmp.only_in_left, vec!["Note".to_string()]);
        assert_eq!(cmp.only_in_right, vec!["TaylorSeerLite".to_string()]);
        assert!(cmp.count_changes.is_empty());
        assert!(!cmp.is_structurally_equal());
        assert!(compare(&left, &left).is_structurally_equal());
    }

    #[test]
    fn missing_types_skip_editor_only_nodes() {
        let available: HashSet<String> = ["UNETLoader".to_string()].into_iter().collect();
        let missing = missing_node_types(&doc(WF), &available);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["KSamplerAdvanced"], vec![3, 4]);
    }

    #[test]
    fn classifiers() {
        assert!(is_model_loader("WanVideoModelLoader"));
        assert!(is_model_loader("CheckpointLoaderSimple"));
        assert!(!is_model_loader("LoadImage"));
        assert!(is_sampler("KSamplerAdvanced"));
        assert!(!is_sampler("ModelSamplingSD3"));
    }
}
