//! Saved-workflow document model.
//!
//! Mirrors the node-graph tool's workflow JSON: a `nodes` container, a flat
//! list of link tuples and the `last_node_id` / `last_link_id` counters.
//! Keys this crate does not interpret (`pos`, `size`, `properties`,
//! `groups`, `extra`, ...) are carried through untouched, so a load/save
//! round trip only changes what an edit changed.
//!
//! The `nodes` container appears both as a list and as an ID-keyed map in
//! files produced by different versions of the tool. [`NodeCollection`]
//! accepts either and writes back the shape it was loaded with.

use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::{LinkId, NodeId, SlotIndex};

// ---------------------------------------------------------------------------
// Node modes
// ---------------------------------------------------------------------------

/// Values of a node's `mode` field.
pub mod node_modes {
    /// Node executes normally.
    pub const ALWAYS: i64 = 0;
    /// Node is muted: neither it nor its dependants run.
    pub const NEVER: i64 = 2;
    /// Node is bypassed: inputs are passed straight to matching outputs.
    pub const BYPASS: i64 = 4;

    /// Human-readable status label for a mode value.
    pub fn label(mode: i64) -> &'static str {
        match mode {
            ALWAYS => "ACTIVE",
            NEVER => "MUTED",
            BYPASS => "BYPASSED",
            _ => "OTHER",
        }
    }
}

// ---------------------------------------------------------------------------
// Slots and nodes
// ---------------------------------------------------------------------------

/// One input slot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub name: String,
    /// Data type accepted by the slot (e.g. `LATENT`, `MODEL`, `*`).
    #[serde(rename = "type")]
    pub slot_type: String,
    /// Link currently feeding this slot, if connected.
    #[serde(default)]
    pub link: Option<LinkId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeInput {
    pub fn new(name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: slot_type.into(),
            link: None,
            extra: Map::new(),
        }
    }
}

/// One output slot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub name: String,
    #[serde(rename = "type")]
    pub slot_type: String,
    /// Links leaving this slot. The tool writes `null` for an unconnected
    /// output on some versions and `[]` on others; both are preserved.
    #[serde(default)]
    pub links: Option<Vec<LinkId>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeOutput {
    pub fn new(name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: slot_type.into(),
            links: Some(Vec::new()),
            extra: Map::new(),
        }
    }

    /// Link IDs leaving this slot (empty when unconnected).
    pub fn link_ids(&self) -> &[LinkId] {
        self.links.as_deref().unwrap_or(&[])
    }

    /// Register a link as leaving this slot.
    pub fn add_link(&mut self, link: LinkId) {
        let links = self.links.get_or_insert_with(Vec::new);
        if !links.contains(&link) {
            links.push(link);
        }
    }

    /// Forget a link that no longer leaves this slot.
    pub fn remove_link(&mut self, link: LinkId) {
        if let Some(links) = self.links.as_mut() {
            links.retain(|&l| l != link);
        }
    }
}

/// A node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Handler name registered in the external tool (e.g. `KSamplerAdvanced`).
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default)]
    pub mode: i64,
    #[serde(default)]
    pub inputs: Vec<NodeInput>,
    #[serde(default)]
    pub outputs: Vec<NodeOutput>,
    /// Positional widget values; interpreted only by the external tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets_values: Option<Value>,
    /// Layout and presentation keys (`pos`, `size`, `flags`, `title`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// The user-visible title, if one was set.
    pub fn title(&self) -> Option<&str> {
        self.extra.get("title").and_then(Value::as_str)
    }

    /// Canvas position as `[x, y]`, when stored in array form.
    pub fn pos(&self) -> Option<[f64; 2]> {
        let arr = self.extra.get("pos")?.as_array()?;
        match arr.as_slice() {
            [x, y] => Some([x.as_f64()?, y.as_f64()?]),
            _ => None,
        }
    }

    /// Index of the input slot with the given name.
    pub fn input_slot(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.name == name)
    }

    /// Whether this node is bypassed or muted.
    pub fn is_disabled(&self) -> bool {
        self.mode != node_modes::ALWAYS
    }
}

// ---------------------------------------------------------------------------
// Node container
// ---------------------------------------------------------------------------

/// Which container shape the document's `nodes` key uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    List,
    Keyed,
}

/// The `nodes` container, in whichever shape the file used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeCollection {
    List(Vec<Node>),
    Keyed(IndexMap<String, Node>),
}

impl Default for NodeCollection {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl NodeCollection {
    pub fn shape(&self) -> NodeShape {
        match self {
            Self::List(_) => NodeShape::List,
            Self::Keyed(_) => NodeShape::Keyed,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::List(nodes) => nodes.len(),
            Self::Keyed(nodes) => nodes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        match self {
            Self::List(nodes) => Box::new(nodes.iter()),
            Self::Keyed(nodes) => Box::new(nodes.values()),
        }
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut Node> + '_> {
        match self {
            Self::List(nodes) => Box::new(nodes.iter_mut()),
            Self::Keyed(nodes) => Box::new(nodes.values_mut()),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        match self {
            Self::List(nodes) => nodes.iter().find(|n| n.id == id),
            Self::Keyed(nodes) => nodes
                .get(&id.to_string())
                .filter(|n| n.id == id)
                .or_else(|| nodes.values().find(|n| n.id == id)),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match self {
            Self::List(nodes) => nodes.iter_mut().find(|n| n.id == id),
            Self::Keyed(nodes) => nodes.values_mut().find(|n| n.id == id),
        }
    }

    /// Append a node. Keyed containers use the stringified ID as key.
    pub fn insert(&mut self, node: Node) {
        match self {
            Self::List(nodes) => nodes.push(node),
            Self::Keyed(nodes) => {
                nodes.insert(node.id.to_string(), node);
            }
        }
    }

    /// Remove a node, preserving the order of the remaining ones.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        match self {
            Self::List(nodes) => {
                let idx = nodes.iter().position(|n| n.id == id)?;
                Some(nodes.remove(idx))
            }
            Self::Keyed(nodes) => {
                let key = nodes
                    .iter()
                    .find(|(_, n)| n.id == id)
                    .map(|(k, _)| k.clone())?;
                nodes.shift_remove(&key)
            }
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(|n| n.id).collect()
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// On-disk link representation.
type LinkTuple = (LinkId, NodeId, SlotIndex, NodeId, SlotIndex, String);

/// A directed connection from one node's output slot to another node's
/// input slot. Serialized as the tool's fixed-position 6-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "LinkTuple", into = "LinkTuple")]
pub struct Link {
    pub id: LinkId,
    pub src_node: NodeId,
    pub src_slot: SlotIndex,
    pub dst_node: NodeId,
    pub dst_slot: SlotIndex,
    /// Data type carried by the link (e.g. `LATENT`).
    pub link_type: String,
}

impl From<LinkTuple> for Link {
    fn from((id, src_node, src_slot, dst_node, dst_slot, link_type): LinkTuple) -> Self {
        Self {
            id,
            src_node,
            src_slot,
            dst_node,
            dst_slot,
            link_type,
        }
    }
}

impl From<Link> for LinkTuple {
    fn from(l: Link) -> Self {
        (
            l.id,
            l.src_node,
            l.src_slot,
            l.dst_node,
            l.dst_slot,
            l.link_type,
        )
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}:{} -> {}:{} ({})",
            self.id, self.src_node, self.src_slot, self.dst_node, self.dst_slot, self.link_type
        )
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Output formatting when writing a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonStyle {
    /// No whitespace, as the tool itself saves.
    #[default]
    Compact,
    /// Two-space indentation.
    Pretty,
}

/// A saved workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    /// Opaque document identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub last_node_id: NodeId,
    #[serde(default)]
    pub last_link_id: LinkId,
    pub nodes: NodeCollection,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDocument {
    /// Read a workflow from disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let doc = Self::from_json_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            nodes = doc.nodes.len(),
            links = doc.links.len(),
            "Loaded workflow",
        );
        Ok(doc)
    }

    /// Parse a workflow from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Interpret an already-parsed JSON value as a workflow.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let obj = value.as_object().ok_or_else(|| {
            CoreError::Validation("Workflow JSON must be an object".to_string())
        })?;

        if !obj.contains_key("nodes") {
            if crate::api_prompt::looks_like_api_prompt(&value) {
                return Err(CoreError::Validation(
                    "File is an API-format prompt, not a saved workflow; \
                     graph edits need the saved (UI) format"
                        .to_string(),
                ));
            }
            return Err(CoreError::Validation(
                "Workflow JSON has no 'nodes' key".to_string(),
            ));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to JSON text.
    pub fn to_json_string(&self, style: JsonStyle) -> Result<String, CoreError> {
        Ok(match style {
            JsonStyle::Compact => serde_json::to_string(self)?,
            JsonStyle::Pretty => serde_json::to_string_pretty(self)?,
        })
    }

    /// Write the document to `path`, replacing any existing file atomically.
    ///
    /// The JSON is written to a temporary file in the destination directory
    /// and renamed over the target, so a crash never leaves a truncated file.
    pub fn save(&self, path: &Path, style: JsonStyle) -> Result<(), CoreError> {
        let text = self.to_json_string(style)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CoreError::io(dir, e))?;
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.flush())
            .map_err(|e| CoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| CoreError::io(path, e.error))?;

        tracing::info!(
            path = %path.display(),
            nodes = self.nodes.len(),
            links = self.links.len(),
            "Saved workflow",
        );
        Ok(())
    }

    // ---- lookups ----

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn require_node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.node(id)
            .ok_or(CoreError::NotFound { entity: "node", id })
    }

    pub fn require_node_mut(&mut self, id: NodeId) -> Result<&mut Node, CoreError> {
        self.node_mut(id)
            .ok_or(CoreError::NotFound { entity: "node", id })
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.id == id)
    }

    pub fn require_link(&self, id: LinkId) -> Result<&Link, CoreError> {
        self.link(id)
            .ok_or(CoreError::NotFound { entity: "link", id })
    }

    pub fn require_link_mut(&mut self, id: LinkId) -> Result<&mut Link, CoreError> {
        self.link_mut(id)
            .ok_or(CoreError::NotFound { entity: "link", id })
    }

    /// Links leaving `node`.
    pub fn links_from(&self, node: NodeId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.src_node == node)
    }

    /// All direct links from `src` to `dst`.
    pub fn links_between(&self, src: NodeId, dst: NodeId) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|l| l.src_node == src && l.dst_node == dst)
            .collect()
    }

    /// The single link from `src` to `dst`, optionally restricted to one
    /// destination slot. Errors when there is none or the choice is ambiguous.
    pub fn find_link(
        &self,
        src: NodeId,
        dst: NodeId,
        dst_slot: Option<SlotIndex>,
    ) -> Result<&Link, CoreError> {
        let candidates: Vec<&Link> = self
            .links_between(src, dst)
            .into_iter()
            .filter(|l| dst_slot.map_or(true, |s| l.dst_slot == s))
            .collect();

        match candidates.as_slice() {
            [] => Err(CoreError::Validation(format!(
                "No link from node {src} to node {dst}"
            ))),
            [only] => Ok(only),
            many => Err(CoreError::Validation(format!(
                "{} links from node {src} to node {dst}; specify the destination slot (links: {})",
                many.len(),
                many.iter()
                    .map(|l| l.id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Nodes whose type satisfies `pred`.
    pub fn nodes_where<'a, P>(&'a self, pred: P) -> impl Iterator<Item = &'a Node>
    where
        P: Fn(&Node) -> bool + 'a,
    {
        self.nodes.iter().filter(move |n| pred(n))
    }

    // ---- ID allocation ----

    /// Highest node ID present (0 for an empty document).
    pub fn max_node_id(&self) -> NodeId {
        self.nodes.iter().map(|n| n.id).max().unwrap_or(0)
    }

    /// Highest link ID present (0 for an empty document).
    pub fn max_link_id(&self) -> LinkId {
        self.links.iter().map(|l| l.id).max().unwrap_or(0)
    }

    /// First node ID above both the recorded counter and every ID in use.
    pub fn next_node_id(&self) -> NodeId {
        self.last_node_id.max(self.max_node_id()) + 1
    }

    /// First link ID above both the recorded counter and every ID in use.
    pub fn next_link_id(&self) -> LinkId {
        self.last_link_id.max(self.max_link_id()) + 1
    }

    /// Raise `last_node_id` / `last_link_id` to cover every ID present.
    /// Never lowers them.
    pub fn sync_last_ids(&mut self) {
        self.last_node_id = self.last_node_id.max(self.max_node_id());
        self.last_link_id = self.last_link_id.max(self.max_link_id());
    }

    /// Give the document a fresh identifier, for derived copies.
    pub fn reassign_id(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.id = Some(Value::String(id.clone()));
        id
    }
}
