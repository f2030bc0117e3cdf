//! Link splicing and pass-through removal.
//!
//! Splicing redirects an existing link `A -> B` through a new node `N`:
//! the original link is retargeted to `N`'s first input and a new link
//! carries `N`'s first output on to `B`. Removal is the inverse and
//! reconnects a pass-through node's upstream link to its consumers.
//!
//! Both run inside [`WorkflowDocument::transact`], so a failing step leaves
//! the document untouched.

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::graph::{node_modes, Link, Node, NodeInput, NodeOutput, WorkflowDocument};
use crate::types::{LinkId, NodeId, SlotIndex};

/// Type tag accepted by any slot.
pub const ANY_TYPE: &str = "*";

/// Whether a link of type `link_type` may feed a slot of type `slot_type`.
pub fn slot_accepts(slot_type: &str, link_type: &str) -> bool {
    if slot_type == ANY_TYPE || link_type == ANY_TYPE || slot_type == link_type {
        return true;
    }
    // Some slots list alternatives, e.g. `INT,FLOAT`.
    if slot_type.contains(',') {
        return slot_type.split(',').any(|t| slot_accepts(t.trim(), link_type));
    }

    // Numeric types are interchangeable.
    let numeric = ["INT", "FLOAT"];
    numeric.contains(&slot_type) && numeric.contains(&link_type)
}

// ---------------------------------------------------------------------------
// Node specification
// ---------------------------------------------------------------------------

/// Name and type of a slot on a node being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: String,
    pub slot_type: String,
}

impl SlotSpec {
    pub fn new(name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: slot_type.into(),
        }
    }
}

/// An extra input on an inserted node, optionally fed from an existing
/// `(node, output_slot)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxInput {
    pub slot: SlotSpec,
    pub source: Option<(NodeId, SlotIndex)>,
}

/// Description of a node to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub node_type: String,
    pub title: Option<String>,
    /// Requested ID; allocated automatically when `None`.
    pub id: Option<NodeId>,
    /// Primary input, fed by the spliced link.
    pub input: SlotSpec,
    /// Single output, feeding the original destination.
    pub output: SlotSpec,
    pub aux_inputs: Vec<AuxInput>,
    pub widgets_values: Option<Value>,
    pub mode: i64,
    pub size: Option<[f64; 2]>,
    pub properties: Map<String, Value>,
    /// Any further keys written verbatim onto the node (colours, flags).
    pub extra: Map<String, Value>,
}

impl NodeSpec {
    /// A node of `node_type` with a wildcard input and output.
    pub fn new(node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        let mut properties = Map::new();
        properties.insert(
            "Node name for S&R".to_string(),
            Value::String(node_type.clone()),
        );
        Self {
            node_type,
            title: None,
            id: None,
            input: SlotSpec::new("anything", ANY_TYPE),
            output: SlotSpec::new("output", ANY_TYPE),
            aux_inputs: Vec::new(),
            widgets_values: Some(Value::Array(Vec::new())),
            mode: node_modes::ALWAYS,
            size: None,
            properties,
            extra: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        self.input = SlotSpec::new(name, slot_type);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, slot_type: impl Into<String>) -> Self {
        self.output = SlotSpec::new(name, slot_type);
        self
    }

    pub fn with_aux_input(
        mut self,
        name: impl Into<String>,
        slot_type: impl Into<String>,
        source: Option<(NodeId, SlotIndex)>,
    ) -> Self {
        self.aux_inputs.push(AuxInput {
            slot: SlotSpec::new(name, slot_type),
            source,
        });
        self
    }

    pub fn with_widgets(mut self, values: Value) -> Self {
        self.widgets_values = Some(values);
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.size = Some([width, height]);
        self
    }

    pub fn with_colors(mut self, color: &str, bgcolor: &str) -> Self {
        self.extra
            .insert("color".to_string(), Value::String(color.to_string()));
        self.extra
            .insert("bgcolor".to_string(), Value::String(bgcolor.to_string()));
        self
    }

    /// Build the node record with the given ID, slot links and layout.
    fn build(
        &self,
        id: NodeId,
        input_link: LinkId,
        output_link: LinkId,
        aux_links: &[Option<LinkId>],
        order: Option<i64>,
        pos: Option<[f64; 2]>,
    ) -> Node {
        let mut inputs = vec![NodeInput {
            link: Some(input_link),
            ..NodeInput::new(&self.input.name, &self.input.slot_type)
        }];
        for (aux, link) in self.aux_inputs.iter().zip(aux_links) {
            inputs.push(NodeInput {
                link: *link,
                ..NodeInput::new(&aux.slot.name, &aux.slot.slot_type)
            });
        }

        let mut output = NodeOutput::new(&self.output.name, &self.output.slot_type);
        output.add_link(output_link);
        output
            .extra
            .insert("slot_index".to_string(), Value::from(0));

        let mut extra = self.extra.clone();
        if let Some([x, y]) = pos {
            extra.insert("pos".to_string(), serde_json::json!([x, y]));
        }
        if let Some([w, h]) = self.size {
            extra.insert("size".to_string(), serde_json::json!([w, h]));
        }
        extra
            .entry("flags".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        extra.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );
        if let Some(title) = &self.title {
            extra.insert("title".to_string(), Value::String(title.clone()));
        }

        Node {
            id,
            node_type: self.node_type.clone(),
            order,
            mode: self.mode,
            inputs,
            outputs: vec![output],
            widgets_values: self.widgets_values.clone(),
            extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of splicing one node into a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceReport {
    pub node_id: NodeId,
    /// The original link, now ending at the new node.
    pub upstream_link: LinkId,
    /// The new link from the new node to the original destination.
    pub downstream_link: LinkId,
    /// Links created for auxiliary inputs, in declaration order.
    pub aux_links: Vec<LinkId>,
}

/// Result of removing a pass-through node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub node_id: NodeId,
    /// The upstream link, now ending at the first downstream consumer.
    pub reconnected_link: Option<LinkId>,
    /// Links rerouted to start at the upstream source.
    pub rerouted_links: Vec<LinkId>,
    pub removed_links: Vec<LinkId>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl WorkflowDocument {
    /// Insert a node described by `spec` into link `link_id`.
    pub fn splice_node(&mut self, link_id: LinkId, spec: &NodeSpec) -> Result<SpliceReport, CoreError> {
        let report = self.transact(|doc| splice_in(doc, link_id, spec))?;
        tracing::info!(
            node_id = report.node_id,
            node_type = %spec.node_type,
            upstream_link = report.upstream_link,
            downstream_link = report.downstream_link,
            "Spliced node into link",
        );
        Ok(report)
    }

    /// Insert several nodes in sequence on one link: `A -> N1 -> N2 -> B`.
    pub fn splice_chain(
        &mut self,
        link_id: LinkId,
        specs: &[NodeSpec],
    ) -> Result<Vec<SpliceReport>, CoreError> {
        if specs.is_empty() {
            return Err(CoreError::Validation(
                "Chain splice needs at least one node".to_string(),
            ));
        }
        let reports = self.transact(|doc| {
            let mut reports = Vec::with_capacity(specs.len());
            let mut current = link_id;
            for spec in specs {
                let report = splice_in(doc, current, spec)?;
                current = report.downstream_link;
                reports.push(report);
            }
            Ok(reports)
        })?;
        tracing::info!(
            link_id,
            nodes = ?reports.iter().map(|r| r.node_id).collect::<Vec<_>>(),
            "Spliced node chain into link",
        );
        Ok(reports)
    }

    /// Remove a pass-through node, reconnecting its upstream link to every
    /// consumer of its first output.
    pub fn remove_passthrough(&mut self, node_id: NodeId) -> Result<RemovalReport, CoreError> {
        let report = self.transact(|doc| remove_out(doc, node_id))?;
        tracing::info!(
            node_id,
            reconnected_link = ?report.reconnected_link,
            removed_links = report.removed_links.len(),
            "Removed pass-through node",
        );
        Ok(report)
    }

    /// Remove every pass-through node of a type matching `matcher`.
    pub fn remove_passthrough_where(
        &mut self,
        matcher: &crate::edit::TypeMatcher,
    ) -> Result<Vec<RemovalReport>, CoreError> {
        let ids: Vec<NodeId> = self.nodes_where(|n| matcher.matches(n)).map(|n| n.id).collect();
        self.transact(|doc| ids.iter().map(|&id| remove_out(doc, id)).collect())
    }
}

fn splice_in(doc: &mut WorkflowDocument, link_id: LinkId, spec: &NodeSpec) -> Result<SpliceReport, CoreError> {
    let link = doc.require_link(link_id)?.clone();

    if !slot_accepts(&spec.input.slot_type, &link.link_type) {
        return Err(CoreError::Validation(format!(
            "Link {link_id} carries {} but {} input '{}' accepts {}",
            link.link_type, spec.node_type, spec.input.name, spec.input.slot_type
        )));
    }

    let node_id = match spec.id {
        Some(id) if doc.node(id).is_some() => {
            return Err(CoreError::Conflict(format!("Node id {id} is already in use")));
        }
        Some(id) => id,
        None => doc.next_node_id(),
    };

    let (src_pos, dst_pos, dst_order) = {
        let src_pos = doc.node(link.src_node).and_then(Node::pos);
        let dst = doc.require_node(link.dst_node)?;
        (src_pos, dst.pos(), dst.order)
    };

    // Destination slot: the input referencing the link, else the link's slot.
    let dst_slot = {
        let dst = doc.require_node(link.dst_node)?;
        dst.inputs
            .iter()
            .position(|i| i.link == Some(link_id))
            .or_else(|| ((link.dst_slot as usize) < dst.inputs.len()).then_some(link.dst_slot as usize))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Node {} has no input slot {} for link {link_id}",
                    link.dst_node, link.dst_slot
                ))
            })?
    };

    // (2) new link from N to the original destination
    let downstream = doc.next_link_id();
    doc.links.push(Link {
        id: downstream,
        src_node: node_id,
        src_slot: 0,
        dst_node: link.dst_node,
        dst_slot: dst_slot as SlotIndex,
        link_type: link.link_type.clone(),
    });

    // (3) destination input now references the new link
    doc.require_node_mut(link.dst_node)?.inputs[dst_slot].link = Some(downstream);

    // (1) original link now ends at N
    {
        let l = doc.require_link_mut(link_id)?;
        l.dst_node = node_id;
        l.dst_slot = 0;
    }

    let mut aux_links = Vec::with_capacity(spec.aux_inputs.len());
    for (idx, aux) in spec.aux_inputs.iter().enumerate() {
        let Some((src, src_slot)) = aux.source else {
            aux_links.push(None);
            continue;
        };
        let slot_type = {
            let src_node = doc.require_node(src)?;
            let out = src_node.outputs.get(src_slot as usize).ok_or_else(|| {
                CoreError::Validation(format!("Node {src} has no output slot {src_slot}"))
            })?;
            out.slot_type.clone()
        };
        if !slot_accepts(&aux.slot.slot_type, &slot_type) {
            return Err(CoreError::Validation(format!(
                "Node {src} output {src_slot} is {slot_type} but input '{}' accepts {}",
                aux.slot.name, aux.slot.slot_type
            )));
        }

        let aux_id = doc.next_link_id();
        doc.links.push(Link {
            id: aux_id,
            src_node: src,
            src_slot,
            dst_node: node_id,
            dst_slot: (idx + 1) as SlotIndex,
            link_type: slot_type,
        });
        doc.require_node_mut(src)?.outputs[src_slot as usize].add_link(aux_id);
        aux_links.push(Some(aux_id));
    }

    // N takes the destination's place in execution order.
    if let Some(order) = dst_order {
        for n in doc.nodes.iter_mut() {
            if let Some(o) = n.order.as_mut() {
                if *o >= order {
                    *o += 1;
                }
            }
        }
    }

    let pos = match (src_pos, dst_pos) {
        (Some([sx, sy]), Some([dx, dy])) => Some([(sx + dx) / 2.0, (sy + dy) / 2.0]),
        (_, Some(d)) => Some(d),
        _ => None,
    };

    let node = spec.build(node_id, link_id, downstream, &aux_links, dst_order, pos);
    doc.nodes.insert(node);

    Ok(SpliceReport {
        node_id,
        upstream_link: link_id,
        downstream_link: downstream,
        aux_links: aux_links.into_iter().flatten().collect(),
    })
}

fn remove_out(doc: &mut WorkflowDocument, node_id: NodeId) -> Result<RemovalReport, CoreError> {
    let node = doc.require_node(node_id)?.clone();

    let upstream = node
        .inputs
        .first()
        .and_then(|i| i.link)
        .and_then(|id| doc.link(id))
        .filter(|l| l.dst_node == node_id)
        .cloned();

    let mut downstream: Vec<Link> = doc
        .links
        .iter()
        .filter(|l| l.src_node == node_id && l.src_slot == 0)
        .cloned()
        .collect();
    downstream.sort_by_key(|l| l.id);

    check_passthrough_shape(&node)?;
    if let Some(up) = &upstream {
        for consumer in &downstream {
            let slot_type = doc
                .require_node(consumer.dst_node)?
                .inputs
                .get(consumer.dst_slot as usize)
                .map(|i| i.slot_type.as_str())
                .unwrap_or(consumer.link_type.as_str());
            if !slot_accepts(slot_type, &up.link_type) {
                return Err(CoreError::Validation(format!(
                    "Cannot remove node {node_id}: link {} carries {} but node {} input {} accepts {slot_type}",
                    up.id, up.link_type, consumer.dst_node, consumer.dst_slot
                )));
            }
        }
    }

    let mut reconnected_link = None;
    let mut rerouted_links = Vec::new();
    let mut removed_links = Vec::new();

    match &upstream {
        Some(up) => {
            let mut consumers = downstream.iter();
            if let Some(first) = consumers.next() {
                // Upstream link takes over the first consumer's slot.
                {
                    let l = doc.require_link_mut(up.id)?;
                    l.dst_node = first.dst_node;
                    l.dst_slot = first.dst_slot;
                    if l.link_type == ANY_TYPE {
                        l.link_type = first.link_type.clone();
                    }
                }
                set_input_link(doc, first.dst_node, first.dst_slot, Some(up.id));
                doc.links.retain(|l| l.id != first.id);
                removed_links.push(first.id);
                reconnected_link = Some(up.id);
            }
            for other in consumers {
                {
                    let l = doc.require_link_mut(other.id)?;
                    l.src_node = up.src_node;
                    l.src_slot = up.src_slot;
                }
                if let Some(out) = doc
                    .node_mut(up.src_node)
                    .and_then(|n| n.outputs.get_mut(up.src_slot as usize))
                {
                    out.add_link(other.id);
                }
                rerouted_links.push(other.id);
            }
            if reconnected_link.is_none() {
                // Nothing consumed the node: drop the upstream link too.
                unlink(doc, up);
                removed_links.push(up.id);
            }
        }
        None => {
            for l in &downstream {
                unlink(doc, l);
                removed_links.push(l.id);
            }
        }
    }

    // Any remaining links touching the node go away with it.
    let leftovers: Vec<Link> = doc
        .links
        .iter()
        .filter(|l| l.src_node == node_id || l.dst_node == node_id)
        .cloned()
        .collect();
    for l in &leftovers {
        unlink(doc, l);
        removed_links.push(l.id);
    }

    doc.nodes.remove(node_id);

    Ok(RemovalReport {
        node_id,
        reconnected_link,
        rerouted_links,
        removed_links,
    })
}

/// A removable node forwards its first input to its first output; nothing
/// else may leave it.
fn check_passthrough_shape(node: &Node) -> Result<(), CoreError> {
    if let Some((slot, _)) = node
        .outputs
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, o)| !o.link_ids().is_empty())
    {
        return Err(CoreError::Validation(format!(
            "Cannot remove node {}: output {slot} is still connected",
            node.id
        )));
    }
    if let (Some(input), Some(output)) = (node.inputs.first(), node.outputs.first()) {
        if !slot_accepts(&output.slot_type, &input.slot_type) {
            return Err(CoreError::Validation(format!(
                "Cannot remove node {} ({}): input {} does not pass through to output {}",
                node.id, node.node_type, input.slot_type, output.slot_type
            )));
        }
    }
    Ok(())
}

fn set_input_link(doc: &mut WorkflowDocument, node: NodeId, slot: SlotIndex, link: Option<LinkId>) {
    if let Some(input) = doc
        .node_mut(node)
        .and_then(|n| n.inputs.get_mut(slot as usize))
    {
        input.link = link;
    }
}

/// Delete a link and clear the slot references to it at both ends.
fn unlink(doc: &mut WorkflowDocument, link: &Link) {
    if let Some(out) = doc
        .node_mut(link.src_node)
        .and_then(|n| n.outputs.get_mut(link.src_slot as usize))
    {
        out.remove_link(link.id);
    }
    if let Some(input) = doc
        .node_mut(link.dst_node)
        .and_then(|n| n.inputs.get_mut(link.dst_slot as usize))
    {
        if input.link == Some(link.id) {
            input.link = None;
        }
    }
    doc.links.retain(|l| l.id != link.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity;
    use assert_matches::assert_matches;

    fn two_samplers() -> WorkflowDocument {
        WorkflowDocument::from_json_str(
            r#"{
            "last_node_id": 90, "last_link_id": 226,
            "nodes": [
                {"id": 86, "type": "KSamplerAdvanced", "pos": [0, 0], "order": 10, "mode": 0,
                 "inputs": [{"name": "model", "type": "MODEL", "link": 5}],
                 "outputs": [{"name": "LATENT", "type": "LATENT", "links": [170], "slot_index": 0}]},
                {"id": 85, "type": "KSamplerAdvanced", "pos": [400, 100], "order": 11, "mode": 0,
                 "inputs": [
                    {"name": "model", "type": "MODEL", "link": 6},
                    {"name": "positive", "type": "CONDITIONING", "link": null},
                    {"name": "negative", "type": "CONDITIONING", "link": null},
                    {"name": "latent_image", "type": "LATENT", "link": 170}
                 ],
                 "outputs": [{"name": "LATENT", "type": "LATENT", "links": []}]},
                {"id": 90, "type": "UNETLoader", "order": 0, "mode": 0, "inputs": [],
                 "outputs": [{"name": "MODEL", "type": "MODEL", "links": [5, 6]}]}
            ],
            "links": [
                [5, 90, 0, 86, 0, "MODEL"],
                [6, 90, 0, 85, 0, "MODEL"],
                [170, 86, 0, 85, 3, "LATENT"]
            ]
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn splice_retargets_link_and_adds_downstream() {
        let mut doc = two_samplers();
        let report = doc
            .splice_node(170, &NodeSpec::new("easy cleanGpuUsed").with_id(119))
            .unwrap();

        assert_eq!(report.node_id, 119);
        assert_eq!(report.downstream_link, 227);
        let up = doc.link(170).unwrap();
        assert_eq!((up.src_node, up.src_slot, up.dst_node, up.dst_slot), (86, 0, 119, 0));
        let down = doc.link(227).unwrap();
        assert_eq!((down.src_node, down.src_slot, down.dst_node, down.dst_slot), (119, 0, 85, 3));
        assert_eq!(down.link_type, "LATENT");
        assert_eq!(doc.node(85).unwrap().inputs[3].link, Some(227));
        assert_eq!(doc.last_link_id, 227);
        assert_eq!(doc.last_node_id, 119);
        assert!(doc.links_between(86, 85).is_empty());
        assert!(integrity::validate(&doc).is_empty());

        let n = doc.node(119).unwrap();
        assert_eq!(n.order, Some(11));
        assert_eq!(doc.node(85).unwrap().order, Some(12));
        assert_eq!(n.pos(), Some([200.0, 50.0]));
    }

    #[test]
    fn splice_allocates_next_free_ids() {
        let mut doc = two_samplers();
        let report = doc.splice_node(170, &NodeSpec::new("Passthrough")).unwrap();
        assert_eq!(report.node_id, 91);
        assert_eq!(report.downstream_link, 227);
    }

    #[test]
    fn splice_rejects_used_id_without_changes() {
        let mut doc = two_samplers();
        let before = doc.clone();
        let err = doc
            .splice_node(170, &NodeSpec::new("X").with_id(85))
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));
        assert_eq!(doc, before);
    }

    #[test]
    fn splice_rejects_incompatible_input_type() {
        let mut doc = two_samplers();
        let spec = NodeSpec::new("ModelPatch").with_input("model", "MODEL");
        assert_matches!(doc.splice_node(170, &spec), Err(CoreError::Validation(_)));
    }

    #[test]
    fn splice_unknown_link_is_not_found() {
        let mut doc = two_samplers();
        assert_matches!(
            doc.splice_node(999, &NodeSpec::new("X")),
            Err(CoreError::NotFound { entity: "link", id: 999 })
        );
    }

    #[test]
    fn chain_splice_builds_single_path() {
        let mut doc = two_samplers();
        let reports = doc
            .splice_chain(
                170,
                &[NodeSpec::new("easy cleanGpuUsed"), NodeSpec::new("easy clearCacheAll")],
            )
            .unwrap();
        assert_eq!(reports.len(), 2);
        let (a, b) = (reports[0].node_id, reports[1].node_id);
        assert_eq!(doc.links_between(86, a).len(), 1);
        assert_eq!(doc.links_between(a, b).len(), 1);
        assert_eq!(doc.links_between(b, 85).len(), 1);
        assert!(doc.links_between(86, 85).is_empty());
        assert!(integrity::validate(&doc).is_empty());
    }

    #[test]
    fn aux_input_registers_in_source_outputs() {
        let mut doc = two_samplers();
        let spec = NodeSpec::new("Delete Model (Passthrough Any)")
            .with_aux_input("model", "MODEL", Some((90, 0)));
        let report = doc.splice_node(170, &spec).unwrap();
        assert_eq!(report.aux_links.len(), 1);
        let aux = report.aux_links[0];
        assert!(doc.node(90).unwrap().outputs[0].link_ids().contains(&aux));
        let node = doc.node(report.node_id).unwrap();
        assert_eq!(node.inputs[1].link, Some(aux));
        assert!(integrity::validate(&doc).is_empty());
    }

    #[test]
    fn removal_restores_direct_link() {
        let mut doc = two_samplers();
        let report = doc.splice_node(170, &NodeSpec::new("easy cleanGpuUsed")).unwrap();

        let removal = doc.remove_passthrough(report.node_id).unwrap();
        assert_eq!(removal.reconnected_link, Some(170));
        assert!(doc.node(report.node_id).is_none());
        let l = doc.link(170).unwrap();
        assert_eq!((l.src_node, l.dst_node, l.dst_slot), (86, 85, 3));
        assert_eq!(doc.node(85).unwrap().inputs[3].link, Some(170));
        assert!(doc.link(report.downstream_link).is_none());
        assert!(integrity::validate(&doc).is_empty());
    }

    #[test]
    fn removal_reroutes_extra_consumers() {
        let mut doc = two_samplers();
        // Model loader feeds both samplers; remove a node fanned out the same way.
        let report = doc
            .splice_node(5, &NodeSpec::new("ModelPatch").with_input("model", "MODEL"))
            .unwrap();
        let patch = report.node_id;
        // Move link 6 so it also leaves the patch node.
        doc.transact(|d| {
            let l = d.require_link_mut(6)?;
            l.src_node = patch;
            d.require_node_mut(90)?.outputs[0].remove_link(6);
            d.require_node_mut(patch)?.outputs[0].add_link(6);
            Ok(())
        })
        .unwrap();

        // Link 6 has the lowest ID of the consumers, so link 5 takes its slot
        // and the spliced downstream link is rerouted to the loader.
        let removal = doc.remove_passthrough(patch).unwrap();
        assert_eq!(removal.reconnected_link, Some(5));
        assert_eq!(removal.rerouted_links, vec![report.downstream_link]);
        let l5 = doc.link(5).unwrap();
        assert_eq!((l5.src_node, l5.dst_node, l5.dst_slot), (90, 85, 0));
        assert_eq!(doc.link(report.downstream_link).unwrap().src_node, 90);
        assert!(doc
            .node(90)
            .unwrap()
            .outputs[0]
            .link_ids()
            .contains(&report.downstream_link));
        assert!(doc.link(6).is_none());
        assert!(integrity::validate(&doc).is_empty());
    }

    #[test]
    fn removal_rejects_node_that_changes_type() {
        let mut doc = two_samplers();
        let before = doc.clone();
        // KSamplerAdvanced takes MODEL and emits LATENT; its MODEL link must
        // not end up in the downstream latent_image slot.
        let err = doc.remove_passthrough(86).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("pass through"));
        assert_eq!(doc, before);
    }

    #[test]
    fn removal_rejects_upstream_type_the_consumer_refuses() {
        let mut doc = WorkflowDocument::from_json_str(
            r#"{
            "last_node_id": 91, "last_link_id": 8,
            "nodes": [
                {"id": 90, "type": "UNETLoader", "mode": 0, "inputs": [],
                 "outputs": [{"name": "MODEL", "type": "MODEL", "links": [7]}]},
                {"id": 91, "type": "Reroute", "mode": 0,
                 "inputs": [{"name": "", "type": "*", "link": 7}],
                 "outputs": [{"name": "", "type": "*", "links": [8]}]},
                {"id": 85, "type": "KSamplerAdvanced", "mode": 0,
                 "inputs": [{"name": "latent_image", "type": "LATENT", "link": 8}],
                 "outputs": []}
            ],
            "links": [[7, 90, 0, 91, 0, "MODEL"], [8, 91, 0, 85, 0, "*"]]
        }"#,
        )
        .unwrap();
        let before = doc.clone();

        let err = doc.remove_passthrough(91).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("accepts LATENT"));
        assert_eq!(doc, before);
    }

    #[test]
    fn removal_rejects_second_connected_output() {
        let mut doc = two_samplers();
        let report = doc
            .splice_node(170, &NodeSpec::new("Passthrough").with_input("latent", "LATENT"))
            .unwrap();
        let id = report.node_id;
        doc.transact(|d| {
            let link = d.next_link_id();
            d.links.push(Link {
                id: link,
                src_node: id,
                src_slot: 1,
                dst_node: 85,
                dst_slot: 1,
                link_type: "CONDITIONING".into(),
            });
            let node = d.require_node_mut(id)?;
            node.outputs.push(NodeOutput {
                name: "extra".into(),
                slot_type: "CONDITIONING".into(),
                links: Some(vec![link]),
                extra: Map::new(),
            });
            d.require_node_mut(85)?.inputs[1].link = Some(link);
            Ok(())
        })
        .unwrap();
        let before = doc.clone();

        let err = doc.remove_passthrough(id).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("output 1"));
        assert_eq!(doc, before);
    }
}
