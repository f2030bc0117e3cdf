//! Referential-integrity checks over a workflow document.
//!
//! Every link must agree with the slots at both of its endpoints, every
//! slot reference must name a link that really connects that slot, and the
//! ID counters must not lag behind the IDs in use.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::CoreError;
use crate::graph::WorkflowDocument;
use crate::splice::slot_accepts;
use crate::types::{LinkId, NodeId, SlotIndex};

/// Which side of a node a slot sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Input,
    Output,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Input => "input",
            Side::Output => "output",
        })
    }
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Violation {
    DuplicateNodeId(NodeId),
    DuplicateLinkId(LinkId),
    /// A link names a node that does not exist.
    MissingEndpoint { link: LinkId, node: NodeId },
    /// A link names a slot index past the end of the node's slot list.
    SlotOutOfRange {
        link: LinkId,
        node: NodeId,
        side: Side,
        slot: SlotIndex,
    },
    /// The destination slot of a link does not point back at it.
    InputNotLinked { link: LinkId, node: NodeId, slot: SlotIndex },
    /// A link's data type is not accepted by its destination slot.
    TypeMismatch {
        link: LinkId,
        link_type: String,
        node: NodeId,
        slot: SlotIndex,
        slot_type: String,
    },
    /// The source slot of a link does not list it.
    OutputNotListing { link: LinkId, node: NodeId, slot: SlotIndex },
    /// A slot references a link ID that does not exist.
    DanglingReference {
        node: NodeId,
        side: Side,
        slot: SlotIndex,
        link: LinkId,
    },
    /// A slot references a link that exists but connects elsewhere.
    MisdirectedReference {
        node: NodeId,
        side: Side,
        slot: SlotIndex,
        link: LinkId,
    },
    LastNodeIdBehind { recorded: NodeId, max: NodeId },
    LastLinkIdBehind { recorded: LinkId, max: LinkId },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateNodeId(id) => write!(f, "node id {id} used more than once"),
            Violation::DuplicateLinkId(id) => write!(f, "link id {id} used more than once"),
            Violation::MissingEndpoint { link, node } => {
                write!(f, "link {link} references missing node {node}")
            }
            Violation::SlotOutOfRange {
                link,
                node,
                side,
                slot,
            } => write!(f, "link {link} references {side} slot {slot} of node {node}, which does not exist"),
            Violation::InputNotLinked { link, node, slot } => {
                write!(f, "link {link} ends at node {node} input {slot}, but that input does not reference it")
            }
            Violation::TypeMismatch {
                link,
                link_type,
                node,
                slot,
                slot_type,
            } => write!(f, "link {link} carries {link_type} into node {node} input {slot}, which accepts {slot_type}"),
            Violation::OutputNotListing { link, node, slot } => {
                write!(f, "link {link} starts at node {node} output {slot}, but that output does not list it")
            }
            Violation::DanglingReference {
                node,
                side,
                slot,
                link,
            } => write!(f, "node {node} {side} {slot} references missing link {link}"),
            Violation::MisdirectedReference {
                node,
                side,
                slot,
                link,
            } => write!(f, "node {node} {side} {slot} references link {link}, which connects elsewhere"),
            Violation::LastNodeIdBehind { recorded, max } => {
                write!(f, "last_node_id {recorded} is below highest node id {max}")
            }
            Violation::LastLinkIdBehind { recorded, max } => {
                write!(f, "last_link_id {recorded} is below highest link id {max}")
            }
        }
    }
}

/// Collect every integrity violation in `doc`. An empty result means the
/// document is consistent.
pub fn validate(doc: &WorkflowDocument) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut seen_nodes = HashSet::new();
    for node in doc.nodes.iter() {
        if !seen_nodes.insert(node.id) {
            violations.push(Violation::DuplicateNodeId(node.id));
        }
    }

    let mut links_by_id = HashMap::new();
    for link in &doc.links {
        if links_by_id.insert(link.id, link).is_some() {
            violations.push(Violation::DuplicateLinkId(link.id));
        }
    }

    // Link-side checks: both endpoints exist and agree.
    for link in &doc.links {
        match doc.node(link.src_node) {
            None => violations.push(Violation::MissingEndpoint {
                link: link.id,
                node: link.src_node,
            }),
            Some(src) => match src.outputs.get(link.src_slot as usize) {
                None => violations.push(Violation::SlotOutOfRange {
                    link: link.id,
                    node: src.id,
                    side: Side::Output,
                    slot: link.src_slot,
                }),
                Some(out) if !out.link_ids().contains(&link.id) => {
                    violations.push(Violation::OutputNotListing {
                        link: link.id,
                        node: src.id,
                        slot: link.src_slot,
                    })
                }
                Some(_) => {}
            },
        }

        match doc.node(link.dst_node) {
            None => violations.push(Violation::MissingEndpoint {
                link: link.id,
                node: link.dst_node,
            }),
            Some(dst) => match dst.inputs.get(link.dst_slot as usize) {
                None => violations.push(Violation::SlotOutOfRange {
                    link: link.id,
                    node: dst.id,
                    side: Side::Input,
                    slot: link.dst_slot,
                }),
                Some(input) if input.link != Some(link.id) => {
                    violations.push(Violation::InputNotLinked {
                        link: link.id,
                        node: dst.id,
                        slot: link.dst_slot,
                    })
                }
                Some(input) if !slot_accepts(&input.slot_type, &link.link_type) => {
                    violations.push(Violation::TypeMismatch {
                        link: link.id,
                        link_type: link.link_type.clone(),
                        node: dst.id,
                        slot: link.dst_slot,
                        slot_type: input.slot_type.clone(),
                    })
                }
                Some(_) => {}
            },
        }
    }

    // Slot-side checks: every reference names a link that connects here.
    for node in doc.nodes.iter() {
        for (idx, input) in node.inputs.iter().enumerate() {
            let Some(link_id) = input.link else { continue };
            let slot = idx as SlotIndex;
            match links_by_id.get(&link_id) {
                None => violations.push(Violation::DanglingReference {
                    node: node.id,
                    side: Side::Input,
                    slot,
                    link: link_id,
                }),
                Some(l) if l.dst_node != node.id || l.dst_slot != slot => {
                    violations.push(Violation::MisdirectedReference {
                        node: node.id,
                        side: Side::Input,
                        slot,
                        link: link_id,
                    })
                }
                Some(_) => {}
            }
        }

        for (idx, output) in node.outputs.iter().enumerate() {
            let slot = idx as SlotIndex;
            for &link_id in output.link_ids() {
                match links_by_id.get(&link_id) {
                    None => violations.push(Violation::DanglingReference {
                        node: node.id,
                        side: Side::Output,
                        slot,
                        link: link_id,
                    }),
                    Some(l) if l.src_node != node.id || l.src_slot != slot => {
                        violations.push(Violation::MisdirectedReference {
                            node: node.id,
                            side: Side::Output,
                            slot,
                            link: link_id,
                        })
                    }
                    Some(_) => {}
                }
            }
        }
    }

    let max_node = doc.max_node_id();
    if doc.last_node_id < max_node {
        violations.push(Violation::LastNodeIdBehind {
            recorded: doc.last_node_id,
            max: max_node,
        });
    }
    let max_link = doc.max_link_id();
    if doc.last_link_id < max_link {
        violations.push(Violation::LastLinkIdBehind {
            recorded: doc.last_link_id,
            max: max_link,
        });
    }

    violations
}

/// Fail with [`CoreError::Integrity`] if `doc` has any violation.
pub fn ensure_valid(doc: &WorkflowDocument) -> Result<(), CoreError> {
    let violations = validate(doc);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Integrity(violations))
    }
}
