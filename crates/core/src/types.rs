/// Node identifiers are the integers stored in each node's `id` field.
pub type NodeId = i64;

/// Link identifiers are the first element of each link tuple.
pub type LinkId = i64;

/// Zero-based position in a node's `inputs` or `outputs` list.
pub type SlotIndex = u32;
