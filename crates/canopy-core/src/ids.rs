//! Deterministic identifiers.
//!
//! Re-upserting the same logical entity or relationship must land on the same
//! primary key, so ids are pure functions of their identifying fields.

use std::sync::LazyLock;

use uuid::Uuid;

use crate::edge::model::EdgeType;
use crate::node::model::NodeType;

static EDGE_NAMESPACE: LazyLock<Uuid> =
    LazyLock::new(|| Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"edges.canopy.dev"));

/// `"{node_type}:{source_entity_id}"`. Type names never contain `:`, so the
/// split point is unambiguous.
pub fn node_id(node_type: NodeType, source_entity_id: &str) -> String {
    format!("{}:{}", node_type.as_str(), source_entity_id)
}

/// UUIDv5 over source, target and type separated by the ASCII unit separator.
pub fn edge_id(source_node_id: &str, target_node_id: &str, edge_type: EdgeType) -> String {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}",
        source_node_id,
        target_node_id,
        edge_type.as_str()
    );
    Uuid::new_v5(&EDGE_NAMESPACE, key.as_bytes()).to_string()
}
