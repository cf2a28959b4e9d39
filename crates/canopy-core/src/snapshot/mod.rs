//! Snapshot feed: the complete set of live entities for one partition.
//!
//! Producers send every still-live entity of a (site, type) partition on
//! every cycle. Conversion into graph records validates the whole snapshot
//! up front; one malformed entry rejects the batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::edge::model::{EdgeType, GraphEdge};
use crate::error::{CanopyError, CanopyResult};
use crate::node::model::{GraphNode, NodeType};
use crate::node::properties::NodeProperties;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshotEntry {
    pub source_entity_id: String,
    pub label: String,
    pub properties: Value,
    #[serde(default)]
    pub feature_vector: Option<Vec<f32>>,
    pub source_created_at: DateTime<Utc>,
    pub source_updated_at: DateTime<Utc>,
}

/// Complete node set for `(site_id, node_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub site_id: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub entries: Vec<NodeSnapshotEntry>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshotEntry {
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub relationship_created_at: DateTime<Utc>,
}

/// Complete edge set for `(site_id, edge_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub site_id: String,
    pub edge_type: EdgeType,
    #[serde(default)]
    pub entries: Vec<EdgeSnapshotEntry>,
}

/// A file-sized bundle of partitions, as read by `canopy sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub edges: Vec<EdgeSnapshot>,
}

fn require_id(kind: &str, value: &str) -> CanopyResult<()> {
    if value.trim().is_empty() {
        return Err(CanopyError::validation(format!("{} must not be empty", kind)));
    }
    Ok(())
}

/// Keep the last occurrence of each key, in first-seen order.
fn last_wins<T>(partition: &str, items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let received = items.len();
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        match slots.get(&k) {
            Some(&i) => out[i] = item,
            None => {
                slots.insert(k, out.len());
                out.push(item);
            }
        }
    }
    if out.len() < received {
        debug!(partition, received, kept = out.len(), "Collapsed duplicate snapshot entries");
    }
    out
}

impl NodeSnapshot {
    pub fn new(site_id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            site_id: site_id.into(),
            node_type,
            entries: Vec::new(),
        }
    }

    /// Validate and convert every entry. Fails on the first malformed entry.
    pub fn into_nodes(self) -> CanopyResult<Vec<GraphNode>> {
        require_id("site_id", &self.site_id)?;
        let node_type = self.node_type;
        let mut nodes = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            require_id("source_entity_id", &entry.source_entity_id)?;
            if let Some(features) = &entry.feature_vector {
                if features.iter().any(|f| !f.is_finite()) {
                    return Err(CanopyError::validation(format!(
                        "{} '{}' has a non-finite feature",
                        node_type, entry.source_entity_id
                    )));
                }
            }
            if !entry.properties.is_object() {
                return Err(CanopyError::validation(format!(
                    "{} '{}' properties must be a JSON object",
                    node_type, entry.source_entity_id
                )));
            }
            let properties = NodeProperties::from_value(node_type, entry.properties)?;
            let mut node = GraphNode::new(
                self.site_id.clone(),
                entry.source_entity_id,
                entry.label,
                properties,
                entry.source_created_at,
                entry.source_updated_at,
            );
            node.feature_vector = entry.feature_vector;
            nodes.push(node);
        }
        Ok(last_wins(node_type.as_str(), nodes, |n| n.node_id.clone()))
    }
}

impl EdgeSnapshot {
    pub fn new(site_id: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            site_id: site_id.into(),
            edge_type,
            entries: Vec::new(),
        }
    }

    pub fn into_edges(self) -> CanopyResult<Vec<GraphEdge>> {
        require_id("site_id", &self.site_id)?;
        let edge_type = self.edge_type;
        let mut edges = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            require_id("source_node_id", &entry.source_node_id)?;
            require_id("target_node_id", &entry.target_node_id)?;
            if !entry.weight.is_finite() {
                return Err(CanopyError::validation(format!(
                    "{} edge {} -> {} has a non-finite weight",
                    edge_type, entry.source_node_id, entry.target_node_id
                )));
            }
            let edge = GraphEdge::new(
                self.site_id.clone(),
                edge_type,
                entry.source_node_id,
                entry.target_node_id,
                entry.relationship_created_at,
            )
            .with_weight(entry.weight)
            .with_properties(entry.properties);
            edges.push(edge);
        }
        Ok(last_wins(edge_type.as_str(), edges, |e| e.edge_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn package_entry(source: &str, quantity: f64) -> Value {
        json!({
            "source_entity_id": source,
            "label": format!("Package {}", source),
            "properties": {
                "package_label": format!("1A40{}", source),
                "item_name": "Flower",
                "quantity": quantity,
                "unit_of_measure": "Grams",
                "status": "active",
                "room_id": null
            },
            "source_created_at": "2026-01-05T12:00:00Z",
            "source_updated_at": "2026-01-05T12:00:00Z"
        })
    }

    #[test]
    fn test_node_snapshot_from_json() {
        let raw = json!({
            "site_id": "site-1",
            "node_type": "package",
            "entries": [package_entry("p1", 10.0), package_entry("p2", 4.0)]
        });
        let snapshot: NodeSnapshot = serde_json::from_value(raw).unwrap();
        let nodes = snapshot.into_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id, "package:p1");
        assert_eq!(nodes[1].site_id, "site-1");
    }

    #[test]
    fn test_duplicate_source_ids_last_wins() {
        let raw = json!({
            "site_id": "s",
            "node_type": "package",
            "entries": [package_entry("p1", 1.0), package_entry("p2", 2.0), package_entry("p1", 3.0)]
        });
        let nodes = serde_json::from_value::<NodeSnapshot>(raw)
            .unwrap()
            .into_nodes()
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id, "package:p1");
        match &nodes[0].properties {
            NodeProperties::Package(p) => assert_eq!(p.quantity, 3.0),
            other => panic!("unexpected properties {:?}", other),
        }
    }

    #[test]
    fn test_malformed_entry_rejects_batch() {
        let mut bad = package_entry("p2", 1.0);
        bad["properties"] = json!({"plant_tag": "x"});
        let raw = json!({
            "site_id": "s",
            "node_type": "package",
            "entries": [package_entry("p1", 1.0), bad]
        });
        let err = serde_json::from_value::<NodeSnapshot>(raw)
            .unwrap()
            .into_nodes()
            .unwrap_err();
        assert!(matches!(err, CanopyError::ValidationError(_)));
    }

    #[test]
    fn test_empty_ids_and_bad_features_rejected() {
        let mut entry = package_entry("", 1.0);
        let raw = json!({"site_id": "s", "node_type": "package", "entries": [entry.clone()]});
        assert!(serde_json::from_value::<NodeSnapshot>(raw).unwrap().into_nodes().is_err());

        entry["source_entity_id"] = json!("p1");
        entry["properties"] = json!([1, 2]);
        let raw = json!({"site_id": "s", "node_type": "package", "entries": [entry]});
        assert!(serde_json::from_value::<NodeSnapshot>(raw).unwrap().into_nodes().is_err());

        let mut snapshot = NodeSnapshot::new("s", NodeType::Package);
        snapshot.entries.push(NodeSnapshotEntry {
            source_entity_id: "p1".to_string(),
            label: "P1".to_string(),
            properties: package_entry("p1", 1.0)["properties"].clone(),
            feature_vector: Some(vec![0.5, f32::NAN]),
            source_created_at: Utc::now(),
            source_updated_at: Utc::now(),
        });
        assert!(snapshot.into_nodes().is_err());
    }

    #[test]
    fn test_edge_snapshot_defaults_and_validation() {
        let raw = json!({
            "site_id": "s",
            "edge_type": "lineage_of",
            "entries": [
                {"source_node_id": "package:a", "target_node_id": "package:b",
                 "relationship_created_at": "2026-01-01T00:00:00Z"}
            ]
        });
        let edges = serde_json::from_value::<EdgeSnapshot>(raw)
            .unwrap()
            .into_edges()
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].weight, 1.0);
        assert!(edges[0].properties.is_empty());

        let mut snapshot = EdgeSnapshot::new("s", EdgeType::LineageOf);
        snapshot.entries.push(EdgeSnapshotEntry {
            source_node_id: "package:a".to_string(),
            target_node_id: "".to_string(),
            weight: 1.0,
            properties: Map::new(),
            relationship_created_at: Utc::now(),
        });
        assert!(snapshot.into_edges().is_err());
    }

    #[test]
    fn test_batch_defaults_to_empty() {
        let batch: SnapshotBatch = serde_json::from_str("{}").unwrap();
        assert!(batch.nodes.is_empty());
        assert!(batch.edges.is_empty());
    }
}
