//! Sync-pipeline health statistics.

use std::collections::BTreeMap;

use canopy_core::{CanopyResult, EdgeType, NodeType};
use canopy_db::queries::stats::get_site_stats;
use canopy_db::timestamp::parse_timestamp;
use canopy_db::DbPool;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Active counts for one site and the freshest snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub site_id: String,
    pub total_nodes: u64,
    pub total_edges: u64,
    pub nodes_by_type: BTreeMap<NodeType, u64>,
    pub edges_by_type: BTreeMap<EdgeType, u64>,
    /// Latest `snapshot_at` over all of the site's nodes, including inactive ones.
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

pub async fn get_statistics(pool: &DbPool, site_id: &str) -> CanopyResult<GraphStatistics> {
    let raw = get_site_stats(pool, site_id).await?;

    let mut nodes_by_type = BTreeMap::new();
    for (name, count) in &raw.nodes_by_type {
        nodes_by_type.insert(name.parse::<NodeType>()?, *count as u64);
    }
    let mut edges_by_type = BTreeMap::new();
    for (name, count) in &raw.edges_by_type {
        edges_by_type.insert(name.parse::<EdgeType>()?, *count as u64);
    }
    let last_snapshot_at = raw
        .last_snapshot_at
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;

    Ok(GraphStatistics {
        site_id: site_id.to_string(),
        total_nodes: raw.total_nodes() as u64,
        total_edges: raw.total_edges() as u64,
        nodes_by_type,
        edges_by_type,
        last_snapshot_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::ReconciliationEngine;
    use canopy_core::snapshot::{EdgeSnapshot, EdgeSnapshotEntry, NodeSnapshot, NodeSnapshotEntry};
    use canopy_db::init_memory_pool;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn plants(site: &str, tags: &[&str]) -> NodeSnapshot {
        let mut snapshot = NodeSnapshot::new(site, NodeType::Plant);
        snapshot.entries = tags
            .iter()
            .map(|tag| NodeSnapshotEntry {
                source_entity_id: tag.to_string(),
                label: tag.to_string(),
                properties: json!({
                    "plant_tag": tag,
                    "growth_phase": "flowering",
                    "strain_id": null,
                    "room_id": "flower-2"
                }),
                feature_vector: Some(vec![0.25, 0.75]),
                source_created_at: ts(),
                source_updated_at: ts(),
            })
            .collect();
        snapshot
    }

    #[tokio::test]
    async fn test_empty_site() {
        let pool = init_memory_pool().unwrap();
        let stats = get_statistics(&pool, "nowhere").await.unwrap();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.total_edges, 0);
        assert!(stats.nodes_by_type.is_empty());
        assert_eq!(stats.last_snapshot_at, None);
    }

    #[tokio::test]
    async fn test_grouping_and_freshness() {
        let pool = init_memory_pool().unwrap();
        let engine = ReconciliationEngine::new(pool.clone(), &SyncConfig::default()).unwrap();

        engine.reconcile_nodes(plants("s", &["p1", "p2", "p3"])).await.unwrap();
        engine.reconcile_nodes(plants("other", &["x1"])).await.unwrap();
        let mut edges = EdgeSnapshot::new("s", EdgeType::LocatedAt);
        edges.entries.push(EdgeSnapshotEntry {
            source_node_id: "plant:p1".to_string(),
            target_node_id: "plant:p2".to_string(),
            weight: 1.0,
            properties: Default::default(),
            relationship_created_at: ts(),
        });
        engine.reconcile_edges(edges).await.unwrap();
        let last = engine.reconcile_nodes(plants("s", &["p1", "p2"])).await.unwrap();

        let stats = get_statistics(&pool, "s").await.unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(stats.nodes_by_type.get(&NodeType::Plant), Some(&2));
        assert_eq!(stats.edges_by_type.get(&EdgeType::LocatedAt), Some(&1));
        assert_eq!(stats.last_snapshot_at, Some(last.snapshot_at));

        let rendered = serde_json::to_value(&stats).unwrap();
        assert_eq!(rendered["nodes_by_type"]["plant"], json!(2));
    }
}
