//! Anomaly ranking and scorer write-back.

use canopy_core::{edge, node, CanopyError, CanopyResult, EdgeType, GraphEdge, GraphNode, NodeType};
use canopy_db::{BroadcastSender, DbPool, GraphEvent};
use tracing::debug;

fn check_limit(limit: usize) -> CanopyResult<()> {
    if limit == 0 {
        return Err(CanopyError::validation("limit must be at least 1"));
    }
    Ok(())
}

/// Active nodes scoring at least `min_score`, highest first. Ties keep
/// storage order.
pub async fn get_anomalous_nodes(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    node_type: Option<NodeType>,
    limit: usize,
) -> CanopyResult<Vec<GraphNode>> {
    check_limit(limit)?;
    node::get_anomalous_nodes(pool, site_id, min_score, node_type, limit).await
}

pub async fn get_anomalous_edges(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    edge_type: Option<EdgeType>,
    limit: usize,
) -> CanopyResult<Vec<GraphEdge>> {
    check_limit(limit)?;
    edge::get_anomalous_edges(pool, site_id, min_score, edge_type, limit).await
}

/// Store a scorer result on a node and announce it.
pub async fn record_node_score(
    pool: &DbPool,
    events: Option<&BroadcastSender>,
    node_id: &str,
    score: f64,
    explanation: Option<serde_json::Value>,
) -> CanopyResult<()> {
    node::set_node_anomaly(pool, node_id, score, explanation).await?;
    debug!(node_id, score, "Recorded node anomaly score");
    publish(events, node_id, score);
    Ok(())
}

pub async fn record_edge_score(
    pool: &DbPool,
    events: Option<&BroadcastSender>,
    edge_id: &str,
    score: f64,
) -> CanopyResult<()> {
    edge::set_edge_anomaly(pool, edge_id, Some(score)).await?;
    debug!(edge_id, score, "Recorded edge anomaly score");
    publish(events, edge_id, score);
    Ok(())
}

fn publish(events: Option<&BroadcastSender>, id: &str, score: f64) {
    if let Some(events) = events {
        let _ = events.send(GraphEvent::AnomalyScored {
            id: id.to_string(),
            score,
        });
    }
}
