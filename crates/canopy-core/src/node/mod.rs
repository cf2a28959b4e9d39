//! Node store: typed access to `graph_nodes`.

pub mod model;
pub mod properties;

use std::collections::HashSet;

use canopy_db::queries::nodes as queries;
use canopy_db::queries::UpsertOutcome;
use canopy_db::timestamp::format_timestamp;
use canopy_db::{DbError, DbPool};
use chrono::{DateTime, Utc};

use crate::error::{CanopyError, CanopyResult};
use model::{GraphNode, NodeType};

fn from_rows(rows: Vec<queries::NodeRow>) -> CanopyResult<Vec<GraphNode>> {
    rows.into_iter().map(GraphNode::from_row).collect()
}

/// Get a node by ID, active or not.
pub async fn get_node(pool: &DbPool, node_id: &str) -> CanopyResult<Option<GraphNode>> {
    queries::get_node(pool, node_id)
        .await?
        .map(GraphNode::from_row)
        .transpose()
}

/// All nodes of a (site, type) partition.
pub async fn get_nodes_by_type(
    pool: &DbPool,
    site_id: &str,
    node_type: NodeType,
    active_only: bool,
) -> CanopyResult<Vec<GraphNode>> {
    from_rows(queries::list_nodes_by_type(pool, site_id, node_type.as_str(), active_only).await?)
}

/// Batched point lookup by source entity id.
pub async fn get_nodes_by_source_ids(
    pool: &DbPool,
    site_id: &str,
    node_type: NodeType,
    source_ids: &[String],
) -> CanopyResult<Vec<GraphNode>> {
    from_rows(
        queries::get_nodes_by_source_ids(pool, site_id, node_type.as_str(), source_ids.to_vec())
            .await?,
    )
}

/// Batched lookup by node id; missing ids are omitted.
pub async fn get_nodes_by_ids(
    pool: &DbPool,
    node_ids: Vec<String>,
    active_only: bool,
) -> CanopyResult<Vec<GraphNode>> {
    from_rows(queries::get_nodes_by_ids(pool, node_ids, active_only).await?)
}

/// Upsert a batch in one transaction. Safe to call with an empty slice.
pub async fn upsert_nodes(pool: &DbPool, nodes: &[GraphNode]) -> CanopyResult<UpsertOutcome> {
    let rows = nodes
        .iter()
        .map(GraphNode::to_row)
        .collect::<CanopyResult<Vec<_>>>()?;
    Ok(queries::upsert_nodes(pool, rows).await?)
}

/// Soft-delete every active node of the partition not in `active_node_ids`.
pub async fn deactivate_nodes_not_in_set(
    pool: &DbPool,
    site_id: &str,
    node_type: NodeType,
    active_node_ids: HashSet<String>,
    snapshot_at: DateTime<Utc>,
) -> CanopyResult<usize> {
    Ok(queries::deactivate_nodes_not_in_set(
        pool,
        site_id,
        node_type.as_str(),
        active_node_ids,
        &format_timestamp(&snapshot_at),
    )
    .await?)
}

/// Active nodes scoring at least `min_score`, highest first.
pub async fn get_anomalous_nodes(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    node_type: Option<NodeType>,
    limit: usize,
) -> CanopyResult<Vec<GraphNode>> {
    if !min_score.is_finite() {
        return Err(CanopyError::validation("min_score must be a finite number"));
    }
    from_rows(
        queries::get_anomalous_nodes(pool, site_id, min_score, node_type.map(|t| t.as_str()), limit)
            .await?,
    )
}

/// Scorer write-back. Narrow update: version, activity and snapshot time are untouched.
pub async fn set_node_anomaly(
    pool: &DbPool,
    node_id: &str,
    score: f64,
    explanation: Option<serde_json::Value>,
) -> CanopyResult<()> {
    validate_score(score)?;
    let explanation = match explanation {
        Some(v) => Some(serde_json::to_string(&v)?),
        None => None,
    };
    match queries::set_node_anomaly(pool, node_id, Some(score), explanation).await {
        Err(DbError::NotFound(_)) => Err(CanopyError::NodeNotFound(node_id.to_string())),
        other => Ok(other?),
    }
}

/// Remove a node's anomaly score and explanation.
pub async fn clear_node_anomaly(pool: &DbPool, node_id: &str) -> CanopyResult<()> {
    match queries::set_node_anomaly(pool, node_id, None, None).await {
        Err(DbError::NotFound(_)) => Err(CanopyError::NodeNotFound(node_id.to_string())),
        other => Ok(other?),
    }
}

/// Anomaly scores live in `0.0..=1.0`.
pub(crate) fn validate_score(score: f64) -> CanopyResult<()> {
    if !(0.0..=1.0).contains(&score) {
        return Err(CanopyError::validation(format!(
            "anomaly score {} is outside 0..=1",
            score
        )));
    }
    Ok(())
}
