//! Edge store: typed access to `graph_edges`.

pub mod model;

use std::collections::HashSet;

use canopy_db::queries::edges::{self as queries, Direction};
use canopy_db::queries::UpsertOutcome;
use canopy_db::timestamp::format_timestamp;
use canopy_db::{DbError, DbPool};
use chrono::{DateTime, Utc};

use crate::error::{CanopyError, CanopyResult};
use crate::node::validate_score;
use model::{EdgeType, GraphEdge};

fn from_rows(rows: Vec<queries::EdgeRow>) -> CanopyResult<Vec<GraphEdge>> {
    rows.into_iter().map(GraphEdge::from_row).collect()
}

fn type_names(edge_types: &[EdgeType]) -> Vec<String> {
    edge_types.iter().map(|t| t.as_str().to_string()).collect()
}

pub async fn get_edge(pool: &DbPool, edge_id: &str) -> CanopyResult<Option<GraphEdge>> {
    queries::get_edge(pool, edge_id)
        .await?
        .map(GraphEdge::from_row)
        .transpose()
}

pub async fn get_edges_by_type(
    pool: &DbPool,
    site_id: &str,
    edge_type: EdgeType,
    active_only: bool,
) -> CanopyResult<Vec<GraphEdge>> {
    from_rows(queries::list_edges_by_type(pool, site_id, edge_type.as_str(), active_only).await?)
}

pub async fn get_outgoing(
    pool: &DbPool,
    source_node_id: &str,
    edge_type: Option<EdgeType>,
    active_only: bool,
) -> CanopyResult<Vec<GraphEdge>> {
    from_rows(
        queries::get_outgoing(pool, source_node_id, edge_type.map(|t| t.as_str()), active_only)
            .await?,
    )
}

pub async fn get_incoming(
    pool: &DbPool,
    target_node_id: &str,
    edge_type: Option<EdgeType>,
    active_only: bool,
) -> CanopyResult<Vec<GraphEdge>> {
    from_rows(
        queries::get_incoming(pool, target_node_id, edge_type.map(|t| t.as_str()), active_only)
            .await?,
    )
}

/// Active edges leaving or entering any node of `frontier`, filtered to
/// `edge_types` when non-empty. An edge with both endpoints in the frontier
/// appears twice; callers dedupe by id.
pub async fn get_frontier_edges(
    pool: &DbPool,
    frontier: Vec<String>,
    edge_types: &[EdgeType],
) -> CanopyResult<Vec<GraphEdge>> {
    let types = type_names(edge_types);
    let mut rows =
        queries::get_adjacent(pool, frontier.clone(), Direction::Outgoing, types.clone(), true)
            .await?;
    rows.extend(queries::get_adjacent(pool, frontier, Direction::Incoming, types, true).await?);
    from_rows(rows)
}

/// Edges whose endpoints both lie in `node_ids`.
pub async fn get_edges_between(
    pool: &DbPool,
    site_id: &str,
    node_ids: HashSet<String>,
    active_only: bool,
) -> CanopyResult<Vec<GraphEdge>> {
    from_rows(queries::get_edges_between(pool, site_id, node_ids, active_only).await?)
}

pub async fn upsert_edges(pool: &DbPool, edges: &[GraphEdge]) -> CanopyResult<UpsertOutcome> {
    let rows = edges
        .iter()
        .map(GraphEdge::to_row)
        .collect::<CanopyResult<Vec<_>>>()?;
    Ok(queries::upsert_edges(pool, rows).await?)
}

pub async fn deactivate_edges_not_in_set(
    pool: &DbPool,
    site_id: &str,
    edge_type: EdgeType,
    active_edge_ids: HashSet<String>,
    snapshot_at: DateTime<Utc>,
) -> CanopyResult<usize> {
    Ok(queries::deactivate_edges_not_in_set(
        pool,
        site_id,
        edge_type.as_str(),
        active_edge_ids,
        &format_timestamp(&snapshot_at),
    )
    .await?)
}

pub async fn get_anomalous_edges(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    edge_type: Option<EdgeType>,
    limit: usize,
) -> CanopyResult<Vec<GraphEdge>> {
    if !min_score.is_finite() {
        return Err(CanopyError::validation("min_score must be a finite number"));
    }
    from_rows(
        queries::get_anomalous_edges(pool, site_id, min_score, edge_type.map(|t| t.as_str()), limit)
            .await?,
    )
}

/// Scorer write-back for an edge.
pub async fn set_edge_anomaly(pool: &DbPool, edge_id: &str, score: Option<f64>) -> CanopyResult<()> {
    if let Some(score) = score {
        validate_score(score)?;
    }
    match queries::set_edge_anomaly(pool, edge_id, score).await {
        Err(DbError::NotFound(_)) => Err(CanopyError::EdgeNotFound(edge_id.to_string())),
        other => Ok(other?),
    }
}
