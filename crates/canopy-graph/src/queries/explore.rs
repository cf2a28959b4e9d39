//! Graph neighborhood exploration.
//!
//! Breadth-first expansion from a center node. Edges are walked in both
//! directions. The walk is bounded by a hop count, a visited-node cap and a
//! deadline; hitting any of them is an error, never a truncated result.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use canopy_core::{edge, node, CanopyError, CanopyResult, EdgeType, GraphEdge, GraphNode, TraversalLimit};
use canopy_db::DbPool;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GraphConfig;

/// Result of a neighborhood exploration.
#[derive(Debug, Clone, Serialize)]
pub struct Neighborhood {
    /// Center first, then the rest ordered by node id.
    pub nodes: Vec<GraphNode>,
    /// Distinct edges ordered by edge id.
    pub edges: Vec<GraphEdge>,
    /// Expansion rounds that found at least one edge.
    pub hops_walked: u32,
}

impl Neighborhood {
    pub fn center(&self) -> Option<&GraphNode> {
        self.nodes.first()
    }
}

/// Bounded BFS over the edge relation.
#[derive(Clone)]
pub struct TraversalEngine {
    pool: DbPool,
    config: GraphConfig,
}

impl TraversalEngine {
    pub fn new(pool: DbPool, config: GraphConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Nodes within `hops` of `center_node_id` and the edges that reached them.
    ///
    /// `edge_types` restricts which edges are walked; empty means all. The
    /// center must exist. Every visited node is returned whether active or
    /// not, so the result stays connected; ids that resolve to nothing are
    /// left out. Dropping the returned future abandons the walk.
    pub async fn get_neighborhood(
        &self,
        center_node_id: &str,
        hops: u32,
        edge_types: &[EdgeType],
    ) -> CanopyResult<Neighborhood> {
        if hops > self.config.max_hops {
            warn!(center = center_node_id, hops, max = self.config.max_hops, "Traversal hop budget exceeded");
            return Err(CanopyError::TraversalBudgetExceeded {
                kind: TraversalLimit::Hops,
                limit: self.config.max_hops as usize,
            });
        }
        let deadline = Duration::from_millis(self.config.timeout_ms);
        with_deadline(deadline, self.walk(center_node_id, hops, edge_types)).await
    }

    async fn walk(
        &self,
        center_node_id: &str,
        hops: u32,
        edge_types: &[EdgeType],
    ) -> CanopyResult<Neighborhood> {
        let center = node::get_node(&self.pool, center_node_id)
            .await?
            .ok_or_else(|| CanopyError::NodeNotFound(center_node_id.to_string()))?;

        let max_visited = self.config.max_visited_nodes;
        let mut visited: HashSet<String> = HashSet::from([center.node_id.clone()]);
        let mut frontier: Vec<String> = vec![center.node_id.clone()];
        let mut edges: BTreeMap<String, GraphEdge> = BTreeMap::new();
        let mut hops_walked = 0;

        for hop in 0..hops {
            let found = edge::get_frontier_edges(&self.pool, frontier, edge_types).await?;
            if !found.is_empty() {
                hops_walked = hop + 1;
            }

            let mut next = Vec::new();
            for e in found {
                for endpoint in [&e.source_node_id, &e.target_node_id] {
                    if visited.insert(endpoint.clone()) {
                        if visited.len() > max_visited {
                            warn!(center = center_node_id, hop, max = max_visited, "Traversal visited-node budget exceeded");
                            return Err(CanopyError::TraversalBudgetExceeded {
                                kind: TraversalLimit::VisitedNodes,
                                limit: max_visited,
                            });
                        }
                        next.push(endpoint.clone());
                    }
                }
                edges.entry(e.edge_id.clone()).or_insert(e);
            }

            debug!(center = center_node_id, hop, discovered = next.len(), edges = edges.len(), "Expanded frontier");
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        visited.remove(&center.node_id);
        let mut rest = node::get_nodes_by_ids(&self.pool, visited.into_iter().collect(), false).await?;
        rest.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut nodes = Vec::with_capacity(rest.len() + 1);
        nodes.push(center);
        nodes.extend(rest);

        Ok(Neighborhood {
            nodes,
            edges: edges.into_values().collect(),
            hops_walked,
        })
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> CanopyResult<T>
where
    F: Future<Output = CanopyResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = deadline.as_millis() as u64, "Traversal deadline elapsed");
            Err(CanopyError::Cancelled(format!(
                "traversal did not finish within {} ms",
                deadline.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::node::properties::{NodeProperties, UserProperties};
    use canopy_db::init_memory_pool;
    use canopy_core::NodeType;
    use chrono::{TimeZone, Utc};

    fn user(id: &str) -> GraphNode {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        GraphNode::new(
            "s",
            id,
            id.to_uppercase(),
            NodeProperties::User(UserProperties {
                display_name: id.to_string(),
                role: None,
            }),
            ts,
            ts,
        )
    }

    fn link(edge_type: EdgeType, from: &str, to: &str) -> GraphEdge {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        GraphEdge::new("s", edge_type, format!("user:{}", from), format!("user:{}", to), ts)
    }

    async fn diamond() -> DbPool {
        let pool = init_memory_pool().unwrap();
        node::upsert_nodes(&pool, &[user("a"), user("b"), user("c"), user("d")])
            .await
            .unwrap();
        edge::upsert_edges(
            &pool,
            &[
                link(EdgeType::DependsOn, "a", "b"),
                link(EdgeType::DependsOn, "a", "c"),
                link(EdgeType::LineageOf, "b", "d"),
                link(EdgeType::DependsOn, "c", "d"),
            ],
        )
        .await
        .unwrap();
        pool
    }

    fn engine(pool: &DbPool) -> TraversalEngine {
        TraversalEngine::new(pool.clone(), GraphConfig::default())
    }

    fn ids(n: &Neighborhood) -> Vec<&str> {
        n.nodes.iter().map(|n| n.node_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_zero_hops_is_center_only() {
        let pool = diamond().await;
        let n = engine(&pool).get_neighborhood("user:a", 0, &[]).await.unwrap();
        assert_eq!(ids(&n), vec!["user:a"]);
        assert!(n.edges.is_empty());
        assert_eq!(n.hops_walked, 0);
    }

    #[tokio::test]
    async fn test_diamond_dedup() {
        let pool = diamond().await;
        let n = engine(&pool).get_neighborhood("user:a", 2, &[]).await.unwrap();
        assert_eq!(ids(&n), vec!["user:a", "user:b", "user:c", "user:d"]);
        assert_eq!(n.edges.len(), 4);
        let distinct: HashSet<&str> = n.edges.iter().map(|e| e.edge_id.as_str()).collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(n.hops_walked, 2);
    }

    #[tokio::test]
    async fn test_walks_incoming_edges() {
        let pool = diamond().await;
        let n = engine(&pool).get_neighborhood("user:d", 1, &[]).await.unwrap();
        assert_eq!(ids(&n), vec!["user:d", "user:b", "user:c"]);
        assert_eq!(n.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_stops_early_past_graph_edge() {
        let pool = diamond().await;
        let n = engine(&pool).get_neighborhood("user:a", 5, &[]).await.unwrap();
        assert_eq!(n.nodes.len(), 4);
        assert_eq!(n.hops_walked, 2);
    }

    #[tokio::test]
    async fn test_edge_type_filter() {
        let pool = diamond().await;
        let n = engine(&pool)
            .get_neighborhood("user:a", 3, &[EdgeType::DependsOn])
            .await
            .unwrap();
        assert_eq!(ids(&n), vec!["user:a", "user:b", "user:c", "user:d"]);
        assert_eq!(n.edges.len(), 3);
        assert!(n.edges.iter().all(|e| e.edge_type == EdgeType::DependsOn));
    }

    #[tokio::test]
    async fn test_missing_center() {
        let pool = diamond().await;
        let err = engine(&pool).get_neighborhood("user:zz", 1, &[]).await.unwrap_err();
        assert!(matches!(err, CanopyError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_dangling_endpoint_omitted() {
        let pool = diamond().await;
        edge::upsert_edges(&pool, &[link(EdgeType::AssignedTo, "a", "ghost")])
            .await
            .unwrap();
        let n = engine(&pool).get_neighborhood("user:a", 1, &[]).await.unwrap();
        assert_eq!(ids(&n), vec!["user:a", "user:b", "user:c"]);
        assert_eq!(n.edges.len(), 3);
    }

    #[tokio::test]
    async fn test_inactive_node_kept_on_path() {
        let pool = init_memory_pool().unwrap();
        node::upsert_nodes(&pool, &[user("a"), user("b"), user("c")]).await.unwrap();
        edge::upsert_edges(
            &pool,
            &[link(EdgeType::DependsOn, "a", "b"), link(EdgeType::DependsOn, "b", "c")],
        )
        .await
        .unwrap();
        let keep: HashSet<String> = ["user:a", "user:c"].iter().map(|s| s.to_string()).collect();
        node::deactivate_nodes_not_in_set(&pool, "s", NodeType::User, keep, Utc::now())
            .await
            .unwrap();

        let n = engine(&pool).get_neighborhood("user:a", 2, &[]).await.unwrap();
        assert_eq!(ids(&n), vec!["user:a", "user:b", "user:c"]);
        assert!(!n.nodes[1].is_active);
        assert_eq!(n.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_budgets() {
        let pool = diamond().await;
        let tight = TraversalEngine::new(
            pool.clone(),
            GraphConfig {
                max_hops: 1,
                max_visited_nodes: 3,
                timeout_ms: 10_000,
            },
        );

        let err = tight.get_neighborhood("user:a", 2, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            CanopyError::TraversalBudgetExceeded { kind: TraversalLimit::Hops, limit: 1 }
        ));

        // a, b, c fit exactly.
        assert_eq!(tight.get_neighborhood("user:a", 1, &[]).await.unwrap().nodes.len(), 3);

        let tighter = TraversalEngine::new(
            pool,
            GraphConfig {
                max_hops: 6,
                max_visited_nodes: 3,
                timeout_ms: 10_000,
            },
        );
        let err = tighter.get_neighborhood("user:a", 2, &[]).await.unwrap_err();
        assert!(err.is_budget_exceeded());
    }

    #[tokio::test]
    async fn test_walk_past_deadline_is_cancelled() {
        let pool = diamond().await;
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let busy = pool.clone();
        let holder = std::thread::spawn(move || {
            busy.with_conn(|_| {
                let _ = held_tx.send(());
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
        });
        held_rx.recv().unwrap();

        let hasty = TraversalEngine::new(
            pool.clone(),
            GraphConfig {
                max_hops: 6,
                max_visited_nodes: 5000,
                timeout_ms: 0,
            },
        );
        let err = hasty.get_neighborhood("user:a", 2, &[]).await.unwrap_err();
        assert!(matches!(err, CanopyError::Cancelled(_)));

        holder.join().unwrap().unwrap();
        assert_eq!(engine(&pool).get_neighborhood("user:a", 2, &[]).await.unwrap().nodes.len(), 4);
    }

    #[tokio::test]
    async fn test_deadline_maps_to_cancelled() {
        let slow = std::future::pending::<CanopyResult<()>>();
        let err = with_deadline(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, CanopyError::Cancelled(_)));
    }
}
