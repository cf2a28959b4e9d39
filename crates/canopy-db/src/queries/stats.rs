//! Aggregate counts for sync-pipeline health.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::pool::{DbPool, DbResult};

/// Raw statistics for one site. Counts cover active rows only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteStatsRow {
    pub nodes_by_type: Vec<(String, i64)>,
    pub edges_by_type: Vec<(String, i64)>,
    /// Most recent `snapshot_at` over every node of the site, active or not.
    pub last_snapshot_at: Option<String>,
}

impl SiteStatsRow {
    pub fn total_nodes(&self) -> i64 {
        self.nodes_by_type.iter().map(|(_, n)| n).sum()
    }

    pub fn total_edges(&self) -> i64 {
        self.edges_by_type.iter().map(|(_, n)| n).sum()
    }
}

pub async fn get_site_stats(pool: &DbPool, site_id: &str) -> DbResult<SiteStatsRow> {
    let site_id = site_id.to_string();
    pool.call(move |conn| {
        Ok(SiteStatsRow {
            nodes_by_type: grouped_counts(
                conn,
                "SELECT node_type, COUNT(*) FROM graph_nodes
                 WHERE site_id = ?1 AND is_active = 1
                 GROUP BY node_type ORDER BY node_type",
                &site_id,
            )?,
            edges_by_type: grouped_counts(
                conn,
                "SELECT edge_type, COUNT(*) FROM graph_edges
                 WHERE site_id = ?1 AND is_active = 1
                 GROUP BY edge_type ORDER BY edge_type",
                &site_id,
            )?,
            last_snapshot_at: conn.query_row(
                "SELECT MAX(snapshot_at) FROM graph_nodes WHERE site_id = ?1",
                params![site_id],
                |row| row.get(0),
            )?,
        })
    })
    .await
}

/// Total `(node, edge)` rows across every site, active or not.
pub async fn count_rows(pool: &DbPool) -> DbResult<(i64, i64)> {
    pool.call(|conn| {
        let nodes = conn.query_row("SELECT COUNT(*) FROM graph_nodes", [], |r| r.get(0))?;
        let edges = conn.query_row("SELECT COUNT(*) FROM graph_edges", [], |r| r.get(0))?;
        Ok((nodes, edges))
    })
    .await
}

fn grouped_counts(conn: &Connection, sql: &str, site_id: &str) -> DbResult<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![site_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
