//! Graph edge queries.
//!
//! Edges are directed and unique on (source, target, type). Endpoints are not
//! checked against `graph_nodes`; an edge may point at a node that is inactive
//! or has not been synced yet.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{dedupe_last_wins, UpsertOutcome};
use crate::pool::{placeholders, DbError, DbPool, DbResult, LOOKUP_CHUNK};

/// A `graph_edges` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub edge_id: String,
    pub site_id: String,
    pub edge_type: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub weight: f64,
    pub properties_json: String,
    pub relationship_created_at: String,
    pub snapshot_at: String,
    pub version: i64,
    pub is_active: bool,
    pub anomaly_score: Option<f64>,
}

const EDGE_COLUMNS: &str = "edge_id, site_id, edge_type, source_node_id, target_node_id, weight,
     properties_json, relationship_created_at, snapshot_at, version, is_active, anomaly_score";

impl EdgeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            edge_id: row.get(0)?,
            site_id: row.get(1)?,
            edge_type: row.get(2)?,
            source_node_id: row.get(3)?,
            target_node_id: row.get(4)?,
            weight: row.get(5)?,
            properties_json: row.get(6)?,
            relationship_created_at: row.get(7)?,
            snapshot_at: row.get(8)?,
            version: row.get(9)?,
            is_active: row.get(10)?,
            anomaly_score: row.get(11)?,
        })
    }

    /// Producer-controlled content equality (weight compared bitwise).
    pub fn same_content(&self, other: &EdgeRow) -> bool {
        self.site_id == other.site_id
            && self.edge_type == other.edge_type
            && self.source_node_id == other.source_node_id
            && self.target_node_id == other.target_node_id
            && self.weight.to_bits() == other.weight.to_bits()
            && self.properties_json == other.properties_json
            && self.relationship_created_at == other.relationship_created_at
    }
}

/// Which side of an edge a node id must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    fn column(&self) -> &'static str {
        match self {
            Direction::Outgoing => "source_node_id",
            Direction::Incoming => "target_node_id",
        }
    }
}

/// Get an edge by ID, active or not.
pub async fn get_edge(pool: &DbPool, edge_id: &str) -> DbResult<Option<EdgeRow>> {
    let edge_id = edge_id.to_string();
    pool.call(move |conn| {
        conn.query_row(
            &format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE edge_id = ?1"),
            params![edge_id],
            EdgeRow::from_row,
        )
        .optional()
        .map_err(DbError::from)
    })
    .await
}

/// All edges of one (site, type) partition in storage order.
pub async fn list_edges_by_type(
    pool: &DbPool,
    site_id: &str,
    edge_type: &str,
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    let site_id = site_id.to_string();
    let edge_type = edge_type.to_string();
    pool.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges
             WHERE site_id = ?1 AND edge_type = ?2 AND (?3 = 0 OR is_active = 1)
             ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(params![site_id, edge_type, active_only], EdgeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

/// Edges leaving `source_node_id`, optionally of one type.
pub async fn get_outgoing(
    pool: &DbPool,
    source_node_id: &str,
    edge_type: Option<&str>,
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    let types: Vec<String> = edge_type.map(str::to_string).into_iter().collect();
    get_adjacent(pool, vec![source_node_id.to_string()], Direction::Outgoing, types, active_only)
        .await
}

/// Edges arriving at `target_node_id`, optionally of one type.
pub async fn get_incoming(
    pool: &DbPool,
    target_node_id: &str,
    edge_type: Option<&str>,
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    let types: Vec<String> = edge_type.map(str::to_string).into_iter().collect();
    get_adjacent(pool, vec![target_node_id.to_string()], Direction::Incoming, types, active_only)
        .await
}

/// Edges touching any of `node_ids` on the given side, filtered to
/// `edge_types` when non-empty. This is the frontier fetch for traversal.
pub async fn get_adjacent(
    pool: &DbPool,
    node_ids: Vec<String>,
    direction: Direction,
    edge_types: Vec<String>,
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    pool.call(move |conn| fetch_adjacent(conn, &node_ids, direction, &edge_types, active_only))
        .await
}

fn fetch_adjacent(
    conn: &Connection,
    node_ids: &[String],
    direction: Direction,
    edge_types: &[String],
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    let type_clause = if edge_types.is_empty() {
        String::new()
    } else {
        format!(" AND edge_type IN ({})", placeholders(edge_types.len()))
    };
    let active_clause = if active_only { " AND is_active = 1" } else { "" };

    let mut out = Vec::new();
    for chunk in node_ids.chunks(LOOKUP_CHUNK) {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges
             WHERE {} IN ({}){}{}
             ORDER BY rowid",
            direction.column(),
            placeholders(chunk.len()),
            type_clause,
            active_clause
        );
        let mut args: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + edge_types.len());
        args.extend(chunk.iter().map(|id| id as &dyn ToSql));
        args.extend(edge_types.iter().map(|t| t as &dyn ToSql));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), EdgeRow::from_row)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

/// The induced subgraph: edges of `site_id` whose endpoints are both in `node_ids`.
pub async fn get_edges_between(
    pool: &DbPool,
    site_id: &str,
    node_ids: HashSet<String>,
    active_only: bool,
) -> DbResult<Vec<EdgeRow>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let site_id = site_id.to_string();
    pool.call(move |conn| {
        let ids: Vec<String> = node_ids.iter().cloned().collect();
        let outgoing = fetch_adjacent(conn, &ids, Direction::Outgoing, &[], active_only)?;
        Ok(outgoing
            .into_iter()
            .filter(|e| e.site_id == site_id && node_ids.contains(&e.target_node_id))
            .collect())
    })
    .await
}

fn fetch_by_ids(conn: &Connection, edge_ids: &[String]) -> DbResult<HashMap<String, EdgeRow>> {
    let mut found = HashMap::with_capacity(edge_ids.len());
    for chunk in edge_ids.chunks(LOOKUP_CHUNK) {
        let sql = format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges WHERE edge_id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), EdgeRow::from_row)?;
        for row in rows {
            let row = row?;
            found.insert(row.edge_id.clone(), row);
        }
    }
    Ok(found)
}

/// Insert or update a batch of edges in one transaction. Same version rules
/// as [`super::nodes::upsert_nodes`].
pub async fn upsert_edges(pool: &DbPool, rows: Vec<EdgeRow>) -> DbResult<UpsertOutcome> {
    if rows.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    pool.call(move |conn| upsert_edges_blocking(conn, rows)).await
}

fn upsert_edges_blocking(conn: &mut Connection, rows: Vec<EdgeRow>) -> DbResult<UpsertOutcome> {
    let rows = dedupe_last_wins(rows, |r| r.edge_id.clone());
    let ids: Vec<String> = rows.iter().map(|r| r.edge_id.clone()).collect();

    let tx = conn.transaction()?;
    let existing = fetch_by_ids(&tx, &ids)?;
    let mut outcome = UpsertOutcome::default();
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO graph_edges (edge_id, site_id, edge_type, source_node_id, target_node_id,
                 weight, properties_json, relationship_created_at, snapshot_at, version, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, 1)",
        )?;
        let mut overwrite = tx.prepare_cached(
            "UPDATE graph_edges
             SET site_id = ?2, edge_type = ?3, source_node_id = ?4, target_node_id = ?5,
                 weight = ?6, properties_json = ?7, relationship_created_at = ?8,
                 snapshot_at = ?9, version = version + 1, is_active = 1
             WHERE edge_id = ?1",
        )?;
        let mut touch =
            tx.prepare_cached("UPDATE graph_edges SET snapshot_at = ?2 WHERE edge_id = ?1")?;

        for row in &rows {
            match existing.get(&row.edge_id) {
                Some(old) if old.is_active && old.same_content(row) => {
                    touch.execute(params![row.edge_id, row.snapshot_at])?;
                    outcome.unchanged += 1;
                }
                Some(old) => {
                    if old.site_id != row.site_id {
                        warn!(
                            edge_id = %row.edge_id,
                            from_site = %old.site_id,
                            to_site = %row.site_id,
                            "Edge moved to another site"
                        );
                    }
                    overwrite.execute(edge_params(row).as_slice())?;
                    if old.is_active {
                        outcome.updated += 1;
                    } else {
                        outcome.reactivated += 1;
                    }
                }
                None => {
                    insert.execute(edge_params(row).as_slice())?;
                    outcome.inserted += 1;
                }
            }
        }
    }
    tx.commit()?;

    debug!(
        inserted = outcome.inserted,
        updated = outcome.updated,
        reactivated = outcome.reactivated,
        unchanged = outcome.unchanged,
        "Upserted edge batch"
    );
    Ok(outcome)
}

fn edge_params(row: &EdgeRow) -> Vec<&dyn ToSql> {
    vec![
        &row.edge_id as &dyn ToSql,
        &row.site_id as &dyn ToSql,
        &row.edge_type as &dyn ToSql,
        &row.source_node_id as &dyn ToSql,
        &row.target_node_id as &dyn ToSql,
        &row.weight as &dyn ToSql,
        &row.properties_json as &dyn ToSql,
        &row.relationship_created_at as &dyn ToSql,
        &row.snapshot_at as &dyn ToSql,
    ]
}

/// Deactivate every active edge of the (site, type) partition not in `keep`.
pub async fn deactivate_edges_not_in_set(
    pool: &DbPool,
    site_id: &str,
    edge_type: &str,
    keep: HashSet<String>,
    snapshot_at: &str,
) -> DbResult<usize> {
    let site_id = site_id.to_string();
    let edge_type = edge_type.to_string();
    let snapshot_at = snapshot_at.to_string();
    pool.call(move |conn| {
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT edge_id FROM graph_edges
                 WHERE site_id = ?1 AND edge_type = ?2 AND is_active = 1",
            )?;
            let ids = stmt
                .query_map(params![site_id, edge_type], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter(|id| !keep.contains(id)).collect()
        };
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE graph_edges SET is_active = 0, snapshot_at = ?2
                 WHERE edge_id = ?1 AND is_active = 1",
            )?;
            for id in &stale {
                stmt.execute(params![id, snapshot_at])?;
            }
        }
        tx.commit()?;
        Ok(stale.len())
    })
    .await
}

/// Active edges at or above `min_score`, highest score first.
pub async fn get_anomalous_edges(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    edge_type: Option<&str>,
    limit: usize,
) -> DbResult<Vec<EdgeRow>> {
    let site_id = site_id.to_string();
    let edge_type = edge_type.map(str::to_string);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    pool.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {EDGE_COLUMNS} FROM graph_edges
             WHERE site_id = ?1 AND is_active = 1
               AND anomaly_score IS NOT NULL AND anomaly_score >= ?2
               AND (?3 IS NULL OR edge_type = ?3)
             ORDER BY anomaly_score DESC, rowid ASC
             LIMIT ?4"
        ))?;
        let rows = stmt
            .query_map(params![site_id, min_score, edge_type, limit], EdgeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

/// Write an edge anomaly score in place.
pub async fn set_edge_anomaly(pool: &DbPool, edge_id: &str, score: Option<f64>) -> DbResult<()> {
    let edge_id = edge_id.to_string();
    pool.call(move |conn| {
        let changed = conn.execute(
            "UPDATE graph_edges SET anomaly_score = ?2 WHERE edge_id = ?1",
            params![edge_id, score],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("Edge not found: {}", edge_id)));
        }
        Ok(())
    })
    .await
}
