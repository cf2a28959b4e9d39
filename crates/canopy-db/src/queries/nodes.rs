//! Graph node queries.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{dedupe_last_wins, UpsertOutcome};
use crate::pool::{placeholders, DbError, DbPool, DbResult, LOOKUP_CHUNK};

/// A `graph_nodes` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub node_id: String,
    pub site_id: String,
    pub node_type: String,
    pub source_entity_id: String,
    pub label: String,
    pub feature_vector: Option<Vec<f32>>,
    pub properties_json: String,
    pub source_created_at: String,
    pub source_updated_at: String,
    pub snapshot_at: String,
    pub version: i64,
    pub is_active: bool,
    pub anomaly_score: Option<f64>,
    pub anomaly_explanation: Option<String>,
}

const NODE_COLUMNS: &str = "node_id, site_id, node_type, source_entity_id, label, feature_vector,
     properties_json, source_created_at, source_updated_at, snapshot_at, version, is_active,
     anomaly_score, anomaly_explanation";

impl NodeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let features: Option<Vec<u8>> = row.get(5)?;
        Ok(Self {
            node_id: row.get(0)?,
            site_id: row.get(1)?,
            node_type: row.get(2)?,
            source_entity_id: row.get(3)?,
            label: row.get(4)?,
            feature_vector: features.as_deref().map(decode_features),
            properties_json: row.get(6)?,
            source_created_at: row.get(7)?,
            source_updated_at: row.get(8)?,
            snapshot_at: row.get(9)?,
            version: row.get(10)?,
            is_active: row.get(11)?,
            anomaly_score: row.get(12)?,
            anomaly_explanation: row.get(13)?,
        })
    }

    /// Compare everything a producer controls. Bookkeeping (`snapshot_at`,
    /// `version`, `is_active`) and scorer-owned anomaly fields are ignored.
    /// Features compare bitwise so `-0.0`/`0.0` and NaN payloads count as changes.
    pub fn same_content(&self, other: &NodeRow) -> bool {
        self.site_id == other.site_id
            && self.node_type == other.node_type
            && self.source_entity_id == other.source_entity_id
            && self.label == other.label
            && self.properties_json == other.properties_json
            && self.source_created_at == other.source_created_at
            && self.source_updated_at == other.source_updated_at
            && self.feature_vector.as_deref().map(encode_features)
                == other.feature_vector.as_deref().map(encode_features)
    }
}

/// Little-endian f32 encoding used for the `feature_vector` BLOB.
pub fn encode_features(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_features(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Get a node by ID, active or not.
pub async fn get_node(pool: &DbPool, node_id: &str) -> DbResult<Option<NodeRow>> {
    let node_id = node_id.to_string();
    pool.call(move |conn| {
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE node_id = ?1"),
            params![node_id],
            NodeRow::from_row,
        )
        .optional()
        .map_err(DbError::from)
    })
    .await
}

/// All nodes of one (site, type) partition in storage order.
pub async fn list_nodes_by_type(
    pool: &DbPool,
    site_id: &str,
    node_type: &str,
    active_only: bool,
) -> DbResult<Vec<NodeRow>> {
    let site_id = site_id.to_string();
    let node_type = node_type.to_string();
    pool.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes
             WHERE site_id = ?1 AND node_type = ?2 AND (?3 = 0 OR is_active = 1)
             ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(params![site_id, node_type, active_only], NodeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

/// Batched lookup by source entity id within one partition.
pub async fn get_nodes_by_source_ids(
    pool: &DbPool,
    site_id: &str,
    node_type: &str,
    source_ids: Vec<String>,
) -> DbResult<Vec<NodeRow>> {
    if source_ids.is_empty() {
        return Ok(Vec::new());
    }
    let site_id = site_id.to_string();
    let node_type = node_type.to_string();
    pool.call(move |conn| {
        let mut out = Vec::with_capacity(source_ids.len());
        for chunk in source_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {NODE_COLUMNS} FROM graph_nodes
                 WHERE site_id = ? AND node_type = ? AND source_entity_id IN ({})
                 ORDER BY rowid",
                placeholders(chunk.len())
            );
            let mut args: Vec<&dyn ToSql> = vec![&site_id as &dyn ToSql, &node_type as &dyn ToSql];
            args.extend(chunk.iter().map(|id| id as &dyn ToSql));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(args.as_slice(), NodeRow::from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    })
    .await
}

/// Batched lookup by node id. Missing ids are skipped.
pub async fn get_nodes_by_ids(
    pool: &DbPool,
    node_ids: Vec<String>,
    active_only: bool,
) -> DbResult<Vec<NodeRow>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    pool.call(move |conn| {
        let found = fetch_by_ids(conn, &node_ids)?;
        Ok(node_ids
            .iter()
            .filter_map(|id| found.get(id))
            .filter(|row| !active_only || row.is_active)
            .cloned()
            .collect())
    })
    .await
}

fn fetch_by_ids(conn: &Connection, node_ids: &[String]) -> DbResult<HashMap<String, NodeRow>> {
    let mut found = HashMap::with_capacity(node_ids.len());
    for chunk in node_ids.chunks(LOOKUP_CHUNK) {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE node_id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), NodeRow::from_row)?;
        for row in rows {
            let row = row?;
            found.insert(row.node_id.clone(), row);
        }
    }
    Ok(found)
}

/// Insert or update a batch of nodes in one transaction.
///
/// Input `version`, `is_active` and anomaly fields are ignored: new rows start
/// at version 1, changed or reactivated rows get `version + 1`, rows with
/// identical content only have `snapshot_at` refreshed. Anomaly fields are
/// never touched here.
pub async fn upsert_nodes(pool: &DbPool, rows: Vec<NodeRow>) -> DbResult<UpsertOutcome> {
    if rows.is_empty() {
        return Ok(UpsertOutcome::default());
    }
    pool.call(move |conn| upsert_nodes_blocking(conn, rows)).await
}

fn upsert_nodes_blocking(conn: &mut Connection, rows: Vec<NodeRow>) -> DbResult<UpsertOutcome> {
    let rows = dedupe_last_wins(rows, |r| r.node_id.clone());
    let ids: Vec<String> = rows.iter().map(|r| r.node_id.clone()).collect();

    let tx = conn.transaction()?;
    let existing = fetch_by_ids(&tx, &ids)?;
    let mut outcome = UpsertOutcome::default();
    {
        let mut insert = tx.prepare_cached(
            "INSERT INTO graph_nodes (node_id, site_id, node_type, source_entity_id, label,
                 feature_vector, properties_json, source_created_at, source_updated_at,
                 snapshot_at, version, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, 1)",
        )?;
        let mut overwrite = tx.prepare_cached(
            "UPDATE graph_nodes
             SET site_id = ?2, node_type = ?3, source_entity_id = ?4, label = ?5,
                 feature_vector = ?6, properties_json = ?7, source_created_at = ?8,
                 source_updated_at = ?9, snapshot_at = ?10,
                 version = version + 1, is_active = 1
             WHERE node_id = ?1",
        )?;
        let mut touch =
            tx.prepare_cached("UPDATE graph_nodes SET snapshot_at = ?2 WHERE node_id = ?1")?;

        for row in &rows {
            match existing.get(&row.node_id) {
                Some(old) if old.is_active && old.same_content(row) => {
                    touch.execute(params![row.node_id, row.snapshot_at])?;
                    outcome.unchanged += 1;
                }
                Some(old) => {
                    if old.site_id != row.site_id {
                        warn!(
                            node_id = %row.node_id,
                            from_site = %old.site_id,
                            to_site = %row.site_id,
                            "Node moved to another site"
                        );
                    }
                    overwrite.execute(params![
                        row.node_id,
                        row.site_id,
                        row.node_type,
                        row.source_entity_id,
                        row.label,
                        row.feature_vector.as_deref().map(encode_features),
                        row.properties_json,
                        row.source_created_at,
                        row.source_updated_at,
                        row.snapshot_at,
                    ])?;
                    if old.is_active {
                        outcome.updated += 1;
                    } else {
                        outcome.reactivated += 1;
                    }
                }
                None => {
                    insert.execute(params![
                        row.node_id,
                        row.site_id,
                        row.node_type,
                        row.source_entity_id,
                        row.label,
                        row.feature_vector.as_deref().map(encode_features),
                        row.properties_json,
                        row.source_created_at,
                        row.source_updated_at,
                        row.snapshot_at,
                    ])?;
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
        "Upserted node batch"
    );
    Ok(outcome)
}

/// Deactivate every active node of the (site, type) partition whose id is not
/// in `keep`. Returns the number of rows deactivated. `version` is unchanged.
pub async fn deactivate_nodes_not_in_set(
    pool: &DbPool,
    site_id: &str,
    node_type: &str,
    keep: HashSet<String>,
    snapshot_at: &str,
) -> DbResult<usize> {
    let site_id = site_id.to_string();
    let node_type = node_type.to_string();
    let snapshot_at = snapshot_at.to_string();
    pool.call(move |conn| {
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT node_id FROM graph_nodes
                 WHERE site_id = ?1 AND node_type = ?2 AND is_active = 1",
            )?;
            let ids = stmt
                .query_map(params![site_id, node_type], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter().filter(|id| !keep.contains(id)).collect()
        };
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE graph_nodes SET is_active = 0, snapshot_at = ?2
                 WHERE node_id = ?1 AND is_active = 1",
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

/// Active nodes at or above `min_score`, highest score first, ties in storage order.
pub async fn get_anomalous_nodes(
    pool: &DbPool,
    site_id: &str,
    min_score: f64,
    node_type: Option<&str>,
    limit: usize,
) -> DbResult<Vec<NodeRow>> {
    let site_id = site_id.to_string();
    let node_type = node_type.map(str::to_string);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    pool.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes
             WHERE site_id = ?1 AND is_active = 1
               AND anomaly_score IS NOT NULL AND anomaly_score >= ?2
               AND (?3 IS NULL OR node_type = ?3)
             ORDER BY anomaly_score DESC, rowid ASC
             LIMIT ?4"
        ))?;
        let rows = stmt
            .query_map(params![site_id, min_score, node_type, limit], NodeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

/// Write an anomaly score in place. Does not touch version, activity or snapshot time.
pub async fn set_node_anomaly(
    pool: &DbPool,
    node_id: &str,
    score: Option<f64>,
    explanation: Option<String>,
) -> DbResult<()> {
    let node_id = node_id.to_string();
    pool.call(move |conn| {
        let changed = conn.execute(
            "UPDATE graph_nodes SET anomaly_score = ?2, anomaly_explanation = ?3
             WHERE node_id = ?1",
            params![node_id, score, explanation],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("Node not found: {}", node_id)));
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::init_memory_pool;

    pub(crate) fn node(site: &str, node_type: &str, source: &str, label: &str) -> NodeRow {
        NodeRow {
            node_id: format!("{}:{}", node_type, source),
            site_id: site.to_string(),
            node_type: node_type.to_string(),
            source_entity_id: source.to_string(),
            label: label.to_string(),
            feature_vector: Some(vec![0.25, 1.5]),
            properties_json: r#"{"status":"active"}"#.to_string(),
            source_created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            source_updated_at: "2026-01-02T00:00:00.000000Z".to_string(),
            snapshot_at: "2026-02-01T00:00:00.000000Z".to_string(),
            version: 0,
            is_active: false,
            anomaly_score: None,
            anomaly_explanation: None,
        }
    }

    fn keep(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_insert_starts_at_version_one() {
        let pool = init_memory_pool().unwrap();
        let row = node("s1", "package", "p1", "Package 1");
        let outcome = upsert_nodes(&pool, vec![row.clone()]).await.unwrap();
        assert_eq!(outcome.inserted, 1);

        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.is_active);
        assert!(stored.same_content(&row));
        assert_eq!(stored.feature_vector, Some(vec![0.25, 1.5]));
    }

    #[tokio::test]
    async fn test_identical_upsert_keeps_version() {
        let pool = init_memory_pool().unwrap();
        let row = node("s1", "package", "p1", "Package 1");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();

        let mut again = row.clone();
        again.snapshot_at = "2026-03-01T00:00:00.000000Z".to_string();
        let outcome = upsert_nodes(&pool, vec![again]).await.unwrap();
        assert_eq!(outcome.unchanged, 1);

        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.snapshot_at, "2026-03-01T00:00:00.000000Z");
    }

    #[tokio::test]
    async fn test_changed_field_bumps_version_once() {
        let pool = init_memory_pool().unwrap();
        let row = node("s1", "package", "p1", "Package 1");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();

        let mut changed = row.clone();
        changed.label = "Package 1 (split)".to_string();
        upsert_nodes(&pool, vec![changed.clone()]).await.unwrap();
        upsert_nodes(&pool, vec![changed]).await.unwrap();

        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.label, "Package 1 (split)");
    }

    #[tokio::test]
    async fn test_feature_change_is_content_change() {
        let pool = init_memory_pool().unwrap();
        let row = node("s1", "plant", "pl1", "Plant");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();

        let mut changed = row.clone();
        changed.feature_vector = Some(vec![0.25, 1.5, 3.0]);
        let outcome = upsert_nodes(&pool, vec![changed]).await.unwrap();
        assert_eq!(outcome.updated, 1);
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_batch_collapse() {
        let pool = init_memory_pool().unwrap();
        let first = node("s1", "package", "p1", "old");
        let second = node("s1", "package", "p1", "new");
        let outcome = upsert_nodes(&pool, vec![first, second.clone()]).await.unwrap();
        assert_eq!(outcome.inserted, 1);

        let stored = get_node(&pool, &second.node_id).await.unwrap().unwrap();
        assert_eq!(stored.label, "new");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_empty_upsert_is_noop() {
        let pool = init_memory_pool().unwrap();
        let outcome = upsert_nodes(&pool, Vec::new()).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::default());
    }

    #[tokio::test]
    async fn test_deactivate_respects_partition() {
        let pool = init_memory_pool().unwrap();
        upsert_nodes(
            &pool,
            vec![
                node("a", "package", "p1", "A p1"),
                node("a", "package", "p2", "A p2"),
                node("a", "plant", "pl1", "A plant"),
                node("b", "package", "p3", "B p3"),
            ],
        )
        .await
        .unwrap();

        let n = deactivate_nodes_not_in_set(&pool, "a", "package", keep(&["package:p1"]), "t1")
            .await
            .unwrap();
        assert_eq!(n, 1);

        assert!(!get_node(&pool, "package:p2").await.unwrap().unwrap().is_active);
        assert!(get_node(&pool, "package:p1").await.unwrap().unwrap().is_active);
        assert!(get_node(&pool, "plant:pl1").await.unwrap().unwrap().is_active);
        assert!(get_node(&pool, "package:p3").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_empty_keep_set_deactivates_partition() {
        let pool = init_memory_pool().unwrap();
        upsert_nodes(
            &pool,
            vec![node("a", "task", "t1", "T1"), node("a", "task", "t2", "T2")],
        )
        .await
        .unwrap();

        let n = deactivate_nodes_not_in_set(&pool, "a", "task", HashSet::new(), "t1")
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert!(list_nodes_by_type(&pool, "a", "task", true).await.unwrap().is_empty());
        assert_eq!(list_nodes_by_type(&pool, "a", "task", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reactivation_bumps_version() {
        let pool = init_memory_pool().unwrap();
        let row = node("a", "package", "p1", "P1");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();
        deactivate_nodes_not_in_set(&pool, "a", "package", HashSet::new(), "t1")
            .await
            .unwrap();

        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.version, 1);

        let outcome = upsert_nodes(&pool, vec![row.clone()]).await.unwrap();
        assert_eq!(outcome.reactivated, 1);
        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_lookup_by_source_ids() {
        let pool = init_memory_pool().unwrap();
        upsert_nodes(
            &pool,
            vec![
                node("a", "package", "p1", "P1"),
                node("a", "package", "p2", "P2"),
                node("b", "package", "p1x", "other site"),
            ],
        )
        .await
        .unwrap();

        let rows = get_nodes_by_source_ids(
            &pool,
            "a",
            "package",
            vec!["p2".to_string(), "p1x".to_string(), "missing".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_entity_id, "p2");
    }

    #[tokio::test]
    async fn test_anomalous_ordering_and_threshold() {
        let pool = init_memory_pool().unwrap();
        let rows: Vec<NodeRow> = ["n1", "n2", "n3", "n4"]
            .iter()
            .map(|s| node("a", "package", s, s))
            .collect();
        upsert_nodes(&pool, rows).await.unwrap();
        set_node_anomaly(&pool, "package:n1", Some(0.9), None).await.unwrap();
        set_node_anomaly(&pool, "package:n2", Some(0.5), None).await.unwrap();
        set_node_anomaly(&pool, "package:n3", Some(0.95), None).await.unwrap();

        let hits = get_anomalous_nodes(&pool, "a", 0.6, None, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids, vec!["package:n3", "package:n1"]);

        let none = get_anomalous_nodes(&pool, "a", 0.6, Some("plant"), 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_write_keeps_version_and_survives_upsert() {
        let pool = init_memory_pool().unwrap();
        let row = node("a", "package", "p1", "P1");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();
        set_node_anomaly(&pool, &row.node_id, Some(0.7), Some(r#"{"reason":"drift"}"#.into()))
            .await
            .unwrap();

        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();
        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.anomaly_score, Some(0.7));
        assert_eq!(stored.anomaly_explanation.as_deref(), Some(r#"{"reason":"drift"}"#));
    }

    #[tokio::test]
    async fn test_anomaly_write_on_missing_node() {
        let pool = init_memory_pool().unwrap();
        let err = set_node_anomaly(&pool, "package:ghost", Some(0.1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_site_move_is_an_update() {
        let pool = init_memory_pool().unwrap();
        let row = node("a", "package", "p1", "P1");
        upsert_nodes(&pool, vec![row.clone()]).await.unwrap();

        let mut moved = row.clone();
        moved.site_id = "b".to_string();
        let outcome = upsert_nodes(&pool, vec![moved]).await.unwrap();
        assert_eq!(outcome.updated, 1);

        let stored = get_node(&pool, &row.node_id).await.unwrap().unwrap();
        assert_eq!(stored.site_id, "b");
        assert_eq!(stored.version, 2);
        assert!(list_nodes_by_type(&pool, "a", "package", false).await.unwrap().is_empty());
    }
}
