//! Snapshot reconciliation.
//!
//! A producer hands over the complete live set of one (site, type)
//! partition. The engine upserts that set in chunks and only then
//! deactivates whatever was active in the partition but absent from the
//! snapshot. A failure during upsert leaves the partition without any
//! deactivation, and replaying the same snapshot is idempotent.

pub mod locks;

use std::collections::HashSet;

use anyhow::{Context, Result};
use canopy_core::snapshot::{EdgeSnapshot, NodeSnapshot, SnapshotBatch};
use canopy_core::{edge, node, CanopyError, CanopyResult, UpsertOutcome};
use canopy_db::{BroadcastSender, DbPool, GraphEvent};
use chrono::{DateTime, SubsecRound, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
pub use locks::{PartitionKey, PartitionKind, PartitionLocks};

/// Result of reconciling one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub site_id: String,
    pub kind: PartitionKind,
    pub type_name: String,
    /// Entries after duplicate collapsing.
    pub received: usize,
    pub upserted: UpsertOutcome,
    pub deactivated: usize,
    pub snapshot_at: DateTime<Utc>,
}

/// Totals over a batch of partitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub partitions: usize,
    pub upserted: UpsertOutcome,
    pub deactivated: usize,
}

impl SyncSummary {
    fn merge(&mut self, report: &SyncReport) {
        self.partitions += 1;
        self.upserted.merge(&report.upserted);
        self.deactivated += report.deactivated;
    }

    pub fn from_reports(reports: &[SyncReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            summary.merge(report);
        }
        summary
    }
}

/// Applies snapshots to the node and edge stores.
#[derive(Clone)]
pub struct ReconciliationEngine {
    pool: DbPool,
    chunk_size: usize,
    locks: PartitionLocks,
    events: Option<BroadcastSender>,
}

impl ReconciliationEngine {
    pub fn new(pool: DbPool, config: &SyncConfig) -> CanopyResult<Self> {
        if config.chunk_size == 0 {
            return Err(CanopyError::config("sync.chunk_size must be at least 1"));
        }
        Ok(Self {
            pool,
            chunk_size: config.chunk_size,
            locks: PartitionLocks::new(),
            events: None,
        })
    }

    /// Publish a `PartitionReconciled` event after each partition.
    pub fn with_events(mut self, events: BroadcastSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Share partition locks with another engine over the same database.
    pub fn with_locks(mut self, locks: PartitionLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Reconcile one node partition against its complete snapshot.
    pub async fn reconcile_nodes(&self, snapshot: NodeSnapshot) -> CanopyResult<SyncReport> {
        let site_id = snapshot.site_id.clone();
        let node_type = snapshot.node_type;
        let mut nodes = snapshot.into_nodes()?;

        let key = PartitionKey::new(&site_id, PartitionKind::Node, node_type.as_str());
        let _guard = self.locks.acquire(&key).await;
        info!(partition = %key, entries = nodes.len(), "Reconciling node partition");
        if nodes.is_empty() {
            warn!(partition = %key, "Empty snapshot, deactivating the whole partition");
        }

        let snapshot_at = Utc::now().trunc_subsecs(6);
        for n in nodes.iter_mut() {
            n.snapshot_at = snapshot_at;
        }

        let mut upserted = UpsertOutcome::default();
        for (i, chunk) in nodes.chunks(self.chunk_size).enumerate() {
            let outcome = node::upsert_nodes(&self.pool, chunk).await?;
            debug!(partition = %key, chunk = i, rows = chunk.len(), changed = outcome.changed(), "Upserted chunk");
            upserted.merge(&outcome);
        }

        let keep: HashSet<String> = nodes.iter().map(|n| n.node_id.clone()).collect();
        let deactivated =
            node::deactivate_nodes_not_in_set(&self.pool, &site_id, node_type, keep, snapshot_at)
                .await?;

        let report = SyncReport {
            site_id,
            kind: PartitionKind::Node,
            type_name: node_type.as_str().to_string(),
            received: nodes.len(),
            upserted,
            deactivated,
            snapshot_at,
        };
        self.finish(&key, &report);
        Ok(report)
    }

    /// Reconcile one edge partition against its complete snapshot.
    /// Endpoints are not checked; dangling edges are stored as given.
    pub async fn reconcile_edges(&self, snapshot: EdgeSnapshot) -> CanopyResult<SyncReport> {
        let site_id = snapshot.site_id.clone();
        let edge_type = snapshot.edge_type;
        let mut edges = snapshot.into_edges()?;

        let key = PartitionKey::new(&site_id, PartitionKind::Edge, edge_type.as_str());
        let _guard = self.locks.acquire(&key).await;
        info!(partition = %key, entries = edges.len(), "Reconciling edge partition");
        if edges.is_empty() {
            warn!(partition = %key, "Empty snapshot, deactivating the whole partition");
        }

        let snapshot_at = Utc::now().trunc_subsecs(6);
        for e in edges.iter_mut() {
            e.snapshot_at = snapshot_at;
        }

        let mut upserted = UpsertOutcome::default();
        for (i, chunk) in edges.chunks(self.chunk_size).enumerate() {
            let outcome = edge::upsert_edges(&self.pool, chunk).await?;
            debug!(partition = %key, chunk = i, rows = chunk.len(), changed = outcome.changed(), "Upserted chunk");
            upserted.merge(&outcome);
        }

        let keep: HashSet<String> = edges.iter().map(|e| e.edge_id.clone()).collect();
        let deactivated =
            edge::deactivate_edges_not_in_set(&self.pool, &site_id, edge_type, keep, snapshot_at)
                .await?;

        let report = SyncReport {
            site_id,
            kind: PartitionKind::Edge,
            type_name: edge_type.as_str().to_string(),
            received: edges.len(),
            upserted,
            deactivated,
            snapshot_at,
        };
        self.finish(&key, &report);
        Ok(report)
    }

    /// Reconcile every partition of a batch: all node partitions
    /// concurrently, then all edge partitions concurrently. A partition may
    /// appear only once per batch.
    pub async fn reconcile_batch(&self, batch: SnapshotBatch) -> Result<Vec<SyncReport>> {
        check_unique_partitions(&batch)?;
        info!(
            node_partitions = batch.nodes.len(),
            edge_partitions = batch.edges.len(),
            "Starting batch reconciliation"
        );

        let node_runs = batch.nodes.into_iter().map(|snapshot| {
            let label = format!("{}/{}", snapshot.site_id, snapshot.node_type);
            async move {
                self.reconcile_nodes(snapshot)
                    .await
                    .with_context(|| format!("Failed to reconcile node partition {}", label))
            }
        });
        let mut reports = try_join_all(node_runs).await?;

        let edge_runs = batch.edges.into_iter().map(|snapshot| {
            let label = format!("{}/{}", snapshot.site_id, snapshot.edge_type);
            async move {
                self.reconcile_edges(snapshot)
                    .await
                    .with_context(|| format!("Failed to reconcile edge partition {}", label))
            }
        });
        reports.extend(try_join_all(edge_runs).await?);

        let summary = SyncSummary::from_reports(&reports);
        info!(
            partitions = summary.partitions,
            inserted = summary.upserted.inserted,
            updated = summary.upserted.updated,
            reactivated = summary.upserted.reactivated,
            deactivated = summary.deactivated,
            "Batch reconciliation complete"
        );
        Ok(reports)
    }

    fn finish(&self, key: &PartitionKey, report: &SyncReport) {
        info!(
            partition = %key,
            inserted = report.upserted.inserted,
            updated = report.upserted.updated,
            reactivated = report.upserted.reactivated,
            unchanged = report.upserted.unchanged,
            deactivated = report.deactivated,
            "Partition reconciled"
        );
        if let Some(events) = &self.events {
            // No subscribers is not an error.
            let _ = events.send(GraphEvent::PartitionReconciled {
                site_id: report.site_id.clone(),
                kind: report.kind.as_str().to_string(),
                type_name: report.type_name.clone(),
                changed: report.upserted.changed(),
                deactivated: report.deactivated,
            });
        }
    }
}

fn check_unique_partitions(batch: &SnapshotBatch) -> CanopyResult<()> {
    let mut seen = HashSet::new();
    let keys = batch
        .nodes
        .iter()
        .map(|s| PartitionKey::new(&s.site_id, PartitionKind::Node, s.node_type.as_str()))
        .chain(
            batch
                .edges
                .iter()
                .map(|s| PartitionKey::new(&s.site_id, PartitionKind::Edge, s.edge_type.as_str())),
        );
    for key in keys {
        if !seen.insert(key.clone()) {
            return Err(CanopyError::validation(format!(
                "partition {} appears more than once in the batch",
                key
            )));
        }
    }
    Ok(())
}
