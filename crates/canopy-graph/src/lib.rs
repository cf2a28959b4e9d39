//! # Canopy Graph
//!
//! Engines over the canopy graph mirror.
//!
//! Reconciles producer snapshots into the node and edge stores, walks
//! bounded neighborhoods for lineage and impact analysis, and serves
//! anomaly rankings and sync-health statistics.

pub mod config;
pub mod queries;
pub mod sync;

pub use config::{CanopyConfig, GraphConfig, SyncConfig};
pub use queries::explore::{Neighborhood, TraversalEngine};
pub use queries::stats::{get_statistics, GraphStatistics};
pub use sync::{ReconciliationEngine, SyncReport, SyncSummary};
