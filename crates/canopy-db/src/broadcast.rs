//! Broadcast channel for graph change notifications.
//!
//! Reconciliation publishes one event per finished partition so that
//! downstream consumers (the anomaly scorer, dashboards) can react without
//! polling the statistics endpoint.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Graph change notifications.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum GraphEvent {
    /// A node or edge partition finished reconciling.
    PartitionReconciled {
        site_id: String,
        kind: String,
        type_name: String,
        changed: usize,
        deactivated: usize,
    },
    /// An anomaly score was written for a node or edge.
    AnomalyScored { id: String, score: f64 },
}

/// Type alias for the broadcast sender.
pub type BroadcastSender = broadcast::Sender<GraphEvent>;

/// Create a new broadcast channel with default capacity.
pub fn create_broadcast_channel() -> BroadcastSender {
    let (tx, _rx) = broadcast::channel(256);
    tx
}
