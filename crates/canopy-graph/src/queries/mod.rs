//! Read-side queries over the mirrored graph.

pub mod anomaly;
pub mod explore;
pub mod stats;
