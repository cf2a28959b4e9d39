//! Canopy Core Library
//!
//! Strongly typed graph model (nodes, edges, per-type property schemas,
//! snapshot feeds) and the typed node/edge stores built on `canopy-db`.

pub mod edge;
pub mod error;
pub mod ids;
pub mod node;
pub mod snapshot;

pub use canopy_db::queries::UpsertOutcome;
pub use edge::model::{EdgeType, GraphEdge};
pub use error::{CanopyError, CanopyResult, TraversalLimit};
pub use node::model::{GraphNode, NodeType};
pub use node::properties::NodeProperties;
pub use snapshot::{EdgeSnapshot, NodeSnapshot, SnapshotBatch};
