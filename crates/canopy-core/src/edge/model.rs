//! Graph edge domain models.

use std::fmt;
use std::str::FromStr;

use canopy_db::queries::edges::EdgeRow;
use canopy_db::timestamp::{format_timestamp, parse_timestamp};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CanopyError, CanopyResult};
use crate::ids;

/// Relationship kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    LineageOf,
    LocatedAt,
    AssignedTo,
    DependsOn,
    IrrigationResponseOf,
    BelongsToBatch,
}

impl EdgeType {
    pub const ALL: [EdgeType; 6] = [
        EdgeType::LineageOf,
        EdgeType::LocatedAt,
        EdgeType::AssignedTo,
        EdgeType::DependsOn,
        EdgeType::IrrigationResponseOf,
        EdgeType::BelongsToBatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LineageOf => "lineage_of",
            Self::LocatedAt => "located_at",
            Self::AssignedTo => "assigned_to",
            Self::DependsOn => "depends_on",
            Self::IrrigationResponseOf => "irrigation_response_of",
            Self::BelongsToBatch => "belongs_to_batch",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CanopyError::validation(format!("unknown edge type '{}'", s)))
    }
}

/// A versioned, typed, directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub edge_id: String,
    pub site_id: String,
    pub edge_type: EdgeType,
    pub source_node_id: String,
    pub target_node_id: String,
    pub weight: f64,
    pub properties: Map<String, Value>,
    pub relationship_created_at: DateTime<Utc>,
    pub snapshot_at: DateTime<Utc>,
    pub version: i64,
    pub is_active: bool,
    pub anomaly_score: Option<f64>,
}

impl GraphEdge {
    pub fn new(
        site_id: impl Into<String>,
        edge_type: EdgeType,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        relationship_created_at: DateTime<Utc>,
    ) -> Self {
        let source_node_id = source_node_id.into();
        let target_node_id = target_node_id.into();
        Self {
            edge_id: ids::edge_id(&source_node_id, &target_node_id, edge_type),
            site_id: site_id.into(),
            edge_type,
            source_node_id,
            target_node_id,
            weight: 1.0,
            properties: Map::new(),
            relationship_created_at: relationship_created_at.trunc_subsecs(6),
            snapshot_at: Utc::now().trunc_subsecs(6),
            version: 0,
            is_active: true,
            anomaly_score: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// The endpoint opposite `node_id`, if `node_id` is an endpoint.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source_node_id == node_id {
            Some(&self.target_node_id)
        } else if self.target_node_id == node_id {
            Some(&self.source_node_id)
        } else {
            None
        }
    }

    pub fn same_content(&self, other: &GraphEdge) -> bool {
        self.edge_id == other.edge_id
            && self.site_id == other.site_id
            && self.weight == other.weight
            && self.properties == other.properties
            && self.relationship_created_at == other.relationship_created_at
    }

    pub fn to_row(&self) -> CanopyResult<EdgeRow> {
        Ok(EdgeRow {
            edge_id: self.edge_id.clone(),
            site_id: self.site_id.clone(),
            edge_type: self.edge_type.as_str().to_string(),
            source_node_id: self.source_node_id.clone(),
            target_node_id: self.target_node_id.clone(),
            weight: self.weight,
            // serde_json's Map is key-sorted, so equal maps serialize identically.
            properties_json: serde_json::to_string(&self.properties)?,
            relationship_created_at: format_timestamp(&self.relationship_created_at),
            snapshot_at: format_timestamp(&self.snapshot_at),
            version: self.version,
            is_active: self.is_active,
            anomaly_score: self.anomaly_score,
        })
    }

    pub fn from_row(row: EdgeRow) -> CanopyResult<Self> {
        Ok(Self {
            edge_id: row.edge_id,
            site_id: row.site_id,
            edge_type: row.edge_type.parse()?,
            source_node_id: row.source_node_id,
            target_node_id: row.target_node_id,
            weight: row.weight,
            properties: serde_json::from_str(&row.properties_json)?,
            relationship_created_at: parse_timestamp(&row.relationship_created_at)?,
            snapshot_at: parse_timestamp(&row.snapshot_at)?,
            version: row.version,
            is_active: row.is_active,
            anomaly_score: row.anomaly_score,
        })
    }
}
