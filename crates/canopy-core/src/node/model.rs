//! Graph node domain models.

use std::fmt;
use std::str::FromStr;

use canopy_db::queries::nodes::NodeRow;
use canopy_db::timestamp::{format_timestamp, parse_timestamp};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::properties::NodeProperties;
use crate::error::{CanopyError, CanopyResult};
use crate::ids;

/// Kind of mirrored business entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Package,
    Plant,
    Strain,
    Harvest,
    LabTestBatch,
    Task,
    User,
    IrrigationRun,
    SensorStream,
    ZoneEmitterConfig,
    Movement,
    SteeringProfile,
}

impl NodeType {
    pub const ALL: [NodeType; 12] = [
        NodeType::Package,
        NodeType::Plant,
        NodeType::Strain,
        NodeType::Harvest,
        NodeType::LabTestBatch,
        NodeType::Task,
        NodeType::User,
        NodeType::IrrigationRun,
        NodeType::SensorStream,
        NodeType::ZoneEmitterConfig,
        NodeType::Movement,
        NodeType::SteeringProfile,
    ];

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Plant => "plant",
            Self::Strain => "strain",
            Self::Harvest => "harvest",
            Self::LabTestBatch => "lab_test_batch",
            Self::Task => "task",
            Self::User => "user",
            Self::IrrigationRun => "irrigation_run",
            Self::SensorStream => "sensor_stream",
            Self::ZoneEmitterConfig => "zone_emitter_config",
            Self::Movement => "movement",
            Self::SteeringProfile => "steering_profile",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = CanopyError;

    /// Accepts the snake_case name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CanopyError::validation(format!("unknown node type '{}'", s)))
    }
}

/// A versioned graph vertex mirroring one business entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub site_id: String,
    pub node_type: NodeType,
    pub source_entity_id: String,
    pub label: String,
    pub feature_vector: Option<Vec<f32>>,
    pub properties: NodeProperties,
    pub source_created_at: DateTime<Utc>,
    pub source_updated_at: DateTime<Utc>,
    pub snapshot_at: DateTime<Utc>,
    pub version: i64,
    pub is_active: bool,
    pub anomaly_score: Option<f64>,
    pub anomaly_explanation: Option<serde_json::Value>,
}

impl GraphNode {
    /// Build a node from producer content. Type and id derive from `properties`.
    /// Timestamps are truncated to the microsecond precision the store keeps.
    pub fn new(
        site_id: impl Into<String>,
        source_entity_id: impl Into<String>,
        label: impl Into<String>,
        properties: NodeProperties,
        source_created_at: DateTime<Utc>,
        source_updated_at: DateTime<Utc>,
    ) -> Self {
        let node_type = properties.node_type();
        let source_entity_id = source_entity_id.into();
        Self {
            node_id: ids::node_id(node_type, &source_entity_id),
            site_id: site_id.into(),
            node_type,
            source_entity_id,
            label: label.into(),
            feature_vector: None,
            properties,
            source_created_at: source_created_at.trunc_subsecs(6),
            source_updated_at: source_updated_at.trunc_subsecs(6),
            snapshot_at: Utc::now().trunc_subsecs(6),
            version: 0,
            is_active: true,
            anomaly_score: None,
            anomaly_explanation: None,
        }
    }

    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.feature_vector = Some(features);
        self
    }

    /// Producer content equality, ignoring bookkeeping and anomaly fields.
    pub fn same_content(&self, other: &GraphNode) -> bool {
        self.node_id == other.node_id
            && self.site_id == other.site_id
            && self.source_entity_id == other.source_entity_id
            && self.label == other.label
            && self.feature_vector == other.feature_vector
            && self.properties == other.properties
            && self.source_created_at == other.source_created_at
            && self.source_updated_at == other.source_updated_at
    }

    /// Flatten to a storage row.
    pub fn to_row(&self) -> CanopyResult<NodeRow> {
        let anomaly_explanation = match &self.anomaly_explanation {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        Ok(NodeRow {
            node_id: self.node_id.clone(),
            site_id: self.site_id.clone(),
            node_type: self.node_type.as_str().to_string(),
            source_entity_id: self.source_entity_id.clone(),
            label: self.label.clone(),
            feature_vector: self.feature_vector.clone(),
            properties_json: self.properties.to_json()?,
            source_created_at: format_timestamp(&self.source_created_at),
            source_updated_at: format_timestamp(&self.source_updated_at),
            snapshot_at: format_timestamp(&self.snapshot_at),
            version: self.version,
            is_active: self.is_active,
            anomaly_score: self.anomaly_score,
            anomaly_explanation,
        })
    }

    /// Rebuild from a storage row, re-validating the property schema.
    pub fn from_row(row: NodeRow) -> CanopyResult<Self> {
        let node_type: NodeType = row.node_type.parse()?;
        let properties = NodeProperties::from_json(node_type, &row.properties_json)?;
        let anomaly_explanation = match row.anomaly_explanation.as_deref() {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        Ok(Self {
            node_id: row.node_id,
            site_id: row.site_id,
            node_type,
            source_entity_id: row.source_entity_id,
            label: row.label,
            feature_vector: row.feature_vector,
            properties,
            source_created_at: parse_timestamp(&row.source_created_at)?,
            source_updated_at: parse_timestamp(&row.source_updated_at)?,
            snapshot_at: parse_timestamp(&row.snapshot_at)?,
            version: row.version,
            is_active: row.is_active,
            anomaly_score: row.anomaly_score,
            anomaly_explanation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::properties::UserProperties;
    use chrono::TimeZone;

    #[test]
    fn test_node_type_names() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
            assert!(!t.as_str().contains(':'));
        }
        assert_eq!("Lab_Test_Batch".parse::<NodeType>().unwrap(), NodeType::LabTestBatch);
        assert!("greenhouse".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_new_derives_type_and_id() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let node = GraphNode::new(
            "site-1",
            "u-42",
            "Ana",
            NodeProperties::User(UserProperties {
                display_name: "Ana".to_string(),
                role: None,
            }),
            ts,
            ts,
        );
        assert_eq!(node.node_type, NodeType::User);
        assert_eq!(node.node_id, "user:u-42");

        let row = node.to_row().unwrap();
        assert_eq!(row.node_type, "user");
        let back = GraphNode::from_row(row).unwrap();
        assert!(back.same_content(&node));
    }
}
