//! Per-type node property schemas.
//!
//! Each [`NodeType`] has its own property record. In memory a node carries the
//! typed variant; only at the storage boundary is it flattened to a JSON
//! object (the variant's fields, without a tag, since `node_type` is its own
//! column). Unknown fields are rejected.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::model::NodeType;
use crate::error::{CanopyError, CanopyResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageProperties {
    pub package_label: String,
    pub item_name: String,
    pub quantity: f64,
    pub unit_of_measure: String,
    pub status: String,
    pub room_id: Option<String>,
    #[serde(default)]
    pub on_hold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantProperties {
    pub plant_tag: String,
    pub growth_phase: String,
    pub strain_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrainProperties {
    pub name: String,
    pub genetics: Option<String>,
    pub thc_target_pct: Option<f64>,
    pub cbd_target_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestProperties {
    pub harvest_name: String,
    pub status: String,
    pub wet_weight_grams: Option<f64>,
    pub dry_weight_grams: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabTestBatchProperties {
    pub batch_number: String,
    pub status: String,
    pub lab_name: Option<String>,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskProperties {
    pub title: String,
    pub status: String,
    pub priority: Option<String>,
    pub assignee_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProperties {
    pub display_name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IrrigationRunProperties {
    pub zone_id: String,
    pub volume_liters: f64,
    pub duration_seconds: Option<u32>,
    pub ec: Option<f64>,
    pub ph: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorStreamProperties {
    pub sensor_kind: String,
    pub unit: String,
    pub zone_id: Option<String>,
    pub sample_interval_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneEmitterConfigProperties {
    pub zone_id: String,
    pub emitters_per_plant: u32,
    pub flow_rate_lph: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovementProperties {
    pub to_location: String,
    pub from_location: Option<String>,
    pub quantity: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SteeringProfileProperties {
    pub name: String,
    pub phase: String,
    pub target_vwc_pct: Option<f64>,
    pub target_ec: Option<f64>,
}

/// Typed property bag, one variant per node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", content = "properties", rename_all = "snake_case")]
pub enum NodeProperties {
    Package(PackageProperties),
    Plant(PlantProperties),
    Strain(StrainProperties),
    Harvest(HarvestProperties),
    LabTestBatch(LabTestBatchProperties),
    Task(TaskProperties),
    User(UserProperties),
    IrrigationRun(IrrigationRunProperties),
    SensorStream(SensorStreamProperties),
    ZoneEmitterConfig(ZoneEmitterConfigProperties),
    Movement(MovementProperties),
    SteeringProfile(SteeringProfileProperties),
}

impl NodeProperties {
    /// The node type this property record belongs to.
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Package(_) => NodeType::Package,
            Self::Plant(_) => NodeType::Plant,
            Self::Strain(_) => NodeType::Strain,
            Self::Harvest(_) => NodeType::Harvest,
            Self::LabTestBatch(_) => NodeType::LabTestBatch,
            Self::Task(_) => NodeType::Task,
            Self::User(_) => NodeType::User,
            Self::IrrigationRun(_) => NodeType::IrrigationRun,
            Self::SensorStream(_) => NodeType::SensorStream,
            Self::ZoneEmitterConfig(_) => NodeType::ZoneEmitterConfig,
            Self::Movement(_) => NodeType::Movement,
            Self::SteeringProfile(_) => NodeType::SteeringProfile,
        }
    }

    /// Untagged JSON value of the inner record.
    pub fn to_value(&self) -> CanopyResult<serde_json::Value> {
        let value = match self {
            Self::Package(p) => serde_json::to_value(p),
            Self::Plant(p) => serde_json::to_value(p),
            Self::Strain(p) => serde_json::to_value(p),
            Self::Harvest(p) => serde_json::to_value(p),
            Self::LabTestBatch(p) => serde_json::to_value(p),
            Self::Task(p) => serde_json::to_value(p),
            Self::User(p) => serde_json::to_value(p),
            Self::IrrigationRun(p) => serde_json::to_value(p),
            Self::SensorStream(p) => serde_json::to_value(p),
            Self::ZoneEmitterConfig(p) => serde_json::to_value(p),
            Self::Movement(p) => serde_json::to_value(p),
            Self::SteeringProfile(p) => serde_json::to_value(p),
        }?;
        Ok(value)
    }

    /// Serialized form stored in `properties_json`. Field order follows the
    /// struct declaration, so equal records always produce equal strings.
    pub fn to_json(&self) -> CanopyResult<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    /// Parse an untagged property value against the schema of `node_type`.
    pub fn from_value(node_type: NodeType, value: serde_json::Value) -> CanopyResult<Self> {
        let props = match node_type {
            NodeType::Package => Self::Package(parse(node_type, value)?),
            NodeType::Plant => Self::Plant(parse(node_type, value)?),
            NodeType::Strain => Self::Strain(parse(node_type, value)?),
            NodeType::Harvest => Self::Harvest(parse(node_type, value)?),
            NodeType::LabTestBatch => Self::LabTestBatch(parse(node_type, value)?),
            NodeType::Task => Self::Task(parse(node_type, value)?),
            NodeType::User => Self::User(parse(node_type, value)?),
            NodeType::IrrigationRun => Self::IrrigationRun(parse(node_type, value)?),
            NodeType::SensorStream => Self::SensorStream(parse(node_type, value)?),
            NodeType::ZoneEmitterConfig => Self::ZoneEmitterConfig(parse(node_type, value)?),
            NodeType::Movement => Self::Movement(parse(node_type, value)?),
            NodeType::SteeringProfile => Self::SteeringProfile(parse(node_type, value)?),
        };
        Ok(props)
    }

    pub fn from_json(node_type: NodeType, raw: &str) -> CanopyResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            CanopyError::validation(format!("{} properties are not JSON: {}", node_type, e))
        })?;
        Self::from_value(node_type, value)
    }
}

fn parse<T: DeserializeOwned>(node_type: NodeType, value: serde_json::Value) -> CanopyResult<T> {
    serde_json::from_value(value).map_err(|e| {
        CanopyError::validation(format!("malformed {} properties: {}", node_type, e))
    })
}
