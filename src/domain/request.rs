use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{ScheduleReqEntry, ScheduleSetpointEntry};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum NodeType {
    #[default]
    Undefined,
    Generic,
    Evse,
}

/// Charging session state reported by an EVSE node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum EvseState {
    Disabled,
    Unplugged,
    WaitForAuth,
    PrepareCharging,
    WaitForEnergy,
    Charging,
    PausedEV,
    PausedEVSE,
    Finished,
}

impl EvseState {
    /// States that end a charging session.
    pub fn ends_session(self) -> bool {
        matches!(self, EvseState::Unplugged | EvseState::Finished)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    #[serde(rename = "L1")]
    pub l1: f64,
    #[serde(rename = "L2", default, skip_serializing_if = "Option::is_none")]
    pub l2: Option<f64>,
    #[serde(rename = "L3", default, skip_serializing_if = "Option::is_none")]
    pub l3: Option<f64>,
}

/// Subset of a power meter reading the energy manager looks at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "frequency_Hz", default, skip_serializing_if = "Option::is_none")]
    pub frequency_hz: Option<Frequency>,
}

/// What a session wants to reach, for strategies that plan towards a goal
/// instead of charging as fast as possible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerTarget {
    /// Energy still needed by the vehicle (Wh)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_amount_needed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_time: Option<DateTime<Utc>>,
    /// State of charge in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub car_battery_soc: Option<f64>,
}

/// One node of the consumer tree, as published by charge point managers.
///
/// A whole tree is delivered at once and replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyFlowRequest {
    #[serde(default)]
    pub children: Vec<EnergyFlowRequest>,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_target: Option<OptimizerTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evse_state: Option<EvseState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_usage_root: Option<EnergyUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_usage_leaves: Option<EnergyUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule_import: Vec<ScheduleReqEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule_export: Vec<ScheduleReqEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule_setpoints: Vec<ScheduleSetpointEntry>,
}

impl EnergyFlowRequest {
    pub fn new(uuid: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            uuid: uuid.into(),
            node_type,
            ..Default::default()
        }
    }

    /// Read a whole request tree from a JSON snapshot.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_child(mut self, child: EnergyFlowRequest) -> Self {
        self.children.push(child);
        self
    }

    /// True if this node or any descendant asks for an immediate pass.
    pub fn has_priority_request(&self) -> bool {
        self.priority_request.unwrap_or(false) || self.children.iter().any(Self::has_priority_request)
    }

    /// Measured grid frequency on L1, preferring the root side meter.
    pub fn measured_frequency(&self) -> Option<f64> {
        let l1 = |usage: &Option<EnergyUsage>| usage.as_ref().and_then(|u| u.frequency_hz).map(|f| f.l1);
        l1(&self.energy_usage_root).or_else(|| l1(&self.energy_usage_leaves))
    }

    /// Depth-first iterator over this node and all of its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &EnergyFlowRequest> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}
