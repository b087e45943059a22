//! Cluster status reports pushed by the data plane agent.

use std::collections::BTreeMap;

use fleet_state::{Condition, StrimziVersion, ready_condition};
use serde::{Deserialize, Serialize};

/// Capacity measured in client connections and partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityMetrics {
    #[serde(default)]
    pub connections: u64,
    #[serde(default)]
    pub partitions: u64,
}

/// Worker node counts as the agent sees them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub current: u32,
    pub ceiling: u32,
    pub floor: u32,
    #[serde(default)]
    pub current_work_load_minimum: u32,
}

/// Step size of one resize, and the capacity one step adds or removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeInfo {
    pub node_delta: u32,
    #[serde(default)]
    pub delta: CapacityMetrics,
}

/// Streaming unit capacity of one instance type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTypeCapacity {
    pub max_units: u32,
    pub remaining_units: u32,
}

/// Body of `UpdateClusterStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterCapacityReport {
    pub conditions: Vec<Condition>,
    pub total: CapacityMetrics,
    pub remaining: CapacityMetrics,
    pub node_info: Option<NodeInfo>,
    pub resize_info: Option<ResizeInfo>,
    /// Keyed by instance type.
    pub capacity: BTreeMap<String, InstanceTypeCapacity>,
    pub strimzi_versions: Vec<StrimziVersion>,
}

impl ClusterCapacityReport {
    /// The agent reports `Ready=True`.
    pub fn is_ready(&self) -> bool {
        ready_condition(&self.conditions).is_some_and(|c| c.is_true())
    }

    /// Every reported instance type has run out of units.
    pub fn all_types_exhausted(&self) -> bool {
        !self.capacity.is_empty() && self.capacity.values().all(|c| c.remaining_units == 0)
    }
}
