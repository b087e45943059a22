//! Streaming unit capacity of a region, per instance type.

use std::collections::{BTreeMap, HashMap};

use fleet_core::config::RegionInstanceTypeLimit;
use fleet_state::{Cluster, ClusterId, ClusterStatus, ClusterType};
use serde::Serialize;

/// Capacity of one `(provider, region, instance type)` across the shared pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacitySummary {
    pub cloud_provider: String,
    pub region: String,
    pub instance_type: String,
    pub max_units: u32,
    pub consumed_units: u32,
    /// Units still claimable on clusters that accept placements.
    pub free_units: u32,
    /// A cluster for this shape is still being brought up.
    pub ongoing_scale_up: bool,
    /// Some cluster has room for the biggest size of the instance type.
    pub biggest_size_fits: bool,
}

impl CapacitySummary {
    /// Summarize `clusters` for one shape. `usage` maps cluster id to
    /// consumed units per instance type.
    pub fn compute<'a>(
        clusters: impl IntoIterator<Item = &'a Cluster>,
        usage: &HashMap<ClusterId, BTreeMap<String, u32>>,
        cloud_provider: &str,
        region: &str,
        instance_type: &str,
        biggest_size_units: u32,
    ) -> Self {
        let mut summary = Self {
            cloud_provider: cloud_provider.to_string(),
            region: region.to_string(),
            instance_type: instance_type.to_string(),
            max_units: 0,
            consumed_units: 0,
            free_units: 0,
            ongoing_scale_up: false,
            biggest_size_fits: false,
        };

        for cluster in clusters
            .into_iter()
            .filter(|c| in_shape(c, cloud_provider, region, instance_type))
        {
            if cluster.status.is_on_way_to_ready() {
                summary.ongoing_scale_up = true;
                continue;
            }
            let max = cluster.max_units(instance_type);
            let consumed = usage
                .get(&cluster.cluster_id)
                .and_then(|by_type| by_type.get(instance_type))
                .copied()
                .unwrap_or(0);
            summary.max_units = summary.max_units.saturating_add(max);
            summary.consumed_units = summary.consumed_units.saturating_add(consumed);

            if cluster.accepts_placements() {
                let remaining = max.saturating_sub(consumed);
                summary.free_units = summary.free_units.saturating_add(remaining);
                if remaining >= biggest_size_units {
                    summary.biggest_size_fits = true;
                }
            }
        }
        summary
    }

    pub fn limit_reached(&self, limit: &RegionInstanceTypeLimit) -> bool {
        limit.limit.is_some_and(|l| self.consumed_units >= l)
    }

    /// Capacity is short of what the region wants available.
    pub fn is_short(&self, limit: &RegionInstanceTypeLimit) -> bool {
        !self.biggest_size_fits || self.free_units < limit.min_available_capacity_slack
    }

    /// A new cluster should be created for this shape.
    pub fn scale_up_needed(&self, limit: &RegionInstanceTypeLimit) -> bool {
        !self.ongoing_scale_up && !self.limit_reached(limit) && self.is_short(limit)
    }
}

/// Shared-pool clusters of a shape that are not on their way out.
fn in_shape(cluster: &Cluster, cloud_provider: &str, region: &str, instance_type: &str) -> bool {
    !cluster.is_deleted()
        && !cluster.status.is_being_removed()
        && cluster.status != ClusterStatus::Failed
        && cluster.cluster_type == ClusterType::Managed
        && cluster.cloud_provider == cloud_provider
        && cluster.region == region
        && cluster.supports_instance_type(instance_type)
}
