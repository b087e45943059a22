//! Candidate filtering and ranking for placement decisions.
//!
//! A cluster is a candidate for a request when it is live, `ready`,
//! schedulable, owned by the shared pool, in the request's provider and
//! region with the same multi-AZ setting, and supports the instance type.
//! Candidates are ranked by remaining streaming units, most first; ties go
//! to the cluster that became ready first.

use fleet_state::{Cluster, ClusterType, InstanceRequest};
use serde::Serialize;

/// What a request needs from a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementRequirements {
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub instance_type: String,
    pub streaming_units: u32,
    pub organization_id: String,
}

impl From<&InstanceRequest> for PlacementRequirements {
    fn from(request: &InstanceRequest) -> Self {
        Self {
            cloud_provider: request.cloud_provider.clone(),
            region: request.region.clone(),
            multi_az: request.multi_az,
            instance_type: request.instance_type.clone(),
            streaming_units: request.streaming_units,
            organization_id: request.organization_id.clone(),
        }
    }
}

/// A cluster able to host the request, with its capacity accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub cluster_id: String,
    pub max_units: u32,
    pub consumed_units: u32,
    /// Count only units of the request's instance type against `max_units`.
    pub per_instance_type: bool,
    pub ready_at: u64,
}

impl Candidate {
    pub fn remaining_units(&self) -> u32 {
        self.max_units.saturating_sub(self.consumed_units)
    }

    pub fn fits(&self, units: u32) -> bool {
        self.remaining_units() >= units
    }
}

/// Whether a shared-pool cluster can host the request at all, capacity aside.
pub fn is_eligible(cluster: &Cluster, req: &PlacementRequirements) -> bool {
    cluster.accepts_placements()
        && cluster.cluster_type == ClusterType::Managed
        && cluster.cloud_provider == req.cloud_provider
        && cluster.region == req.region
        && cluster.multi_az == req.multi_az
        && cluster.supports_instance_type(&req.instance_type)
}

/// Keep the candidates with room for `units`, best first.
pub fn rank_candidates(candidates: Vec<Candidate>, units: u32) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = candidates.into_iter().filter(|c| c.fits(units)).collect();
    ranked.sort_by(|a, b| {
        b.remaining_units()
            .cmp(&a.remaining_units())
            .then(a.ready_at.cmp(&b.ready_at))
            .then_with(|| a.cluster_id.cmp(&b.cluster_id))
    });
    ranked
}
