//! Placement strategies, one per scaling policy.

use fleet_core::FleetContext;
use fleet_core::config::ScalingMode;
use fleet_state::{ClusterStatus, ClusterType, InstanceRequest};
use tracing::debug;

use crate::candidate::{Candidate, PlacementRequirements, is_eligible, rank_candidates};
use crate::error::{PlacementError, PlacementResult};

/// Chooses the clusters a request may be claimed on.
pub trait ClusterPlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Clusters with room for the request, in the order they should be tried.
    /// An empty list means capacity is exhausted.
    fn candidates(&self, request: &InstanceRequest) -> PlacementResult<Vec<Candidate>>;
}

/// Strategy for a request: enterprise requests go to their own cluster,
/// everything else follows the configured scaling mode.
pub fn strategy_for(ctx: &FleetContext, request: &InstanceRequest) -> Box<dyn ClusterPlacementStrategy> {
    if request.desired_billing_model_is_enterprise() {
        return Box::new(EnterprisePlacement { ctx: ctx.clone() });
    }
    match ctx.config.dataplane.scaling_mode {
        ScalingMode::Manual => Box::new(ManualPlacement { ctx: ctx.clone() }),
        ScalingMode::Auto | ScalingMode::Dynamic => Box::new(CapacityPlacement { ctx: ctx.clone() }),
    }
}

// ── Manual ─────────────────────────────────────────────────────────

/// First configured cluster, in list order, still under its streaming unit
/// limit.
pub struct ManualPlacement {
    ctx: FleetContext,
}

impl ManualPlacement {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }
}

impl ClusterPlacementStrategy for ManualPlacement {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn candidates(&self, request: &InstanceRequest) -> PlacementResult<Vec<Candidate>> {
        let req = PlacementRequirements::from(request);
        let mut candidates = Vec::new();
        for entry in &self.ctx.config.dataplane.manual_clusters {
            let Some(cluster) = self.ctx.store.get_cluster(&entry.cluster_id)? else {
                continue;
            };
            if !is_eligible(&cluster, &req) {
                continue;
            }
            let candidate = Candidate {
                cluster_id: cluster.cluster_id.clone(),
                max_units: entry.streaming_unit_limit,
                consumed_units: self.ctx.store.consumed_units(&cluster.cluster_id, None)?,
                per_instance_type: false,
                ready_at: cluster.ready_at.unwrap_or(cluster.created_at),
            };
            if candidate.fits(req.streaming_units) {
                candidates.push(candidate);
            } else {
                debug!(cluster_id = %cluster.cluster_id, limit = entry.streaming_unit_limit, "manual cluster at its limit");
            }
        }
        Ok(candidates)
    }
}

// ── Auto / dynamic ─────────────────────────────────────────────────

/// Candidate with the most remaining units for the instance type, against
/// the capacity the data plane agent reported.
pub struct CapacityPlacement {
    ctx: FleetContext,
}

impl CapacityPlacement {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }
}

impl ClusterPlacementStrategy for CapacityPlacement {
    fn name(&self) -> &'static str {
        "capacity"
    }

    fn candidates(&self, request: &InstanceRequest) -> PlacementResult<Vec<Candidate>> {
        let req = PlacementRequirements::from(request);
        let usage = self.ctx.store.streaming_units_by_cluster()?;
        let candidates = self
            .ctx
            .store
            .list_clusters_by_status(&[ClusterStatus::Ready])?
            .into_iter()
            .filter(|c| is_eligible(c, &req))
            .map(|c| Candidate {
                consumed_units: usage
                    .get(&c.cluster_id)
                    .and_then(|by_type| by_type.get(&req.instance_type))
                    .copied()
                    .unwrap_or(0),
                max_units: c.max_units(&req.instance_type),
                per_instance_type: true,
                ready_at: c.ready_at.unwrap_or(c.created_at),
                cluster_id: c.cluster_id,
            })
            .collect();
        Ok(rank_candidates(candidates, req.streaming_units))
    }
}

// ── Enterprise ─────────────────────────────────────────────────────

/// The cluster the request names, if the organization owns it, it is ready
/// and it has room.
pub struct EnterprisePlacement {
    ctx: FleetContext,
}

impl EnterprisePlacement {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }
}

impl ClusterPlacementStrategy for EnterprisePlacement {
    fn name(&self) -> &'static str {
        "enterprise"
    }

    fn candidates(&self, request: &InstanceRequest) -> PlacementResult<Vec<Candidate>> {
        let Some(cluster_id) = request.requested_cluster_id.as_deref() else {
            return Err(PlacementError::MissingClusterId(request.id.clone()));
        };
        let cluster = self
            .ctx
            .store
            .get_cluster(cluster_id)?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| PlacementError::ClusterNotReady(cluster_id.to_string()))?;

        if cluster.cluster_type != ClusterType::Enterprise
            || cluster.organization_id.as_deref() != Some(request.organization_id.as_str())
        {
            return Err(PlacementError::Unauthorized(cluster_id.to_string()));
        }
        if cluster.status != ClusterStatus::Ready || !cluster.supports_instance_type(&request.instance_type) {
            return Err(PlacementError::ClusterNotReady(cluster_id.to_string()));
        }

        let candidate = Candidate {
            cluster_id: cluster.cluster_id.clone(),
            max_units: cluster.max_units(&request.instance_type),
            consumed_units: self
                .ctx
                .store
                .consumed_units(&cluster.cluster_id, Some(&request.instance_type))?,
            per_instance_type: true,
            ready_at: cluster.ready_at.unwrap_or(cluster.created_at),
        };
        Ok(rank_candidates(vec![candidate], request.streaming_units))
    }
}
