//! Placement engine: read candidates, then claim one conditionally.
//!
//! The claim re-checks capacity inside a write transaction. A claim that
//! loses to a concurrent placement re-runs the strategy against refreshed
//! state, up to [`MAX_CLAIM_ATTEMPTS`] times.

use fleet_core::FleetContext;
use fleet_state::{CapacityClaim, ClaimOutcome, InstanceRequest, new_id};
use tracing::{debug, info, warn};

use crate::error::{PlacementError, PlacementResult};
use crate::strategy::strategy_for;

pub const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Assign an instance request to a cluster with free capacity.
///
/// Returns the cluster id. A request that is already placed returns its
/// cluster without claiming anything. The request's status is not changed.
pub fn place_instance_request(ctx: &FleetContext, request_id: &str) -> PlacementResult<String> {
    let mut contended = None;

    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let request = load_request(ctx, request_id)?;
        if let Some(cluster_id) = request.cluster_id {
            return Ok(cluster_id);
        }

        let strategy = strategy_for(ctx, &request);
        let candidates = strategy.candidates(&request)?;
        let Some(best) = candidates.first() else {
            debug!(%request_id, strategy = strategy.name(), "no candidate cluster");
            return Err(capacity_exhausted(&request));
        };

        let claim = CapacityClaim {
            request_id: request.id.clone(),
            cluster_id: best.cluster_id.clone(),
            placement_id: new_id(),
            max_units: best.max_units,
            instance_type: best
                .per_instance_type
                .then(|| request.instance_type.clone()),
            next_status: None,
        };

        match ctx.store.claim_capacity(&claim)? {
            ClaimOutcome::Claimed => {
                info!(
                    %request_id,
                    cluster_id = %claim.cluster_id,
                    strategy = strategy.name(),
                    units = request.streaming_units,
                    "instance request placed"
                );
                return Ok(claim.cluster_id);
            }
            ClaimOutcome::AlreadyPlaced(cluster_id) => return Ok(cluster_id),
            ClaimOutcome::RequestNotFound => {
                return Err(PlacementError::RequestNotFound(request_id.to_string()));
            }
            outcome @ (ClaimOutcome::InsufficientCapacity { .. } | ClaimOutcome::ClusterNotReady) => {
                warn!(%request_id, cluster_id = %claim.cluster_id, attempt, ?outcome, "placement claim lost");
                contended = Some(claim.cluster_id);
            }
        }
    }

    Err(PlacementError::Conflict(contended.unwrap_or_default()))
}

fn load_request(ctx: &FleetContext, request_id: &str) -> PlacementResult<InstanceRequest> {
    ctx.store
        .get_request(request_id)?
        .filter(|r| !r.is_deleted())
        .ok_or_else(|| PlacementError::RequestNotFound(request_id.to_string()))
}

fn capacity_exhausted(request: &InstanceRequest) -> PlacementError {
    PlacementError::CapacityExhausted {
        cloud_provider: request.cloud_provider.clone(),
        region: request.region.clone(),
        instance_type: request.instance_type.clone(),
    }
}
