//! Synchronous operations on instance requests used by the admission and
//! admin paths.

use fleet_core::FleetContext;
use fleet_placement::place_instance_request;
use fleet_state::{ClusterId, InstanceRequest, InstanceRequestStatus};
use tracing::info;

use crate::error::{InstanceError, InstanceResult};

#[derive(Clone)]
pub struct InstanceService {
    ctx: FleetContext,
}

impl InstanceService {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    pub fn get(&self, request_id: &str) -> InstanceResult<InstanceRequest> {
        self.ctx
            .store
            .get_request(request_id)?
            .filter(|r| !r.is_deleted())
            .ok_or_else(|| InstanceError::NotFound(request_id.to_string()))
    }

    /// Assign the request to a cluster now, instead of waiting for the
    /// accepted worker.
    pub fn place(&self, request_id: &str) -> InstanceResult<ClusterId> {
        Ok(place_instance_request(&self.ctx, request_id)?)
    }

    /// Ask for a request to be suspended or resumed.
    ///
    /// Suspending is only valid from `ready` and resuming only from
    /// `suspended`. Anything else leaves the request untouched and returns
    /// `InvalidTransition`. The data plane agent completes the change.
    pub fn suspend_resume(&self, request_id: &str, suspended: bool) -> InstanceResult<InstanceRequestStatus> {
        let (action, from, to) = if suspended {
            ("suspend", InstanceRequestStatus::Ready, InstanceRequestStatus::Suspending)
        } else {
            ("resume", InstanceRequestStatus::Suspended, InstanceRequestStatus::Resuming)
        };

        let request = self.get(request_id)?;
        if request.status != from {
            return Err(InstanceError::InvalidTransition {
                action,
                status: request.status,
            });
        }
        if !self.ctx.store.transition_request(request_id, &[from], to)? {
            // Status moved between the read and the write.
            let current = self.get(request_id)?;
            return Err(InstanceError::InvalidTransition {
                action,
                status: current.status,
            });
        }
        info!(%request_id, %action, status = %to, "suspend/resume requested");
        Ok(to)
    }
}
