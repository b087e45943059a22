use fleet_core::FleetContext;
use fleet_state::{InstanceRequest, InstanceRequestStatus, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::info;

use super::DELETING_WORKER;

/// Retires requests the agent has finished deleting, and deprovisioned
/// requests that never reached the agent.
pub struct DeletingWorker {
    id: String,
    ctx: FleetContext,
}

impl DeletingWorker {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{DELETING_WORKER}-{}", new_id()),
            ctx,
        }
    }

    pub fn reconcile_all(&self) -> Vec<WorkerError> {
        let requests = match self.ctx.store.list_requests_by_status(&[
            InstanceRequestStatus::Deleting,
            InstanceRequestStatus::Deprovision,
        ]) {
            Ok(requests) => requests,
            Err(e) => return vec![e.into()],
        };
        requests
            .iter()
            .filter_map(|r| self.handle(r).err().map(|e| e.context(&r.id)))
            .collect()
    }

    fn handle(&self, request: &InstanceRequest) -> WorkerResult<()> {
        if request.status == InstanceRequestStatus::Deprovision {
            // Provisioned instances wait for the agent to report them deleted.
            if request.bootstrap_server_host.is_some() {
                return Ok(());
            }
            let moved = self.ctx.store.transition_request(
                &request.id,
                &[InstanceRequestStatus::Deprovision],
                InstanceRequestStatus::Deleting,
            )?;
            if !moved {
                return Ok(());
            }
        }
        if self.ctx.store.soft_delete_request(&request.id)? {
            info!(request_id = %request.id, "instance request deleted");
        }
        Ok(())
    }
}

impl Worker for DeletingWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        DELETING_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(async move { self.reconcile_all() })
    }
}
