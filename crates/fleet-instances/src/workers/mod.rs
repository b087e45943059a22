//! Instance request lifecycle workers.

mod accepted;
mod deleting;
mod expiration;
mod preparing;

pub use accepted::AcceptedWorker;
pub use deleting::DeletingWorker;
pub use expiration::ExpirationWorker;
pub use preparing::PreparingWorker;

use fleet_core::FleetContext;
use fleet_state::{InstanceRequest, InstanceRequestStatus, StateResult};
use tracing::warn;

pub const ACCEPTED_WORKER: &str = "kafka_accepted";
pub const PREPARING_WORKER: &str = "kafka_preparing";
pub const DELETING_WORKER: &str = "kafka_deleting";
pub const EXPIRATION_WORKER: &str = "kafka_expiration";

/// Move a request to `failed` from its current status.
fn fail_request(ctx: &FleetContext, request: &InstanceRequest, reason: String) -> StateResult<()> {
    warn!(request_id = %request.id, status = %request.status, %reason, "instance request failed");
    ctx.store.update_request_if(&request.id, &[request.status], |r| {
        r.status = InstanceRequestStatus::Failed;
        r.failed_reason = Some(reason);
    })?;
    Ok(())
}
