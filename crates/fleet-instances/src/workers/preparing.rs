use fleet_core::FleetContext;
use fleet_state::{InstanceRequest, InstanceRequestStatus, epoch_secs, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::info;

use super::{PREPARING_WORKER, fail_request};

const MAX_HOST_LABEL: usize = 32;

/// Gives preparing requests their bootstrap host and moves them to
/// `provisioning`, where the agent picks them up.
pub struct PreparingWorker {
    id: String,
    ctx: FleetContext,
}

impl PreparingWorker {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{PREPARING_WORKER}-{}", new_id()),
            ctx,
        }
    }

    pub fn reconcile_at(&self, now: u64) -> Vec<WorkerError> {
        let requests = match self
            .ctx
            .store
            .list_requests_by_status(&[InstanceRequestStatus::Preparing])
        {
            Ok(requests) => requests,
            Err(e) => return vec![e.into()],
        };
        requests
            .iter()
            .filter_map(|r| self.handle(r, now).err().map(|e| e.context(&r.id)))
            .collect()
    }

    fn handle(&self, request: &InstanceRequest, now: u64) -> WorkerResult<()> {
        // Time spent preparing counts from the request's last update.
        let expired =
            now.saturating_sub(request.updated_at) >= self.ctx.config.instances.preparing_max_retry_secs;

        let dns = match self.cluster_dns(request) {
            Ok(dns) => dns,
            Err(e) if expired => {
                fail_request(&self.ctx, request, e.to_string())?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let host = bootstrap_host(request, &dns);
        let updated = self
            .ctx
            .store
            .update_request_if(&request.id, &[InstanceRequestStatus::Preparing], |r| {
                r.bootstrap_server_host = Some(host.clone());
                r.status = InstanceRequestStatus::Provisioning;
            })?;
        if updated.is_some() {
            info!(request_id = %request.id, bootstrap_server_host = %host, "instance request provisioning");
        }
        Ok(())
    }

    fn cluster_dns(&self, request: &InstanceRequest) -> WorkerResult<String> {
        let cluster_id = request.cluster_id.as_deref().unwrap_or_default();
        self.ctx
            .store
            .get_cluster(cluster_id)?
            .filter(|c| !c.is_deleted())
            .and_then(|c| c.cluster_dns)
            .ok_or_else(|| WorkerError::Transient(anyhow::anyhow!("cluster {cluster_id} has no DNS name yet")))
    }
}

/// `<name>-<short id>.<cluster dns>`, lowercase, with the name cut to fit a
/// DNS label.
pub fn bootstrap_host(request: &InstanceRequest, cluster_dns: &str) -> String {
    let name: String = request
        .name
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(MAX_HOST_LABEL)
        .collect();
    let short_id: String = request.id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{name}-{short_id}.{cluster_dns}")
}

impl Worker for PreparingWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        PREPARING_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(async move { self.reconcile_at(epoch_secs()) })
    }
}
