use fleet_core::FleetContext;
use fleet_state::{InstanceRequest, InstanceRequestStatus, epoch_secs, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::{debug, info};

use super::EXPIRATION_WORKER;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Keeps `expires_at` current and acts on it: requests inside their billing
/// model's grace period are suspended, expired requests are deprovisioned.
///
/// Sizes with a fixed lifespan expire `lifespan` after creation. Other
/// requests expire only when the organization loses its entitlement, after
/// the grace period.
pub struct ExpirationWorker {
    id: String,
    ctx: FleetContext,
}

impl ExpirationWorker {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{EXPIRATION_WORKER}-{}", new_id()),
            ctx,
        }
    }

    pub async fn reconcile_at(&self, now: u64) -> Vec<WorkerError> {
        let requests = match self.ctx.store.list_requests() {
            Ok(requests) => requests,
            Err(e) => return vec![e.into()],
        };
        let mut errors = Vec::new();
        for request in requests
            .iter()
            .filter(|r| !r.status.is_deleting() && r.status != InstanceRequestStatus::Failed)
        {
            if let Err(e) = self.handle(request, now).await {
                errors.push(e.context(&request.id));
            }
        }
        errors
    }

    async fn handle(&self, request: &InstanceRequest, now: u64) -> WorkerResult<()> {
        let config = &self.ctx.config;
        let grace_secs = config
            .billing_model(&request.instance_type, &request.desired_billing_model)
            .map(|b| b.grace_period_days.saturating_mul(SECS_PER_DAY))
            .unwrap_or(0);

        let lifespan = config
            .size(&request.instance_type, &request.size_id)
            .and_then(|s| s.lifespan_secs);
        let expires_at = match lifespan {
            Some(lifespan) => Some(request.created_at.saturating_add(lifespan)),
            None => {
                let active = self
                    .ctx
                    .bounded(
                        "is_entitlement_active",
                        self.ctx
                            .quota
                            .is_entitlement_active(&request.organization_id, &request.desired_billing_model),
                    )
                    .await?;
                if active {
                    None
                } else {
                    request.expires_at.or(Some(now.saturating_add(grace_secs)))
                }
            }
        };

        let mut request = request.clone();
        if expires_at != request.expires_at {
            let updated = self
                .ctx
                .store
                .update_request_if(&request.id, &[request.status], |r| r.expires_at = expires_at)?;
            let Some(updated) = updated else {
                return Ok(());
            };
            debug!(request_id = %request.id, ?expires_at, "expiration updated");
            request = updated;
        }

        if request.is_expired_at(now) {
            if self.ctx.store.transition_request(
                &request.id,
                &[request.status],
                InstanceRequestStatus::Deprovision,
            )? {
                info!(request_id = %request.id, "instance request expired, deprovisioning");
            }
            return Ok(());
        }

        let in_grace = grace_secs > 0
            && request
                .remaining_lifespan_secs(now)
                .is_some_and(|remaining| remaining <= grace_secs);
        if in_grace && request.status.can_be_automatically_suspended() && request.cluster_id.is_some() {
            if self.ctx.store.transition_request(
                &request.id,
                &[request.status],
                InstanceRequestStatus::Suspending,
            )? {
                info!(request_id = %request.id, grace_secs, "instance request in grace period, suspending");
            }
        }
        Ok(())
    }
}

impl Worker for ExpirationWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        EXPIRATION_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(self.reconcile_at(epoch_secs()))
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::FleetConfig;
    use fleet_state::StateStore;

    use super::*;

    fn ctx(inactive: &[&str]) -> FleetContext {
        let mut config = FleetConfig::default();
        config.quota.inactive_organizations = inactive.iter().map(|s| s.to_string()).collect();
        FleetContext::simulated(config, StateStore::open_in_memory().unwrap()).0
    }

    fn insert(ctx: &FleetContext, org: &str, instance_type: &str, status: InstanceRequestStatus) -> InstanceRequest {
        let mut r = InstanceRequest::new("k", "alice", org, "aws", "us-east-1", instance_type, "x1", 1);
        r.cluster_id = Some("c1".into());
        r.status = status;
        ctx.store.insert_request(&r).unwrap();
        r
    }

    fn stored(ctx: &FleetContext, id: &str) -> InstanceRequest {
        ctx.store.get_request(id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn lifespan_expiry_deprovisions() {
        let ctx = ctx(&[]);
        let r = insert(&ctx, "org-1", "developer", InstanceRequestStatus::Ready);
        let worker = ExpirationWorker::new(ctx.clone());
        let lifespan = 48 * 60 * 60;

        assert!(worker.reconcile_at(r.created_at + 10).await.is_empty());
        let s = stored(&ctx, &r.id);
        assert_eq!(s.expires_at, Some(r.created_at + lifespan));
        assert_eq!(s.status, InstanceRequestStatus::Ready);

        worker.reconcile_at(r.created_at + lifespan + 1).await;
        assert_eq!(stored(&ctx, &r.id).status, InstanceRequestStatus::Deprovision);
    }

    #[tokio::test]
    async fn lapsed_entitlement_suspends_then_deprovisions() {
        let ctx = ctx(&["org-lapsed"]);
        let r = insert(&ctx, "org-lapsed", "standard", InstanceRequestStatus::Ready);
        let worker = ExpirationWorker::new(ctx.clone());
        let now = r.created_at + 100;

        worker.reconcile_at(now).await;
        let s = stored(&ctx, &r.id);
        assert_eq!(s.expires_at, Some(now + 14 * SECS_PER_DAY));
        assert_eq!(s.status, InstanceRequestStatus::Suspending);

        worker.reconcile_at(now + 14 * SECS_PER_DAY + 1).await;
        assert_eq!(stored(&ctx, &r.id).status, InstanceRequestStatus::Deprovision);
    }

    #[tokio::test]
    async fn lapsed_entitlement_without_grace_deprovisions_in_one_pass() {
        let ctx = ctx(&["org-lapsed"]);
        let mut r = InstanceRequest::new("k", "alice", "org-lapsed", "aws", "us-east-1", "standard", "x1", 1);
        r.cluster_id = Some("c1".into());
        r.status = InstanceRequestStatus::Ready;
        r.desired_billing_model = "enterprise".into();
        ctx.store.insert_request(&r).unwrap();
        let worker = ExpirationWorker::new(ctx.clone());
        let now = r.created_at + 100;

        assert!(worker.reconcile_at(now).await.is_empty());
        let s = stored(&ctx, &r.id);
        assert_eq!(s.expires_at, Some(now));
        assert_eq!(s.status, InstanceRequestStatus::Deprovision);
    }

    #[tokio::test]
    async fn active_entitlement_never_expires() {
        let ctx = ctx(&[]);
        let r = insert(&ctx, "org-1", "standard", InstanceRequestStatus::Ready);
        let worker = ExpirationWorker::new(ctx.clone());
        assert!(worker.reconcile_at(r.created_at + 10 * SECS_PER_DAY).await.is_empty());
        let s = stored(&ctx, &r.id);
        assert_eq!(s.expires_at, None);
        assert_eq!(s.status, InstanceRequestStatus::Ready);
    }
}
