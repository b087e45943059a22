use fleet_core::FleetContext;
use fleet_placement::{PlacementError, place_instance_request};
use fleet_state::{InstanceRequest, InstanceRequestStatus, epoch_secs, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::{debug, info};

use super::{ACCEPTED_WORKER, fail_request};
use crate::versions::latest_ready;

/// Places accepted requests and pins their versions, then hands them to
/// `preparing`. Shortages are retried until the request is older than
/// `accepted_max_retry_secs`.
pub struct AcceptedWorker {
    id: String,
    ctx: FleetContext,
}

impl AcceptedWorker {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{ACCEPTED_WORKER}-{}", new_id()),
            ctx,
        }
    }

    pub fn reconcile_at(&self, now: u64) -> Vec<WorkerError> {
        let requests = match self
            .ctx
            .store
            .list_requests_by_status(&[InstanceRequestStatus::Accepted])
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
        let expired = now.saturating_sub(request.created_at) >= self.ctx.config.instances.accepted_max_retry_secs;

        let cluster_id = match request.cluster_id.clone() {
            Some(cluster_id) => cluster_id,
            None => match place_instance_request(&self.ctx, &request.id) {
                Ok(cluster_id) => cluster_id,
                Err(e) if e.is_capacity() => {
                    if expired {
                        let reason = format!(
                            "region {} cannot accept instance type {} at this moment",
                            request.region, request.instance_type
                        );
                        fail_request(&self.ctx, request, reason)?;
                    } else {
                        debug!(request_id = %request.id, error = %e, "no capacity yet, retrying");
                    }
                    return Ok(());
                }
                Err(PlacementError::State(e)) => return Err(e.into()),
                Err(PlacementError::RequestNotFound(_)) => return Ok(()),
                Err(e) => {
                    fail_request(&self.ctx, request, e.to_string())?;
                    return Ok(());
                }
            },
        };

        let versions = self
            .ctx
            .store
            .get_cluster(&cluster_id)?
            .filter(|c| !c.is_deleted())
            .and_then(|c| latest_ready(&c.strimzi_versions));
        let Some(versions) = versions else {
            if expired {
                let reason = format!("no ready strimzi version on cluster {cluster_id}");
                fail_request(&self.ctx, request, reason)?;
            } else {
                debug!(request_id = %request.id, %cluster_id, "waiting for a ready strimzi version");
            }
            return Ok(());
        };

        let updated = self
            .ctx
            .store
            .update_request_if(&request.id, &[InstanceRequestStatus::Accepted], |r| {
                r.desired_strimzi_version = Some(versions.strimzi.clone());
                r.desired_kafka_version = Some(versions.kafka.clone());
                r.desired_kafka_ibp_version = Some(versions.kafka_ibp.clone());
                r.status = InstanceRequestStatus::Preparing;
            })?;
        if updated.is_some() {
            info!(
                request_id = %request.id,
                %cluster_id,
                strimzi = %versions.strimzi,
                kafka = %versions.kafka,
                "instance request preparing"
            );
        }
        Ok(())
    }
}

impl Worker for AcceptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        ACCEPTED_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(async move { self.reconcile_at(epoch_secs()) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use fleet_core::FleetConfig;
    use fleet_core::config::ScalingMode;
    use fleet_state::{Cluster, ClusterStatus, DynamicCapacityInfo, StateStore, StrimziVersion};

    use super::*;

    fn ctx() -> FleetContext {
        let mut config = FleetConfig::default();
        config.dataplane.scaling_mode = ScalingMode::Auto;
        FleetContext::simulated(config, StateStore::open_in_memory().unwrap()).0
    }

    fn ready_cluster(ctx: &FleetContext, with_versions: bool) {
        let mut c = Cluster::new("c1", "aws", "us-east-1", true);
        c.status = ClusterStatus::Ready;
        c.dynamic_capacity_info = BTreeMap::from([(
            "standard".to_string(),
            DynamicCapacityInfo {
                max_nodes: 18,
                max_units: 5,
                remaining_units: 5,
            },
        )]);
        if with_versions {
            c.strimzi_versions = vec![StrimziVersion {
                version: "strimzi-cluster-operator.v0.23.0-0".into(),
                ready: true,
                kafka_versions: vec!["2.8.0".into()],
                kafka_ibp_versions: vec!["2.8".into()],
            }];
        }
        ctx.store.put_cluster(&c).unwrap();
    }

    fn accepted(ctx: &FleetContext) -> InstanceRequest {
        let r = InstanceRequest::new("k", "alice", "org-1", "aws", "us-east-1", "standard", "x1", 1);
        ctx.store.insert_request(&r).unwrap();
        r
    }

    #[test]
    fn places_pins_versions_and_prepares() {
        let ctx = ctx();
        ready_cluster(&ctx, true);
        let r = accepted(&ctx);
        let worker = AcceptedWorker::new(ctx.clone());

        assert!(worker.reconcile_at(epoch_secs()).is_empty());
        let stored = ctx.store.get_request(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceRequestStatus::Preparing);
        assert_eq!(stored.cluster_id.as_deref(), Some("c1"));
        assert_eq!(stored.desired_kafka_version.as_deref(), Some("2.8.0"));
        assert_eq!(stored.desired_kafka_ibp_version.as_deref(), Some("2.8"));
    }

    #[test]
    fn no_capacity_retries_then_fails() {
        let ctx = ctx();
        let r = accepted(&ctx);
        let worker = AcceptedWorker::new(ctx.clone());

        worker.reconcile_at(r.created_at + 10);
        assert_eq!(
            ctx.store.get_request(&r.id).unwrap().unwrap().status,
            InstanceRequestStatus::Accepted
        );

        worker.reconcile_at(r.created_at + ctx.config.instances.accepted_max_retry_secs);
        let stored = ctx.store.get_request(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceRequestStatus::Failed);
        assert!(stored.failed_reason.unwrap().contains("us-east-1"));
    }

    #[test]
    fn waits_for_strimzi_versions() {
        let ctx = ctx();
        ready_cluster(&ctx, false);
        let r = accepted(&ctx);
        let worker = AcceptedWorker::new(ctx.clone());

        worker.reconcile_at(r.created_at + 10);
        let stored = ctx.store.get_request(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceRequestStatus::Accepted);
        assert_eq!(stored.cluster_id.as_deref(), Some("c1"));

        worker.reconcile_at(r.created_at + ctx.config.instances.accepted_max_retry_secs);
        let stored = ctx.store.get_request(&r.id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceRequestStatus::Failed);
    }
}
