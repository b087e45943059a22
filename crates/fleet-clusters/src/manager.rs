//! Cluster manager: drives clusters from `accepted` to `ready` and from
//! `deprovisioning` to `cleanup`.
//!
//! Each pass handles every cluster of a status with the step for that
//! status. A failing cluster does not stop the pass: its error is collected
//! and the remaining clusters are still handled.

use fleet_core::FleetContext;
use fleet_core::config::ScalingMode;
use fleet_core::provider::ProvisionState;
use fleet_state::{Cluster, ClusterStatus, ClusterType, ProviderType, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::{debug, info, warn};

use crate::manual::reconcile_manual_clusters;

pub const CLUSTER_WORKER: &str = "cluster";

pub struct ClusterManager {
    id: String,
    ctx: FleetContext,
}

impl ClusterManager {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{CLUSTER_WORKER}-{}", new_id()),
            ctx,
        }
    }

    /// One full pass over every cluster status this worker owns.
    pub async fn reconcile_all(&self) -> Vec<WorkerError> {
        if let Err(e) = self.ctx.config.validate_addons() {
            return vec![e.into()];
        }

        let mut errors = Vec::new();
        if self.ctx.config.dataplane.scaling_mode == ScalingMode::Manual
            && let Err(e) = reconcile_manual_clusters(&self.ctx)
        {
            if e.is_fatal() {
                return vec![e];
            }
            errors.push(e);
        }

        for status in [
            ClusterStatus::Accepted,
            ClusterStatus::Provisioning,
            ClusterStatus::Provisioned,
            ClusterStatus::Ready,
            ClusterStatus::Deprovisioning,
        ] {
            let clusters = match self.ctx.store.list_clusters_by_status(&[status]) {
                Ok(clusters) => clusters,
                Err(e) => {
                    errors.push(e.into());
                    continue;
                }
            };
            for cluster in clusters {
                let result = match status {
                    ClusterStatus::Accepted => self.reconcile_accepted(&cluster).await,
                    ClusterStatus::Provisioning => self.reconcile_provisioning(&cluster).await,
                    ClusterStatus::Provisioned => self.reconcile_provisioned(&cluster).await,
                    ClusterStatus::Ready => self.reconcile_ready(&cluster),
                    _ => self.reconcile_deprovisioning(&cluster).await,
                };
                if let Err(e) = result {
                    warn!(cluster_id = %cluster.cluster_id, %status, error = %e, "cluster reconcile failed");
                    errors.push(e.context(&cluster.cluster_id));
                }
            }
        }
        errors
    }

    async fn reconcile_accepted(&self, cluster: &Cluster) -> WorkerResult<()> {
        let id = &cluster.cluster_id;
        if cluster.provider_type == ProviderType::Standalone || cluster.cluster_type == ClusterType::Enterprise {
            if self
                .ctx
                .store
                .transition_cluster(id, &[ClusterStatus::Accepted], ClusterStatus::Provisioned)?
            {
                info!(cluster_id = %id, "cluster brought by its owner, skipping creation");
            }
            return Ok(());
        }

        let external_id = self
            .ctx
            .bounded("create", self.ctx.provider.create(cluster))
            .await?;
        let updated = self
            .ctx
            .store
            .update_cluster_if(id, &[ClusterStatus::Accepted], |c| {
                c.external_id = Some(external_id.clone());
                c.status = ClusterStatus::Provisioning;
            })?;
        if updated.is_some() {
            info!(cluster_id = %id, %external_id, "cluster creation requested");
        }
        Ok(())
    }

    async fn reconcile_provisioning(&self, cluster: &Cluster) -> WorkerResult<()> {
        let id = &cluster.cluster_id;
        let state = self
            .ctx
            .bounded("provision_state", self.ctx.provider.provision_state(cluster))
            .await?;
        match state {
            ProvisionState::Pending => {
                debug!(cluster_id = %id, "cluster still provisioning");
            }
            ProvisionState::Ready => {
                if self
                    .ctx
                    .store
                    .transition_cluster(id, &[ClusterStatus::Provisioning], ClusterStatus::Provisioned)?
                {
                    info!(cluster_id = %id, "cluster provisioned");
                }
            }
            ProvisionState::Failed(details) => {
                warn!(cluster_id = %id, %details, "cluster provisioning failed");
                self.ctx
                    .store
                    .update_cluster_if(id, &[ClusterStatus::Provisioning], |c| {
                        c.status = ClusterStatus::Failed;
                        c.status_details = Some(details);
                    })?;
            }
        }
        Ok(())
    }

    async fn reconcile_provisioned(&self, cluster: &Cluster) -> WorkerResult<()> {
        let id = &cluster.cluster_id;
        let addons = &self.ctx.config.dataplane.addons;
        let ready = self
            .ctx
            .bounded("install_addons", self.ctx.provider.install_addons(cluster, addons))
            .await?;
        if !ready {
            debug!(cluster_id = %id, addons = ?addons.ids(), "waiting for add-ons");
            return Ok(());
        }

        let dns = self
            .ctx
            .bounded("cluster_dns", self.ctx.provider.cluster_dns(cluster))
            .await?;
        let updated = self
            .ctx
            .store
            .update_cluster_if(id, &[ClusterStatus::Provisioned], |c| {
                c.cluster_dns = Some(dns.clone());
                c.status = ClusterStatus::WaitingForKasFleetshardOperator;
            })?;
        if updated.is_some() {
            info!(cluster_id = %id, cluster_dns = %dns, "add-ons ready, waiting for the agent");
        }
        Ok(())
    }

    /// Keep `max_nodes` of every supported instance type in line with the
    /// region configuration.
    fn reconcile_ready(&self, cluster: &Cluster) -> WorkerResult<()> {
        let Some(region) = self.ctx.config.region(&cluster.cloud_provider, &cluster.region) else {
            return Ok(());
        };
        let max_nodes: Vec<(String, u32)> = cluster
            .supported_instance_types
            .iter()
            .filter_map(|t| region.instance_type(t).map(|limit| (t.clone(), limit.max_nodes)))
            .filter(|(t, max)| cluster.dynamic_capacity_info.get(t).map(|c| c.max_nodes) != Some(*max))
            .collect();
        if max_nodes.is_empty() {
            return Ok(());
        }
        // Merge into the stored map so units reported meanwhile survive.
        self.ctx
            .store
            .update_cluster_if(&cluster.cluster_id, &[ClusterStatus::Ready], |c| {
                for (instance_type, max) in max_nodes {
                    c.dynamic_capacity_info.entry(instance_type).or_default().max_nodes = max;
                }
            })?;
        debug!(cluster_id = %cluster.cluster_id, "dynamic capacity info updated");
        Ok(())
    }

    async fn reconcile_deprovisioning(&self, cluster: &Cluster) -> WorkerResult<()> {
        let id = &cluster.cluster_id;
        let gone = if cluster.provider_type == ProviderType::Standalone {
            true
        } else {
            self.ctx
                .bounded("delete", self.ctx.provider.delete(cluster))
                .await?
        };
        if !gone {
            debug!(cluster_id = %id, "waiting for cluster removal");
            return Ok(());
        }
        if self
            .ctx
            .store
            .transition_cluster(id, &[ClusterStatus::Deprovisioning], ClusterStatus::Cleanup)?
        {
            info!(cluster_id = %id, "cluster removed, cleaning up");
        }
        Ok(())
    }
}

impl Worker for ClusterManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        CLUSTER_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(self.reconcile_all())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use fleet_core::config::{RegionConfig, RegionInstanceTypeLimit};
    use fleet_core::{FleetConfig, InMemoryProvider};
    use fleet_state::{DynamicCapacityInfo, StateStore};

    use super::*;

    fn setup(configure: impl FnOnce(&mut FleetConfig)) -> (ClusterManager, Arc<InMemoryProvider>) {
        let mut config = FleetConfig::default();
        config.dataplane.scaling_mode = ScalingMode::Dynamic;
        configure(&mut config);
        let (ctx, provider) = FleetContext::simulated_with(
            config,
            StateStore::open_in_memory().unwrap(),
            InMemoryProvider::new().with_provision_polls(1),
        );
        (ClusterManager::new(ctx), provider)
    }

    fn status(manager: &ClusterManager, id: &str) -> ClusterStatus {
        manager.ctx.store.get_cluster(id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn accepted_cluster_walks_to_waiting_for_the_agent() {
        let (manager, provider) = setup(|_| {});
        manager
            .ctx
            .store
            .put_cluster(&Cluster::new("c1", "aws", "us-east-1", true))
            .unwrap();

        // Created, then polled once in the same pass: still pending.
        assert!(manager.reconcile_all().await.is_empty());
        assert_eq!(status(&manager, "c1"), ClusterStatus::Provisioning);
        assert_eq!(provider.created().len(), 1);

        // Provisioned; the first add-on check is not ready yet.
        assert!(manager.reconcile_all().await.is_empty());
        assert_eq!(status(&manager, "c1"), ClusterStatus::Provisioned);

        assert!(manager.reconcile_all().await.is_empty());
        let cluster = manager.ctx.store.get_cluster("c1").unwrap().unwrap();
        assert_eq!(cluster.status, ClusterStatus::WaitingForKasFleetshardOperator);
        assert!(cluster.cluster_dns.is_some());
        assert!(cluster.external_id.is_some());
    }

    #[tokio::test]
    async fn enterprise_clusters_skip_creation() {
        let (manager, provider) = setup(|_| {});
        let mut cluster = Cluster::new("ent", "aws", "us-east-1", true);
        cluster.cluster_type = ClusterType::Enterprise;
        manager.ctx.store.put_cluster(&cluster).unwrap();

        manager.reconcile_all().await;
        assert!(provider.created().is_empty());
        assert_ne!(status(&manager, "ent"), ClusterStatus::Accepted);
    }

    #[tokio::test]
    async fn provider_outage_is_reported_and_retried() {
        let (manager, provider) = setup(|_| {});
        manager
            .ctx
            .store
            .put_cluster(&Cluster::new("c1", "aws", "us-east-1", true))
            .unwrap();
        provider.set_unavailable(true);

        let errors = manager.reconcile_all().await;
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_fatal());
        assert_eq!(status(&manager, "c1"), ClusterStatus::Accepted);

        provider.set_unavailable(false);
        assert!(manager.reconcile_all().await.is_empty());
        assert_eq!(status(&manager, "c1"), ClusterStatus::Provisioning);
    }

    #[tokio::test]
    async fn missing_addon_is_fatal() {
        let (manager, _) = setup(|c| c.dataplane.addons.fleetshard = String::new());
        let errors = manager.reconcile_all().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_fatal());
    }

    #[tokio::test]
    async fn ready_clusters_get_max_nodes_from_region() {
        let (manager, _) = setup(|c| {
            c.dataplane.dynamic.regions = vec![RegionConfig {
                cloud_provider: "aws".into(),
                region: "us-east-1".into(),
                instance_types: BTreeMap::from([(
                    "standard".to_string(),
                    RegionInstanceTypeLimit {
                        limit: None,
                        min_available_capacity_slack: 0,
                        max_nodes: 30,
                    },
                )]),
            }];
        });
        let mut cluster = Cluster::new("c1", "aws", "us-east-1", true);
        cluster.status = ClusterStatus::Ready;
        manager.ctx.store.put_cluster(&cluster).unwrap();

        manager.reconcile_all().await;
        let cluster = manager.ctx.store.get_cluster("c1").unwrap().unwrap();
        assert_eq!(cluster.dynamic_capacity_info["standard"].max_nodes, 30);
        assert!(!cluster.dynamic_capacity_info.contains_key("developer"));
    }

    #[test]
    fn max_nodes_update_keeps_units_reported_meanwhile() {
        let (manager, _) = setup(|c| {
            c.dataplane.dynamic.regions = vec![RegionConfig {
                cloud_provider: "aws".into(),
                region: "us-east-1".into(),
                instance_types: BTreeMap::from([(
                    "standard".to_string(),
                    RegionInstanceTypeLimit {
                        limit: None,
                        min_available_capacity_slack: 0,
                        max_nodes: 30,
                    },
                )]),
            }];
        });
        let mut cluster = Cluster::new("c1", "aws", "us-east-1", true);
        cluster.status = ClusterStatus::Ready;
        manager.ctx.store.put_cluster(&cluster).unwrap();
        let snapshot = manager.ctx.store.get_cluster("c1").unwrap().unwrap();

        // An agent report lands between the read and the write.
        manager
            .ctx
            .store
            .update_cluster_if("c1", &[], |c| {
                c.dynamic_capacity_info.insert(
                    "standard".to_string(),
                    DynamicCapacityInfo {
                        max_nodes: 18,
                        max_units: 10,
                        remaining_units: 6,
                    },
                );
            })
            .unwrap();

        manager.reconcile_ready(&snapshot).unwrap();
        let stored = manager.ctx.store.get_cluster("c1").unwrap().unwrap();
        let standard = &stored.dynamic_capacity_info["standard"];
        assert_eq!(standard.max_nodes, 30);
        assert_eq!(standard.max_units, 10);
        assert_eq!(standard.remaining_units, 6);
    }

    #[tokio::test]
    async fn deprovisioning_waits_for_the_provider() {
        let (manager, provider) = setup(|_| {});
        let mut cluster = Cluster::new("c1", "aws", "us-east-1", true);
        cluster.status = ClusterStatus::Deprovisioning;
        manager.ctx.store.put_cluster(&cluster).unwrap();

        manager.reconcile_all().await;
        assert_eq!(status(&manager, "c1"), ClusterStatus::Deprovisioning);
        manager.reconcile_all().await;
        assert_eq!(status(&manager, "c1"), ClusterStatus::Cleanup);
        assert_eq!(provider.deleted(), vec!["c1".to_string()]);
    }
}
