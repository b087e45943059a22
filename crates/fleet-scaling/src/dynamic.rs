//! Dynamic scaling: create and remove whole clusters.
//!
//! Scale-up looks at every configured `(provider, region, instance type)`
//! and registers a new cluster when the shape is short on capacity. Decision
//! and registration happen under the `dynamic-scale-up` distributed lock so
//! two passes cannot both register a cluster for the same shortage.
//!
//! Scale-down deprovisions empty clusters that have been idle for the
//! configured grace period, as long as removing them would not immediately
//! call for a new cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use fleet_core::FleetContext;
use fleet_core::config::{RegionInstanceTypeLimit, ScalingMode};
use fleet_state::{
    Cluster, ClusterId, ClusterStatus, ClusterType, DynamicCapacityInfo, ProviderType, epoch_secs, new_id,
};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::{debug, info};

use crate::summary::CapacitySummary;

pub const SCALE_UP_LOCK: &str = "dynamic-scale-up";

/// Worker types of the dynamic scaling workers.
pub const SCALE_UP_WORKER: &str = "dynamic_scale_up";
pub const SCALE_DOWN_WORKER: &str = "dynamic_scale_down";

/// A shortage found by a scale-up pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleUpAction {
    pub summary: CapacitySummary,
    /// The cluster registered for it. `None` in dry-run mode.
    pub cluster_id: Option<ClusterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDownReason {
    /// No region or instance type configuration covers the cluster.
    UnsupportedRegion,
    /// Empty past the idle grace period.
    Idle,
}

/// A cluster picked for removal by a scale-down pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDownAction {
    pub cluster_id: ClusterId,
    pub reason: ScaleDownReason,
    /// False in dry-run mode, or when the cluster gained a request meanwhile.
    pub applied: bool,
}

// ── Scale up ───────────────────────────────────────────────────────

pub struct DynamicScaleUpManager {
    id: String,
    ctx: FleetContext,
}

impl DynamicScaleUpManager {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{SCALE_UP_WORKER}-{}", new_id()),
            ctx,
        }
    }

    /// Evaluate every configured shape and register clusters where short.
    /// Blocks on the distributed lock; run it off the async executor.
    pub fn scale_up_pass(&self) -> WorkerResult<Vec<ScaleUpAction>> {
        self.ctx
            .store
            .with_lock(SCALE_UP_LOCK, || self.scale_up_locked())?
    }

    fn scale_up_locked(&self) -> WorkerResult<Vec<ScaleUpAction>> {
        let config = &self.ctx.config;
        let clusters = self.ctx.store.list_clusters()?;
        let usage = self.ctx.store.streaming_units_by_cluster()?;
        let mut actions = Vec::new();

        for region in &config.dataplane.dynamic.regions {
            for (instance_type, limit) in &region.instance_types {
                let biggest = config
                    .biggest_size(instance_type)
                    .map(|s| s.capacity_consumed)
                    .unwrap_or(1);
                let summary = CapacitySummary::compute(
                    &clusters,
                    &usage,
                    &region.cloud_provider,
                    &region.region,
                    instance_type,
                    biggest,
                );
                if !summary.scale_up_needed(limit) {
                    debug!(
                        cloud_provider = %summary.cloud_provider,
                        region = %summary.region,
                        instance_type = %summary.instance_type,
                        free_units = summary.free_units,
                        ongoing = summary.ongoing_scale_up,
                        "no scale-up needed"
                    );
                    continue;
                }

                if !config.dataplane.dynamic.enable_scale_up {
                    info!(
                        cloud_provider = %summary.cloud_provider,
                        region = %summary.region,
                        instance_type = %summary.instance_type,
                        free_units = summary.free_units,
                        "dry run: would create a cluster"
                    );
                    actions.push(ScaleUpAction {
                        summary,
                        cluster_id: None,
                    });
                    continue;
                }

                let cluster = new_cluster(&summary, limit);
                self.ctx.store.insert_cluster_if_absent(&cluster)?;
                info!(
                    cluster_id = %cluster.cluster_id,
                    cloud_provider = %summary.cloud_provider,
                    region = %summary.region,
                    instance_type = %summary.instance_type,
                    free_units = summary.free_units,
                    biggest_size_fits = summary.biggest_size_fits,
                    "cluster registered for scale-up"
                );
                actions.push(ScaleUpAction {
                    summary,
                    cluster_id: Some(cluster.cluster_id),
                });
            }
        }
        Ok(actions)
    }
}

/// A fresh shared-pool cluster dedicated to one instance type.
fn new_cluster(summary: &CapacitySummary, limit: &RegionInstanceTypeLimit) -> Cluster {
    let multi_az = summary.instance_type == "standard";
    let mut cluster = Cluster::new(&new_id(), &summary.cloud_provider, &summary.region, multi_az);
    cluster.provider_type = ProviderType::Ocm;
    cluster.cluster_type = ClusterType::Managed;
    cluster.supported_instance_types = vec![summary.instance_type.clone()];
    cluster.dynamic_capacity_info = BTreeMap::from([(
        summary.instance_type.clone(),
        DynamicCapacityInfo {
            max_nodes: limit.max_nodes,
            ..DynamicCapacityInfo::default()
        },
    )]);
    cluster
}

impl Worker for DynamicScaleUpManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        SCALE_UP_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(async move {
            if self.ctx.config.dataplane.scaling_mode != ScalingMode::Dynamic {
                return Vec::new();
            }
            let manager = Self {
                id: self.id.clone(),
                ctx: self.ctx.clone(),
            };
            match tokio::task::spawn_blocking(move || manager.scale_up_pass()).await {
                Ok(Ok(_)) => Vec::new(),
                Ok(Err(e)) => vec![e],
                Err(e) => vec![WorkerError::Transient(anyhow::anyhow!("scale-up pass did not complete: {e}"))],
            }
        })
    }
}

// ── Scale down ─────────────────────────────────────────────────────

pub struct DynamicScaleDownManager {
    id: String,
    ctx: FleetContext,
    /// When each empty cluster was first seen empty.
    empty_since: Mutex<HashMap<ClusterId, u64>>,
}

impl DynamicScaleDownManager {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{SCALE_DOWN_WORKER}-{}", new_id()),
            ctx,
            empty_since: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every empty ready cluster at time `now` (epoch seconds).
    pub fn scale_down_pass(&self, now: u64) -> WorkerResult<Vec<ScaleDownAction>> {
        let config = &self.ctx.config;
        let dynamic = &config.dataplane.dynamic;
        let clusters: Vec<Cluster> = self
            .ctx
            .store
            .list_clusters()?
            .into_iter()
            .filter(|c| c.cluster_type == ClusterType::Managed && c.provider_type == ProviderType::Ocm)
            .collect();
        let occupied: HashSet<ClusterId> = self
            .ctx
            .store
            .list_requests()?
            .into_iter()
            .filter_map(|r| r.cluster_id)
            .collect();
        let usage = self.ctx.store.streaming_units_by_cluster()?;

        let mut empty_since = match self.empty_since.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        empty_since.retain(|id, _| clusters.iter().any(|c| &c.cluster_id == id) && !occupied.contains(id));

        let mut removed: HashSet<ClusterId> = HashSet::new();
        let mut actions = Vec::new();

        for cluster in clusters.iter().filter(|c| c.status == ClusterStatus::Ready && c.schedulable) {
            if occupied.contains(&cluster.cluster_id) {
                continue;
            }
            let since = *empty_since.entry(cluster.cluster_id.clone()).or_insert(now);

            let region = config.region(&cluster.cloud_provider, &cluster.region);
            let limits: Vec<(&String, &RegionInstanceTypeLimit)> = region
                .map(|r| {
                    r.instance_types
                        .iter()
                        .filter(|(t, _)| cluster.supports_instance_type(t))
                        .collect()
                })
                .unwrap_or_default();

            let reason = if limits.is_empty() {
                ScaleDownReason::UnsupportedRegion
            } else {
                if now.saturating_sub(since) < dynamic.idle_grace_secs {
                    debug!(cluster_id = %cluster.cluster_id, idle_secs = now.saturating_sub(since), "empty cluster within grace period");
                    continue;
                }
                let pool = clusters
                    .iter()
                    .filter(|c| {
                        c.status == ClusterStatus::Ready
                            && c.cloud_provider == cluster.cloud_provider
                            && c.region == cluster.region
                            && !removed.contains(&c.cluster_id)
                    })
                    .count();
                if pool <= dynamic.min_pool_size {
                    debug!(cluster_id = %cluster.cluster_id, pool, "region at minimum pool size");
                    continue;
                }
                let remaining: Vec<&Cluster> = clusters
                    .iter()
                    .filter(|c| {
                        c.cluster_id != cluster.cluster_id
                            && !removed.contains(&c.cluster_id)
                            && !c.status.is_on_way_to_ready()
                    })
                    .collect();
                let needed_after = limits.iter().any(|(instance_type, limit)| {
                    let biggest = config
                        .biggest_size(instance_type)
                        .map(|s| s.capacity_consumed)
                        .unwrap_or(1);
                    CapacitySummary::compute(
                        remaining.iter().copied(),
                        &usage,
                        &cluster.cloud_provider,
                        &cluster.region,
                        instance_type,
                        biggest,
                    )
                    .is_short(limit)
                });
                if needed_after {
                    debug!(cluster_id = %cluster.cluster_id, "removal would trigger a scale-up, keeping cluster");
                    continue;
                }
                ScaleDownReason::Idle
            };

            if !dynamic.enable_scale_down {
                info!(cluster_id = %cluster.cluster_id, ?reason, "dry run: would deprovision cluster");
                actions.push(ScaleDownAction {
                    cluster_id: cluster.cluster_id.clone(),
                    reason,
                    applied: false,
                });
                continue;
            }

            let applied = self.ctx.store.transition_cluster_if_empty(
                &cluster.cluster_id,
                &[ClusterStatus::Ready],
                ClusterStatus::Deprovisioning,
            )?;
            if applied {
                info!(cluster_id = %cluster.cluster_id, ?reason, "cluster scaled down");
                removed.insert(cluster.cluster_id.clone());
                empty_since.remove(&cluster.cluster_id);
            }
            actions.push(ScaleDownAction {
                cluster_id: cluster.cluster_id.clone(),
                reason,
                applied,
            });
        }
        Ok(actions)
    }
}

impl Worker for DynamicScaleDownManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        SCALE_DOWN_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(async move {
            if self.ctx.config.dataplane.scaling_mode != ScalingMode::Dynamic {
                return Vec::new();
            }
            match self.scale_down_pass(epoch_secs()) {
                Ok(_) => Vec::new(),
                Err(e) => vec![e],
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::FleetConfig;
    use fleet_core::config::RegionConfig;
    use fleet_state::{InstanceRequest, StateStore};

    use super::*;

    fn region_config(slack: u32, limit: Option<u32>) -> RegionConfig {
        RegionConfig {
            cloud_provider: "aws".into(),
            region: "us-east-1".into(),
            instance_types: BTreeMap::from([(
                "standard".to_string(),
                RegionInstanceTypeLimit {
                    limit,
                    min_available_capacity_slack: slack,
                    max_nodes: 18,
                },
            )]),
        }
    }

    fn ctx(configure: impl FnOnce(&mut FleetConfig)) -> FleetContext {
        let mut config = FleetConfig::default();
        config.dataplane.scaling_mode = ScalingMode::Dynamic;
        config.dataplane.dynamic.regions = vec![region_config(0, None)];
        configure(&mut config);
        FleetContext::simulated(config, StateStore::open_in_memory().unwrap()).0
    }

    fn ready_cluster(ctx: &FleetContext, id: &str, max: u32) {
        let mut c = Cluster::new(id, "aws", "us-east-1", true);
        c.status = ClusterStatus::Ready;
        c.supported_instance_types = vec!["standard".into()];
        c.dynamic_capacity_info = BTreeMap::from([(
            "standard".to_string(),
            DynamicCapacityInfo {
                max_nodes: 18,
                max_units: max,
                remaining_units: max,
            },
        )]);
        ctx.store.put_cluster(&c).unwrap();
    }

    fn place(ctx: &FleetContext, cluster_id: &str, units: u32) {
        let mut r = InstanceRequest::new("k", "alice", "org-1", "aws", "us-east-1", "standard", "x1", units);
        r.cluster_id = Some(cluster_id.to_string());
        ctx.store.insert_request(&r).unwrap();
    }

    #[test]
    fn empty_region_gets_a_cluster_once() {
        let ctx = ctx(|_| {});
        let manager = DynamicScaleUpManager::new(ctx.clone());

        let actions = manager.scale_up_pass().unwrap();
        assert_eq!(actions.len(), 1);
        let id = actions[0].cluster_id.clone().unwrap();
        let cluster = ctx.store.get_cluster(&id).unwrap().unwrap();
        assert_eq!(cluster.status, ClusterStatus::Accepted);
        assert!(cluster.multi_az);
        assert_eq!(cluster.supported_instance_types, vec!["standard".to_string()]);
        assert_eq!(cluster.dynamic_capacity_info["standard"].max_nodes, 18);

        // The new cluster is on its way to ready: no second registration.
        assert!(manager.scale_up_pass().unwrap().is_empty());
        assert_eq!(ctx.store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn full_cluster_triggers_scale_up() {
        let ctx = ctx(|_| {});
        ready_cluster(&ctx, "c1", 2);
        place(&ctx, "c1", 2);
        let manager = DynamicScaleUpManager::new(ctx.clone());
        assert_eq!(manager.scale_up_pass().unwrap().len(), 1);
    }

    #[test]
    fn enough_capacity_means_no_scale_up() {
        let ctx = ctx(|_| {});
        ready_cluster(&ctx, "c1", 10);
        place(&ctx, "c1", 2);
        let manager = DynamicScaleUpManager::new(ctx.clone());
        assert!(manager.scale_up_pass().unwrap().is_empty());
    }

    #[test]
    fn region_limit_blocks_scale_up() {
        let ctx = ctx(|c| c.dataplane.dynamic.regions = vec![region_config(0, Some(2))]);
        ready_cluster(&ctx, "c1", 2);
        place(&ctx, "c1", 2);
        let manager = DynamicScaleUpManager::new(ctx.clone());
        assert!(manager.scale_up_pass().unwrap().is_empty());
    }

    #[test]
    fn scale_up_dry_run_registers_nothing() {
        let ctx = ctx(|c| c.dataplane.dynamic.enable_scale_up = false);
        let manager = DynamicScaleUpManager::new(ctx.clone());
        let actions = manager.scale_up_pass().unwrap();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].cluster_id.is_none());
        assert!(ctx.store.list_clusters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scale_up_worker_skips_other_modes() {
        let ctx = ctx(|c| c.dataplane.scaling_mode = ScalingMode::Manual);
        let manager = DynamicScaleUpManager::new(ctx.clone());
        assert!(manager.reconcile().await.is_empty());
        assert!(ctx.store.list_clusters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scale_up_worker_runs_the_pass() {
        let ctx = ctx(|_| {});
        let manager = DynamicScaleUpManager::new(ctx.clone());
        assert!(manager.reconcile().await.is_empty());
        assert_eq!(ctx.store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn idle_cluster_removed_after_grace() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.idle_grace_secs = 600;
            c.dataplane.dynamic.min_pool_size = 1;
        });
        ready_cluster(&ctx, "busy", 10);
        place(&ctx, "busy", 1);
        ready_cluster(&ctx, "idle", 10);
        let manager = DynamicScaleDownManager::new(ctx.clone());

        assert!(manager.scale_down_pass(1_000).unwrap().is_empty());
        assert!(manager.scale_down_pass(1_599).unwrap().is_empty());

        let actions = manager.scale_down_pass(1_600).unwrap();
        assert_eq!(
            actions,
            vec![ScaleDownAction {
                cluster_id: "idle".into(),
                reason: ScaleDownReason::Idle,
                applied: true,
            }]
        );
        let idle = ctx.store.get_cluster("idle").unwrap().unwrap();
        assert_eq!(idle.status, ClusterStatus::Deprovisioning);
    }

    #[test]
    fn minimum_pool_is_kept() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.idle_grace_secs = 0;
            c.dataplane.dynamic.min_pool_size = 1;
        });
        ready_cluster(&ctx, "only", 10);
        let manager = DynamicScaleDownManager::new(ctx.clone());
        assert!(manager.scale_down_pass(1_000).unwrap().is_empty());
    }

    #[test]
    fn keeps_a_cluster_whose_removal_would_trigger_scale_up() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.idle_grace_secs = 0;
            c.dataplane.dynamic.min_pool_size = 0;
            c.dataplane.dynamic.regions = vec![region_config(5, None)];
        });
        ready_cluster(&ctx, "busy", 4);
        place(&ctx, "busy", 2);
        ready_cluster(&ctx, "spare", 10);
        let manager = DynamicScaleDownManager::new(ctx.clone());
        assert!(manager.scale_down_pass(1_000).unwrap().is_empty());
    }

    #[test]
    fn unsupported_region_is_removed_without_grace() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.idle_grace_secs = 3600;
            c.dataplane.dynamic.regions = vec![];
        });
        ready_cluster(&ctx, "stray", 10);
        let manager = DynamicScaleDownManager::new(ctx.clone());
        let actions = manager.scale_down_pass(1_000).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].reason, ScaleDownReason::UnsupportedRegion);
        assert!(actions[0].applied);
    }

    #[test]
    fn unschedulable_cluster_is_never_removed() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.idle_grace_secs = 0;
            c.dataplane.dynamic.regions = vec![];
        });
        ready_cluster(&ctx, "pinned", 10);
        ctx.store
            .update_cluster_if("pinned", &[], |c| c.schedulable = false)
            .unwrap();
        let manager = DynamicScaleDownManager::new(ctx.clone());
        assert!(manager.scale_down_pass(1_000).unwrap().is_empty());
        let pinned = ctx.store.get_cluster("pinned").unwrap().unwrap();
        assert_eq!(pinned.status, ClusterStatus::Ready);
    }

    #[test]
    fn region_with_only_a_scaling_up_cluster_gets_a_new_one() {
        let ctx = ctx(|_| {});
        ready_cluster(&ctx, "growing", 10);
        ctx.store
            .update_cluster_if("growing", &[], |c| c.status = ClusterStatus::ComputeNodeScalingUp)
            .unwrap();
        let manager = DynamicScaleUpManager::new(ctx.clone());
        let actions = manager.scale_up_pass().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(ctx.store.list_clusters().unwrap().len(), 2);
    }

    #[test]
    fn scale_down_dry_run_leaves_cluster_ready() {
        let ctx = ctx(|c| {
            c.dataplane.dynamic.enable_scale_down = false;
            c.dataplane.dynamic.regions = vec![];
        });
        ready_cluster(&ctx, "stray", 10);
        let manager = DynamicScaleDownManager::new(ctx.clone());
        let actions = manager.scale_down_pass(1_000).unwrap();
        assert!(!actions[0].applied);
        let stray = ctx.store.get_cluster("stray").unwrap().unwrap();
        assert_eq!(stray.status, ClusterStatus::Ready);
    }
}
