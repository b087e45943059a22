//! Manual cluster list reconciliation.
//!
//! In manual scaling mode the configured list is the source of truth: listed
//! clusters are registered if missing and kept in sync, unlisted clusters are
//! removed once nothing is placed on them.

use fleet_core::FleetContext;
use fleet_core::config::ManualCluster;
use fleet_state::{Cluster, ClusterStatus};
use fleet_workers::WorkerResult;
use tracing::{debug, info};

/// Outcome of one pass over the manual list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManualSync {
    pub registered: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

pub fn reconcile_manual_clusters(ctx: &FleetContext) -> WorkerResult<ManualSync> {
    ctx.config.validate_manual_clusters()?;
    let mut sync = ManualSync::default();

    for entry in &ctx.config.dataplane.manual_clusters {
        let cluster = cluster_from_entry(entry);
        if ctx.store.insert_cluster_if_absent(&cluster)? {
            info!(cluster_id = %entry.cluster_id, "manual cluster registered");
            sync.registered.push(entry.cluster_id.clone());
            continue;
        }

        let Some(existing) = ctx.store.get_cluster(&entry.cluster_id)? else {
            continue;
        };
        if existing.is_deleted() || existing.status.is_being_removed() {
            continue;
        }
        if existing.schedulable == entry.schedulable
            && existing.supported_instance_types == entry.supported_instance_types
        {
            continue;
        }
        ctx.store.update_cluster_if(&entry.cluster_id, &[], |c| {
            c.schedulable = entry.schedulable;
            c.supported_instance_types = entry.supported_instance_types.clone();
        })?;
        debug!(cluster_id = %entry.cluster_id, schedulable = entry.schedulable, "manual cluster updated");
        sync.updated.push(entry.cluster_id.clone());
    }

    let removable: Vec<ClusterStatus> = ClusterStatus::ALL
        .into_iter()
        .filter(|s| !s.is_being_removed())
        .collect();
    for cluster in ctx.store.list_clusters()? {
        if ctx.config.manual_cluster(&cluster.cluster_id).is_some() || cluster.status.is_being_removed() {
            continue;
        }
        let moved = ctx.store.transition_cluster_if_empty(
            &cluster.cluster_id,
            &removable,
            ClusterStatus::Deprovisioning,
        )?;
        if moved {
            info!(cluster_id = %cluster.cluster_id, "cluster dropped from the manual list, deprovisioning");
            sync.removed.push(cluster.cluster_id);
        } else {
            debug!(cluster_id = %cluster.cluster_id, "unlisted cluster still hosts instances");
        }
    }
    Ok(sync)
}

fn cluster_from_entry(entry: &ManualCluster) -> Cluster {
    let mut cluster = Cluster::new(&entry.cluster_id, &entry.cloud_provider, &entry.region, entry.multi_az);
    cluster.schedulable = entry.schedulable;
    cluster.supported_instance_types = entry.supported_instance_types.clone();
    cluster.provider_type = entry.provider_type;
    cluster.cluster_type = entry.cluster_type;
    cluster.organization_id = entry.organization_id.clone();
    cluster
}
