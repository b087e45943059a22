//! Cleanup manager: releases what a removed cluster still holds and
//! retires its row.

use fleet_core::FleetContext;
use fleet_state::{Cluster, ClusterStatus, ProviderType, new_id};
use fleet_workers::{ReconcileFuture, Worker, WorkerError, WorkerResult};
use tracing::{info, warn};

pub const CLEANUP_WORKER: &str = "cluster_cleanup";

pub struct CleanupManager {
    id: String,
    ctx: FleetContext,
}

impl CleanupManager {
    pub fn new(ctx: FleetContext) -> Self {
        Self {
            id: format!("{CLEANUP_WORKER}-{}", new_id()),
            ctx,
        }
    }

    pub async fn reconcile_all(&self) -> Vec<WorkerError> {
        let clusters = match self.ctx.store.list_clusters_by_status(&[ClusterStatus::Cleanup]) {
            Ok(clusters) => clusters,
            Err(e) => return vec![e.into()],
        };
        let mut errors = Vec::new();
        for cluster in clusters {
            if let Err(e) = self.cleanup(&cluster).await {
                warn!(cluster_id = %cluster.cluster_id, error = %e, "cluster cleanup failed");
                errors.push(e.context(&cluster.cluster_id));
            }
        }
        errors
    }

    async fn cleanup(&self, cluster: &Cluster) -> WorkerResult<()> {
        let id = &cluster.cluster_id;
        if cluster.provider_type != ProviderType::Standalone {
            self.ctx
                .bounded(
                    "remove_service_account",
                    self.ctx.provider.remove_service_account(cluster),
                )
                .await?;
        }
        if !self
            .ctx
            .store
            .transition_cluster(id, &[ClusterStatus::Cleanup], ClusterStatus::Deleting)?
        {
            return Ok(());
        }
        self.ctx.store.soft_delete_cluster(id)?;
        info!(cluster_id = %id, "cluster deleted");
        Ok(())
    }
}

impl Worker for CleanupManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn worker_type(&self) -> &str {
        CLEANUP_WORKER
    }

    fn reconcile(&self) -> ReconcileFuture<'_> {
        Box::pin(self.reconcile_all())
    }
}
