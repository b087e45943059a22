//! Process wiring for `fleetd run`.
//!
//! Cluster creation, add-ons and compute node resizes go through the
//! in-memory provider: clusters are simulated, not created in a cloud
//! account. Quota checks read `[quota] inactive_organizations`.

use std::sync::Arc;

use fleet_clusters::{CleanupManager, ClusterManager};
use fleet_core::{FleetConfig, FleetContext};
use fleet_instances::{AcceptedWorker, DeletingWorker, ExpirationWorker, PreparingWorker};
use fleet_scaling::{DynamicScaleDownManager, DynamicScaleUpManager};
use fleet_state::StateStore;
use fleet_workers::{LeaderElectionManager, LeaseTiming, Reconciler, Worker};
use tracing::info;

/// Every reconcile worker of the control plane.
pub fn workers(ctx: &FleetContext) -> Vec<Arc<dyn Worker>> {
    vec![
        Arc::new(ClusterManager::new(ctx.clone())),
        Arc::new(CleanupManager::new(ctx.clone())),
        Arc::new(DynamicScaleUpManager::new(ctx.clone())),
        Arc::new(DynamicScaleDownManager::new(ctx.clone())),
        Arc::new(AcceptedWorker::new(ctx.clone())),
        Arc::new(PreparingWorker::new(ctx.clone())),
        Arc::new(DeletingWorker::new(ctx.clone())),
        Arc::new(ExpirationWorker::new(ctx.clone())),
    ]
}

pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    info!(mode = ?config.dataplane.scaling_mode, "fleet manager starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("fleet.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let bind = config.server.bind.clone();
    let (ctx, _provider) = FleetContext::simulated(config, store);
    info!(instance_id = %ctx.instance_id, provider = "simulated", "context ready");

    // ── Leader election ────────────────────────────────────────

    let reconciler = Arc::new(Reconciler::new(
        ctx.config.reconcile_interval(),
        ctx.config.tick_timeout(),
    ));
    let election = LeaderElectionManager::new(
        ctx.store.clone(),
        &ctx.instance_id,
        LeaseTiming::from_config(&ctx.config.leader_election),
        Arc::clone(&reconciler),
        workers(&ctx),
    );
    election.start().await;
    info!(roles = ?election.roles(), "workers registered");

    // ── API server ─────────────────────────────────────────────

    let router = fleet_agent::build_router(ctx.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    election.stop().await;
    reconciler.stop_all().await;
    info!("fleet manager stopped");
    Ok(())
}
