//! Lease-based leader election.
//!
//! One background task renews a lease per role (the distinct worker types of
//! the registered workers). Holding a role's lease starts that role's
//! workers; failing to renew it, or losing it to another replica, stops them
//! at once.
//!
//! ```text
//! Follower ──acquire ok──▶ Leader
//!    ▲  │                    │
//!    │  └──▶ Acquiring ──────┘
//!    └──── lost / store error
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::config::LeaderElectionConfig;
use fleet_state::{StateStore, epoch_millis};
use rand::Rng;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;
use crate::worker::Worker;

/// Leadership state of one role on this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Follower,
    Acquiring,
    Leader,
}

/// Timings of the election loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    pub interval: Duration,
    pub ttl: Duration,
    pub renew_window: Duration,
    pub jitter: Duration,
}

impl LeaseTiming {
    pub fn from_config(config: &LeaderElectionConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.repeat_interval_secs),
            ttl: Duration::from_secs(config.lease_ttl_secs),
            renew_window: Duration::from_secs(config.renew_window_secs),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Interval to the next renewal, with random jitter added.
    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.interval + Duration::from_millis(extra)
    }
}

/// Shared state of the election loop.
struct ElectionCore {
    store: StateStore,
    holder: String,
    timing: LeaseTiming,
    reconciler: Arc<Reconciler>,
    /// role → workers of that role.
    roles: BTreeMap<String, Vec<Arc<dyn Worker>>>,
    states: RwLock<HashMap<String, LeaderState>>,
}

/// Background task handle.
struct ElectionTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs the registered workers only while this replica leads their role.
pub struct LeaderElectionManager {
    core: Arc<ElectionCore>,
    task: Mutex<Option<ElectionTask>>,
}

impl LeaderElectionManager {
    pub fn new(
        store: StateStore,
        holder: &str,
        timing: LeaseTiming,
        reconciler: Arc<Reconciler>,
        workers: Vec<Arc<dyn Worker>>,
    ) -> Self {
        let mut roles: BTreeMap<String, Vec<Arc<dyn Worker>>> = BTreeMap::new();
        for worker in workers {
            roles
                .entry(worker.worker_type().to_string())
                .or_default()
                .push(worker);
        }
        let states = roles
            .keys()
            .map(|role| (role.clone(), LeaderState::Follower))
            .collect();
        Self {
            core: Arc::new(ElectionCore {
                store,
                holder: holder.to_string(),
                timing,
                reconciler,
                roles,
                states: RwLock::new(states),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start the election loop. Calling it while running is a no-op.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            run_election_loop(core, shutdown_rx).await;
        });
        *task = Some(ElectionTask { handle, shutdown_tx });
        info!(holder = %self.core.holder, roles = self.core.roles.len(), "leader election started");
    }

    /// Stop the loop, stop every worker and give up held leases.
    /// Calling it while stopped is a no-op.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = task.shutdown_tx.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "leader election loop ended abnormally");
        }
        for role in self.core.roles.keys() {
            let was_leader = self.core.state(role).await == LeaderState::Leader;
            self.core.step_down(role).await;
            if was_leader {
                if let Err(e) = self.core.store.release_lease(role, &self.core.holder) {
                    warn!(%role, error = %e, "failed to release lease");
                }
            }
        }
        info!(holder = %self.core.holder, "leader election stopped");
    }

    /// Whether the election loop is alive.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub async fn state(&self, role: &str) -> LeaderState {
        self.core.state(role).await
    }

    pub async fn is_leader(&self, role: &str) -> bool {
        self.state(role).await == LeaderState::Leader
    }

    /// Run one election round now. The loop calls this on every tick.
    pub async fn tick(&self) {
        self.core.tick().await;
    }

    pub fn roles(&self) -> Vec<String> {
        self.core.roles.keys().cloned().collect()
    }
}

async fn run_election_loop(core: Arc<ElectionCore>, mut shutdown: watch::Receiver<bool>) {
    loop {
        core.tick().await;
        let delay = core.timing.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                debug!("leader election loop shutting down");
                break;
            }
        }
    }
}

impl ElectionCore {
    async fn state(&self, role: &str) -> LeaderState {
        self.states
            .read()
            .await
            .get(role)
            .copied()
            .unwrap_or(LeaderState::Follower)
    }

    async fn set_state(&self, role: &str, state: LeaderState) {
        self.states.write().await.insert(role.to_string(), state);
    }

    async fn tick(&self) {
        for role in self.roles.keys() {
            self.tick_role(role).await;
        }
    }

    async fn tick_role(&self, role: &str) {
        let previous = self.state(role).await;
        if previous == LeaderState::Follower {
            self.set_state(role, LeaderState::Acquiring).await;
        }

        let now_ms = epoch_millis();
        let attempt = self.store.acquire_lease(
            role,
            &self.holder,
            now_ms,
            self.timing.ttl.as_millis() as u64,
            self.timing.renew_window.as_millis() as u64,
        );

        match attempt {
            Ok(lease) if lease.acquired => {
                self.set_state(role, LeaderState::Leader).await;
                if previous != LeaderState::Leader {
                    info!(%role, holder = %self.holder, expires_at_ms = lease.lease.expires_at_ms, "became leader");
                }
                // Also restarts workers halted by a fatal error.
                if let Some(workers) = self.roles.get(role) {
                    for worker in workers {
                        self.reconciler.start(Arc::clone(worker)).await;
                    }
                }
            }
            Ok(lease) => {
                if previous == LeaderState::Leader {
                    warn!(%role, new_holder = %lease.lease.holder, "leadership lost");
                } else {
                    debug!(%role, leader = %lease.lease.holder, "following");
                }
                self.step_down(role).await;
            }
            Err(e) => {
                error!(%role, error = %e, "lease renewal failed");
                self.step_down(role).await;
            }
        }
    }

    /// Stop the role's workers and become a follower.
    async fn step_down(&self, role: &str) {
        if let Some(workers) = self.roles.get(role) {
            for worker in workers {
                self.reconciler.stop(worker.id()).await;
            }
        }
        self.set_state(role, LeaderState::Follower).await;
    }
}
