//! Reconciler: ticks registered workers on a fixed interval.
//!
//! Each started worker gets a background task that calls `reconcile()`
//! immediately and then every `interval`. A pass runs in its own task, so a
//! panic is caught and logged without stopping the timer, and a pass that
//! exceeds `tick_timeout` is aborted. Stopping is cooperative: the running
//! pass finishes, no new pass starts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::worker::Worker;

/// Per-worker loop state.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Outcome of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Halt,
}

/// Runs worker loops.
pub struct Reconciler {
    interval: Duration,
    tick_timeout: Duration,
    /// Active loops: worker id → slot.
    workers: Arc<RwLock<HashMap<String, WorkerSlot>>>,
}

impl Reconciler {
    pub fn new(interval: Duration, tick_timeout: Duration) -> Self {
        Self {
            interval,
            tick_timeout,
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start ticking a worker. Returns false if it is already running.
    /// A worker whose loop halted on a fatal error is started afresh.
    pub async fn start(&self, worker: Arc<dyn Worker>) -> bool {
        let id = worker.id().to_string();
        let mut workers = self.workers.write().await;
        if let Some(slot) = workers.get(&id) {
            if !slot.handle.is_finished() {
                return false;
            }
            debug!(worker_id = %id, "restarting halted worker");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let tick_timeout = self.tick_timeout;
        let handle = tokio::spawn(async move {
            run_worker_loop(worker, interval, tick_timeout, shutdown_rx).await;
        });
        workers.insert(id.clone(), WorkerSlot { handle, shutdown_tx });

        info!(worker_id = %id, interval_ms = interval.as_millis() as u64, "worker started");
        true
    }

    /// Signal a worker to stop after its current pass. Returns false if it
    /// was not registered.
    pub async fn stop(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.remove(worker_id) {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                info!(%worker_id, "worker stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every worker and wait for their loops to exit.
    pub async fn stop_all(&self) {
        let slots: Vec<(String, WorkerSlot)> = {
            let mut workers = self.workers.write().await;
            workers.drain().collect()
        };
        for (_, slot) in &slots {
            let _ = slot.shutdown_tx.send(true);
        }
        for (id, slot) in slots {
            if let Err(e) = slot.handle.await {
                warn!(worker_id = %id, error = %e, "worker loop ended abnormally");
            }
        }
        info!("all workers stopped");
    }

    /// Whether a worker's loop is alive.
    pub async fn is_running(&self, worker_id: &str) -> bool {
        let workers = self.workers.read().await;
        workers
            .get(worker_id)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Ids of workers with a live loop.
    pub async fn running_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut ids: Vec<String> = workers
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

async fn run_worker_loop(
    worker: Arc<dyn Worker>,
    interval: Duration,
    tick_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_id = worker.id().to_string();
    debug!(%worker_id, "worker loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }
        if run_tick(&worker, tick_timeout).await == TickOutcome::Halt {
            error!(%worker_id, "worker halted on fatal error");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                break;
            }
        }
    }
    debug!(%worker_id, "worker loop shutting down");
}

async fn run_tick(worker: &Arc<dyn Worker>, tick_timeout: Duration) -> TickOutcome {
    let worker_id = worker.id().to_string();
    let pass = Arc::clone(worker);
    let mut handle = tokio::spawn(async move { pass.reconcile().await });

    match tokio::time::timeout(tick_timeout, &mut handle).await {
        Ok(Ok(errors)) => {
            let mut outcome = TickOutcome::Continue;
            for e in &errors {
                error!(%worker_id, error = %e, "reconcile error");
                if e.is_fatal() {
                    outcome = TickOutcome::Halt;
                }
            }
            outcome
        }
        Ok(Err(e)) if e.is_panic() => {
            error!(%worker_id, "reconcile panicked");
            TickOutcome::Continue
        }
        Ok(Err(e)) => {
            warn!(%worker_id, error = %e, "reconcile task cancelled");
            TickOutcome::Continue
        }
        Err(_) => {
            handle.abort();
            error!(%worker_id, timeout_ms = tick_timeout.as_millis() as u64, "reconcile timed out");
            TickOutcome::Continue
        }
    }
}
