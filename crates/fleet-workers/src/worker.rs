//! The unit of periodic reconciliation.

use std::future::Future;
use std::pin::Pin;

use crate::error::WorkerError;

/// Boxed future of one reconcile pass. It resolves to every error the pass
/// ran into; an empty vector is a clean pass.
pub type ReconcileFuture<'a> = Pin<Box<dyn Future<Output = Vec<WorkerError>> + Send + 'a>>;

/// A named reconciler ticked on a fixed interval by a [`crate::Reconciler`].
///
/// Workers sharing a `worker_type` share one leader lease: they all run on
/// the replica that leads that role.
pub trait Worker: Send + Sync + 'static {
    /// Unique identifier of this worker instance.
    fn id(&self) -> &str;

    /// Leadership role of the worker, e.g. `cluster` or `kafka_accepted`.
    fn worker_type(&self) -> &str;

    /// Run one reconcile pass.
    fn reconcile(&self) -> ReconcileFuture<'_>;
}
