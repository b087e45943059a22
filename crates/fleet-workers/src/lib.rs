//! fleet-workers: periodic reconcilers gated by leader election.
//!
//! # Architecture
//!
//! ```text
//! LeaderElectionManager (one task per process)
//!   ├── lease per role in the StateStore
//!   └── Reconciler
//!         └── per-worker loop: reconcile() every interval
//!               ├── errors logged, loop keeps ticking
//!               ├── panics caught per pass
//!               └── WorkerError::Fatal halts the loop
//! ```
//!
//! Only the replica holding a role's lease runs that role's workers. Losing
//! the lease is not an error: the workers are stopped and the replica goes
//! back to following.

pub mod error;
pub mod leader;
pub mod reconciler;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
pub use leader::{LeaderElectionManager, LeaderState, LeaseTiming};
pub use reconciler::Reconciler;
pub use worker::{ReconcileFuture, Worker};
