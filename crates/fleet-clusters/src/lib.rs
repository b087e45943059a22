//! fleet-clusters: cluster lifecycle workers.
//!
//! [`ClusterManager`] takes clusters through creation, add-on installation
//! and deprovisioning, and keeps the manual cluster list in sync.
//! [`CleanupManager`] finishes removed clusters.

pub mod cleanup;
pub mod manager;
pub mod manual;

pub use cleanup::{CLEANUP_WORKER, CleanupManager};
pub use manager::{CLUSTER_WORKER, ClusterManager};
pub use manual::{ManualSync, reconcile_manual_clusters};
