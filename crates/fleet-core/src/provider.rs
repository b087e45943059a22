//! Cloud provider collaborator.
//!
//! The control plane never talks to a cloud API directly: every cluster
//! creation, add-on installation, node resize and deletion goes through a
//! [`ClusterProvider`]. [`InMemoryProvider`] simulates one, for tests and for
//! running the daemon without cloud credentials.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use fleet_state::{Cluster, new_id};
use tracing::debug;

use crate::config::AddonsConfig;
use crate::error::ProviderError;

/// Boxed future returned by collaborator calls.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Infrastructure-level state of a cluster being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    Pending,
    Ready,
    Failed(String),
}

/// Worker node counts of a cluster's compute pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeNodes {
    pub actual: u32,
    pub desired: u32,
}

impl ComputeNodes {
    /// A resize requested earlier has not finished yet.
    pub fn is_scaling(&self) -> bool {
        self.actual != self.desired
    }
}

/// Cloud provider operations used by the reconcilers.
pub trait ClusterProvider: Send + Sync {
    /// Request creation of a cluster; returns the provider's identifier.
    fn create<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, String>;

    fn provision_state<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ProvisionState>;

    /// Install (or check) the operator add-ons. Resolves to true once all are ready.
    fn install_addons<'a>(
        &'a self,
        cluster: &'a Cluster,
        addons: &'a AddonsConfig,
    ) -> ProviderFuture<'a, bool>;

    fn cluster_dns<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, String>;

    fn compute_nodes<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ComputeNodes>;

    /// Set the desired worker node count.
    fn scale_compute_nodes<'a>(
        &'a self,
        cluster: &'a Cluster,
        desired: u32,
    ) -> ProviderFuture<'a, ComputeNodes>;

    /// Request deletion. Resolves to true once the cluster is gone.
    fn delete<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, bool>;

    fn remove_service_account<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ()>;
}

/// Handle the provider knows a cluster by.
pub fn provider_handle(cluster: &Cluster) -> &str {
    cluster.external_id.as_deref().unwrap_or(&cluster.cluster_id)
}

// ── In-memory simulation ───────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimCluster {
    polls_left: u32,
    addon_polls_left: u32,
    nodes: ComputeNodes,
    delete_requested: bool,
    service_account: bool,
}

#[derive(Debug, Default)]
struct SimState {
    clusters: HashMap<String, SimCluster>,
    unavailable: bool,
    created: Vec<String>,
    scale_requests: Vec<(String, u32)>,
    deleted: Vec<String>,
}

/// Simulated provider.
///
/// Creation and deletion complete after a configurable number of polls.
/// Node resizes are recorded and stay in progress until
/// [`InMemoryProvider::complete_scaling`] is called, unless the provider was
/// built with `auto_converge`.
#[derive(Debug)]
pub struct InMemoryProvider {
    state: Mutex<SimState>,
    provision_polls: u32,
    initial_nodes: u32,
    auto_converge: bool,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            provision_polls: 0,
            initial_nodes: 3,
            auto_converge: false,
        }
    }

    /// Number of provision-state polls before a new cluster reports ready.
    pub fn with_provision_polls(mut self, polls: u32) -> Self {
        self.provision_polls = polls;
        self
    }

    pub fn with_initial_nodes(mut self, nodes: u32) -> Self {
        self.initial_nodes = nodes;
        self
    }

    /// Resizes complete on the next node-count query.
    pub fn with_auto_converge(mut self) -> Self {
        self.auto_converge = true;
        self
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.with_state(|s| s.unavailable = unavailable);
    }

    /// Overwrite the node counts of a cluster.
    pub fn set_compute_nodes(&self, handle: &str, actual: u32, desired: u32) {
        let initial = self.initial_nodes;
        self.with_state(|s| {
            let sim = s
                .clusters
                .entry(handle.to_string())
                .or_insert_with(|| SimCluster::ready(initial));
            sim.nodes = ComputeNodes { actual, desired };
        });
    }

    /// Finish every in-flight resize.
    pub fn complete_scaling(&self) {
        self.with_state(|s| {
            for sim in s.clusters.values_mut() {
                sim.nodes.actual = sim.nodes.desired;
            }
        });
    }

    /// Provider handles of every cluster created so far.
    pub fn created(&self) -> Vec<String> {
        self.with_state(|s| s.created.clone())
    }

    /// Every `(handle, desired)` resize requested so far.
    pub fn scale_requests(&self) -> Vec<(String, u32)> {
        self.with_state(|s| s.scale_requests.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|s| s.deleted.clone())
    }

    pub fn has_service_account(&self, handle: &str) -> bool {
        self.with_state(|s| s.clusters.get(handle).is_some_and(|c| c.service_account))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Run `f` against the simulated cluster, creating a ready one for
    /// clusters the provider never created (standalone registrations).
    fn with_cluster<R>(
        &self,
        handle: &str,
        f: impl FnOnce(&mut SimCluster, &mut Vec<(String, u32)>, &mut Vec<String>) -> R,
    ) -> Result<R, ProviderError> {
        let initial = self.initial_nodes;
        self.with_state(|s| {
            if s.unavailable {
                return Err(ProviderError::Unavailable("simulated outage".to_string()));
            }
            let sim = s
                .clusters
                .entry(handle.to_string())
                .or_insert_with(|| SimCluster::ready(initial));
            Ok(f(sim, &mut s.scale_requests, &mut s.deleted))
        })
    }
}

impl SimCluster {
    fn ready(nodes: u32) -> Self {
        Self {
            polls_left: 0,
            addon_polls_left: 0,
            nodes: ComputeNodes {
                actual: nodes,
                desired: nodes,
            },
            delete_requested: false,
            service_account: true,
        }
    }
}

impl ClusterProvider for InMemoryProvider {
    fn create<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let handle = format!("ext-{}", new_id());
            let polls = self.provision_polls;
            let nodes = if cluster.multi_az { self.initial_nodes.max(3) } else { self.initial_nodes };
            self.with_state(|s| {
                if s.unavailable {
                    return Err(ProviderError::Unavailable("simulated outage".to_string()));
                }
                s.clusters.insert(
                    handle.clone(),
                    SimCluster {
                        polls_left: polls,
                        addon_polls_left: 1,
                        ..SimCluster::ready(nodes)
                    },
                );
                s.created.push(handle.clone());
                Ok(())
            })?;
            debug!(cluster_id = %cluster.cluster_id, %handle, "simulated cluster created");
            Ok(handle)
        })
    }

    fn provision_state<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ProvisionState> {
        Box::pin(async move {
            self.with_cluster(provider_handle(cluster), |sim, _, _| {
                if sim.polls_left == 0 {
                    ProvisionState::Ready
                } else {
                    sim.polls_left -= 1;
                    ProvisionState::Pending
                }
            })
        })
    }

    fn install_addons<'a>(
        &'a self,
        cluster: &'a Cluster,
        _addons: &'a AddonsConfig,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            self.with_cluster(provider_handle(cluster), |sim, _, _| {
                if sim.addon_polls_left == 0 {
                    true
                } else {
                    sim.addon_polls_left -= 1;
                    false
                }
            })
        })
    }

    fn cluster_dns<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let handle = provider_handle(cluster);
            self.with_cluster(handle, |_, _, _| ())?;
            Ok(format!("apps.{}.{}.fleet.local", cluster.cluster_id, cluster.region))
        })
    }

    fn compute_nodes<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ComputeNodes> {
        Box::pin(async move {
            let converge = self.auto_converge;
            self.with_cluster(provider_handle(cluster), |sim, _, _| {
                let current = sim.nodes;
                if converge {
                    sim.nodes.actual = sim.nodes.desired;
                }
                current
            })
        })
    }

    fn scale_compute_nodes<'a>(
        &'a self,
        cluster: &'a Cluster,
        desired: u32,
    ) -> ProviderFuture<'a, ComputeNodes> {
        Box::pin(async move {
            let handle = provider_handle(cluster);
            self.with_cluster(handle, |sim, requests, _| {
                sim.nodes.desired = desired;
                requests.push((handle.to_string(), desired));
                sim.nodes
            })
        })
    }

    fn delete<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let handle = provider_handle(cluster);
            self.with_cluster(handle, |sim, _, deleted| {
                if sim.delete_requested {
                    return true;
                }
                sim.delete_requested = true;
                deleted.push(handle.to_string());
                false
            })
        })
    }

    fn remove_service_account<'a>(&'a self, cluster: &'a Cluster) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.with_cluster(provider_handle(cluster), |sim, _, _| {
                sim.service_account = false;
            })
        })
    }
}
