//! fleet-core: configuration, collaborators and the shared context.
//!
//! Everything a reconciler needs is reached through a [`FleetContext`]
//! built once per process: the parsed [`FleetConfig`], the state store and
//! the cloud provider and quota collaborators.

pub mod config;
pub mod context;
pub mod error;
pub mod provider;
pub mod quota;

pub use config::FleetConfig;
pub use context::FleetContext;
pub use error::{ConfigError, ProviderError};
pub use provider::{ClusterProvider, ComputeNodes, InMemoryProvider, ProviderFuture, ProvisionState};
pub use quota::{QuotaService, StaticQuota};
