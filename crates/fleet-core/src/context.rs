//! The per-process context handed to every component constructor.

use std::future::Future;
use std::sync::Arc;

use fleet_state::StateStore;

use crate::config::FleetConfig;
use crate::error::ProviderError;
use crate::provider::{ClusterProvider, InMemoryProvider};
use crate::quota::{QuotaService, StaticQuota};

/// Configuration, store and collaborators of one manager process.
#[derive(Clone)]
pub struct FleetContext {
    pub config: Arc<FleetConfig>,
    pub store: StateStore,
    pub provider: Arc<dyn ClusterProvider>,
    pub quota: Arc<dyn QuotaService>,
    /// Identity of this process in leader leases.
    pub instance_id: String,
}

impl FleetContext {
    pub fn new(
        config: FleetConfig,
        store: StateStore,
        provider: Arc<dyn ClusterProvider>,
        quota: Arc<dyn QuotaService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            provider,
            quota,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// A context over `store` with the simulated provider and the static quota
    /// from config. The provider is returned as well so callers can drive it.
    pub fn simulated(config: FleetConfig, store: StateStore) -> (Self, Arc<InMemoryProvider>) {
        Self::simulated_with(config, store, InMemoryProvider::new())
    }

    pub fn simulated_with(
        config: FleetConfig,
        store: StateStore,
        provider: InMemoryProvider,
    ) -> (Self, Arc<InMemoryProvider>) {
        let provider = Arc::new(provider);
        let quota = Arc::new(StaticQuota::new(config.quota.inactive_organizations.clone()));
        let ctx = Self::new(config, store, provider.clone(), quota);
        (ctx, provider)
    }

    pub fn with_instance_id(mut self, instance_id: &str) -> Self {
        self.instance_id = instance_id.to_string();
        self
    }

    /// Await a collaborator call, bounded by the configured provider timeout.
    pub async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.config.provider_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(op.to_string())),
        }
    }
}
