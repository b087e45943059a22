//! fleet.toml configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_state::{ClusterType, ProviderType};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Role a credential must carry to call the data plane agent endpoints.
pub const AGENT_ROLE: &str = "fleetshard_operator";
/// Role a credential must carry to call the admin endpoints.
pub const ADMIN_ROLE: &str = "fleet_admin";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub leader_election: LeaderElectionConfig,
    pub reconciler: ReconcilerConfig,
    pub dataplane: DataplaneConfig,
    pub instances: InstancesConfig,
    pub quota: QuotaConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderElectionConfig {
    pub repeat_interval_secs: u64,
    pub lease_ttl_secs: u64,
    pub renew_window_secs: u64,
    pub jitter_ms: u64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            repeat_interval_secs: 30,
            lease_ttl_secs: 180,
            renew_window_secs: 60,
            jitter_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub repeat_interval_secs: u64,
    pub tick_timeout_secs: u64,
    pub provider_timeout_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            repeat_interval_secs: 30,
            tick_timeout_secs: 120,
            provider_timeout_secs: 30,
        }
    }
}

/// How clusters are added to and removed from the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Clusters come from the configured list only.
    #[default]
    Manual,
    /// Clusters are registered externally; node counts follow agent reports.
    Auto,
    /// Whole clusters are created and removed from capacity summaries.
    Dynamic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    pub scaling_mode: ScalingMode,
    pub manual_clusters: Vec<ManualCluster>,
    pub node_scaling: NodeScalingConfig,
    pub dynamic: DynamicScalingConfig,
    pub addons: AddonsConfig,
}

/// One entry of the manually managed cluster list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualCluster {
    pub cluster_id: String,
    pub cloud_provider: String,
    pub region: String,
    #[serde(default = "default_true")]
    pub multi_az: bool,
    #[serde(default = "default_true")]
    pub schedulable: bool,
    /// Total streaming units that may be placed on this cluster.
    pub streaming_unit_limit: u32,
    #[serde(default = "default_instance_types")]
    pub supported_instance_types: Vec<String>,
    #[serde(default)]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Remaining-capacity thresholds, one per reported metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityThresholds {
    pub connections: u64,
    pub partitions: u64,
}

/// Hysteresis band for compute node scaling. Scale up at or below
/// `scale_up`; scale down only well above `scale_down`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeScalingConfig {
    pub enabled: bool,
    pub scale_up: CapacityThresholds,
    pub scale_down: CapacityThresholds,
}

impl Default for NodeScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale_up: CapacityThresholds {
                connections: 1000,
                partitions: 100,
            },
            scale_down: CapacityThresholds {
                connections: 3000,
                partitions: 300,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicScalingConfig {
    pub enable_scale_up: bool,
    pub enable_scale_down: bool,
    pub idle_grace_secs: u64,
    pub min_pool_size: usize,
    pub regions: Vec<RegionConfig>,
}

impl Default for DynamicScalingConfig {
    fn default() -> Self {
        Self {
            enable_scale_up: true,
            enable_scale_down: true,
            idle_grace_secs: 600,
            min_pool_size: 1,
            regions: Vec::new(),
        }
    }
}

/// A region dynamic scaling may create clusters in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub cloud_provider: String,
    pub region: String,
    #[serde(default)]
    pub instance_types: BTreeMap<String, RegionInstanceTypeLimit>,
}

impl RegionConfig {
    pub fn instance_type(&self, instance_type: &str) -> Option<&RegionInstanceTypeLimit> {
        self.instance_types.get(instance_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInstanceTypeLimit {
    /// Streaming units the region may hold for this type; unset is unlimited.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Free streaming units to keep available before creating a new cluster.
    #[serde(default)]
    pub min_available_capacity_slack: u32,
    /// Maximum worker nodes of a cluster's machine pool for this type.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonsConfig {
    pub strimzi: String,
    pub logging: String,
    pub fleetshard: String,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            strimzi: "managed-kafka".to_string(),
            logging: "cluster-logging-operator".to_string(),
            fleetshard: "kas-fleetshard-operator".to_string(),
        }
    }
}

impl AddonsConfig {
    pub fn ids(&self) -> [&str; 3] {
        [&self.strimzi, &self.logging, &self.fleetshard]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancesConfig {
    pub types: BTreeMap<String, InstanceTypeConfig>,
    pub accepted_max_retry_secs: u64,
    pub preparing_max_retry_secs: u64,
}

impl Default for InstancesConfig {
    fn default() -> Self {
        let standard = InstanceTypeConfig {
            sizes: vec![
                SizeConfig::new("x1", 1, None),
                SizeConfig::new("x2", 2, None),
            ],
            billing_models: vec![
                BillingModelConfig::new("standard", 14),
                BillingModelConfig::new("marketplace", 14),
                BillingModelConfig::new("enterprise", 0),
            ],
        };
        let developer = InstanceTypeConfig {
            sizes: vec![SizeConfig::new("x1", 1, Some(48 * 3600))],
            billing_models: vec![BillingModelConfig::new("standard", 0)],
        };
        Self {
            types: BTreeMap::from([
                ("standard".to_string(), standard),
                ("developer".to_string(), developer),
            ]),
            accepted_max_retry_secs: 1800,
            preparing_max_retry_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceTypeConfig {
    #[serde(default)]
    pub sizes: Vec<SizeConfig>,
    #[serde(default)]
    pub billing_models: Vec<BillingModelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeConfig {
    pub id: String,
    /// Streaming units consumed by one instance of this size.
    pub capacity_consumed: u32,
    #[serde(default)]
    pub lifespan_secs: Option<u64>,
}

impl SizeConfig {
    pub fn new(id: &str, capacity_consumed: u32, lifespan_secs: Option<u64>) -> Self {
        Self {
            id: id.to_string(),
            capacity_consumed,
            lifespan_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingModelConfig {
    pub id: String,
    #[serde(default)]
    pub grace_period_days: u64,
}

impl BillingModelConfig {
    pub fn new(id: &str, grace_period_days: u64) -> Self {
        Self {
            id: id.to_string(),
            grace_period_days,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Organizations whose entitlement has lapsed.
    pub inactive_organizations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub credentials: Vec<AgentCredential>,
}

/// Static bearer credential. `cluster_id` is the cluster the subject may
/// report for; admin credentials leave it unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredential {
    pub token: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            data_dir: PathBuf::from("/var/lib/fleetd"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_instance_types() -> Vec<String> {
    vec!["standard".to_string(), "developer".to_string()]
}

fn default_max_nodes() -> u32 {
    18
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the fatal configuration rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_manual_clusters()?;
        self.validate_node_scaling()?;
        self.validate_addons()?;
        self.validate_regions()?;

        self.validate_leader_election()
    }

    /// Lease timings that keep a single leader: every renewal tick must land
    /// inside the renew window, and the lease must outlive the tick after it.
    pub fn validate_leader_election(&self) -> Result<(), ConfigError> {
        let le = &self.leader_election;
        let interval_ms = le.repeat_interval_secs.saturating_mul(1000);
        let window_ms = le.renew_window_secs.saturating_mul(1000);
        if window_ms <= interval_ms.saturating_add(le.jitter_ms) {
            return Err(ConfigError::RenewWindow);
        }
        if le.lease_ttl_secs <= le.repeat_interval_secs.saturating_add(le.renew_window_secs) {
            return Err(ConfigError::LeaseTiming);
        }
        Ok(())
    }

    /// Manual cluster list rules; checked again by the cluster worker each pass.
    pub fn validate_manual_clusters(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for cluster in &self.dataplane.manual_clusters {
            if cluster.cluster_id.trim().is_empty() {
                return Err(ConfigError::EmptyManualClusterId);
            }
            if !seen.insert(cluster.cluster_id.as_str()) {
                return Err(ConfigError::DuplicateManualCluster(cluster.cluster_id.clone()));
            }
            for instance_type in &cluster.supported_instance_types {
                if !self.instances.types.contains_key(instance_type) {
                    return Err(ConfigError::UnknownInstanceType {
                        cluster_id: cluster.cluster_id.clone(),
                        instance_type: instance_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn validate_node_scaling(&self) -> Result<(), ConfigError> {
        let ns = &self.dataplane.node_scaling;
        if ns.scale_down.connections <= ns.scale_up.connections {
            return Err(ConfigError::ThresholdBand("connections"));
        }
        if ns.scale_down.partitions <= ns.scale_up.partitions {
            return Err(ConfigError::ThresholdBand("partitions"));
        }
        Ok(())
    }

    pub fn validate_addons(&self) -> Result<(), ConfigError> {
        let addons = &self.dataplane.addons;
        for (name, id) in [
            ("strimzi", &addons.strimzi),
            ("logging", &addons.logging),
            ("fleetshard", &addons.fleetshard),
        ] {
            if id.trim().is_empty() {
                return Err(ConfigError::MissingAddon(name));
            }
        }
        Ok(())
    }

    fn validate_regions(&self) -> Result<(), ConfigError> {
        for region in &self.dataplane.dynamic.regions {
            for instance_type in region.instance_types.keys() {
                if !self.instances.types.contains_key(instance_type) {
                    return Err(ConfigError::UnknownRegionInstanceType {
                        cloud_provider: region.cloud_provider.clone(),
                        region: region.region.clone(),
                        instance_type: instance_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn manual_cluster(&self, cluster_id: &str) -> Option<&ManualCluster> {
        self.dataplane
            .manual_clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
    }

    pub fn region(&self, cloud_provider: &str, region: &str) -> Option<&RegionConfig> {
        self.dataplane
            .dynamic
            .regions
            .iter()
            .find(|r| r.cloud_provider == cloud_provider && r.region == region)
    }

    pub fn size(&self, instance_type: &str, size_id: &str) -> Option<&SizeConfig> {
        self.instances
            .types
            .get(instance_type)?
            .sizes
            .iter()
            .find(|s| s.id == size_id)
    }

    /// The size consuming the most streaming units for an instance type.
    pub fn biggest_size(&self, instance_type: &str) -> Option<&SizeConfig> {
        self.instances
            .types
            .get(instance_type)?
            .sizes
            .iter()
            .max_by_key(|s| s.capacity_consumed)
    }

    pub fn billing_model(&self, instance_type: &str, billing_model: &str) -> Option<&BillingModelConfig> {
        self.instances
            .types
            .get(instance_type)?
            .billing_models
            .iter()
            .find(|b| b.id.eq_ignore_ascii_case(billing_model))
    }

    pub fn credential(&self, token: &str) -> Option<&AgentCredential> {
        self.agent.credentials.iter().find(|c| c.token == token)
    }

    // ── Durations ──────────────────────────────────────────────────

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.repeat_interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.reconciler.tick_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.reconciler.provider_timeout_secs)
    }
}
