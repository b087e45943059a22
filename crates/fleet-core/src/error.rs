//! Error types for configuration and collaborators.

use thiserror::Error;

/// Fatal configuration problems. A worker that hits one stops ticking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("manual cluster list contains an empty cluster id")]
    EmptyManualClusterId,

    #[error("manual cluster {0} is listed more than once")]
    DuplicateManualCluster(String),

    #[error("manual cluster {cluster_id} supports unknown instance type {instance_type}")]
    UnknownInstanceType {
        cluster_id: String,
        instance_type: String,
    },

    #[error("scale-down threshold for {0} must be above the scale-up threshold")]
    ThresholdBand(&'static str),

    #[error("lease ttl must exceed the repeat interval plus the renew window")]
    LeaseTiming,

    #[error("renew window must exceed the repeat interval plus jitter")]
    RenewWindow,

    #[error("missing add-on id for {0}")]
    MissingAddon(&'static str),

    #[error("dynamic region {cloud_provider}/{region} names unknown instance type {instance_type}")]
    UnknownRegionInstanceType {
        cloud_provider: String,
        region: String,
        instance_type: String,
    },
}

/// Errors from the cloud provider and quota collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider call {0} timed out")]
    Timeout(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("cluster {0} is unknown to the provider")]
    UnknownCluster(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),
}
