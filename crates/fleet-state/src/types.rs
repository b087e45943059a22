//! Domain types for the fleet state store.
//!
//! These types represent the persisted state of data plane clusters,
//! instance requests, leader leases, and named lock rows. All types are
//! serializable to/from JSON for storage in redb tables.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Externally visible, immutable identifier of a data plane cluster.
pub type ClusterId = String;

/// Identifier of an instance request.
pub type RequestId = String;

// ── Cluster status ─────────────────────────────────────────────────

/// Lifecycle status of a data plane cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Accepted,
    Provisioning,
    Provisioned,
    WaitingForKasFleetshardOperator,
    Ready,
    ComputeNodeScalingUp,
    Full,
    Deprovisioning,
    Cleanup,
    Deleting,
    Failed,
}

impl ClusterStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ClusterStatus; 11] = [
        ClusterStatus::Accepted,
        ClusterStatus::Provisioning,
        ClusterStatus::Provisioned,
        ClusterStatus::WaitingForKasFleetshardOperator,
        ClusterStatus::Ready,
        ClusterStatus::ComputeNodeScalingUp,
        ClusterStatus::Full,
        ClusterStatus::Deprovisioning,
        ClusterStatus::Cleanup,
        ClusterStatus::Deleting,
        ClusterStatus::Failed,
    ];

    /// Position of the status in the lifecycle. Ready and its two scaling
    /// siblings sit next to each other since they cycle between themselves.
    pub const fn ordinal(self) -> u8 {
        match self {
            ClusterStatus::Accepted => 0,
            ClusterStatus::Provisioning => 10,
            ClusterStatus::Provisioned => 20,
            ClusterStatus::WaitingForKasFleetshardOperator => 30,
            ClusterStatus::Ready => 40,
            ClusterStatus::ComputeNodeScalingUp => 41,
            ClusterStatus::Full => 42,
            ClusterStatus::Deprovisioning => 50,
            ClusterStatus::Cleanup => 60,
            ClusterStatus::Deleting => 65,
            ClusterStatus::Failed => 70,
        }
    }

    /// Compare two statuses by lifecycle position.
    pub fn compare_to(self, other: ClusterStatus) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }

    /// True if this status is at or beyond `other` in the lifecycle.
    pub fn has_reached(self, other: ClusterStatus) -> bool {
        self.compare_to(other) != Ordering::Less
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Accepted => "accepted",
            ClusterStatus::Provisioning => "provisioning",
            ClusterStatus::Provisioned => "provisioned",
            ClusterStatus::WaitingForKasFleetshardOperator => "waiting_for_kas_fleetshard_operator",
            ClusterStatus::Ready => "ready",
            ClusterStatus::ComputeNodeScalingUp => "compute_node_scaling_up",
            ClusterStatus::Full => "full",
            ClusterStatus::Deprovisioning => "deprovisioning",
            ClusterStatus::Cleanup => "cleanup",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::Failed => "failed",
        }
    }

    /// Statuses of a cluster that is still being brought up.
    pub fn is_on_way_to_ready(self) -> bool {
        matches!(
            self,
            ClusterStatus::Accepted
                | ClusterStatus::Provisioning
                | ClusterStatus::Provisioned
                | ClusterStatus::WaitingForKasFleetshardOperator
        )
    }

    /// Statuses of a cluster that is being torn down.
    pub fn is_being_removed(self) -> bool {
        matches!(
            self,
            ClusterStatus::Deprovisioning | ClusterStatus::Cleanup | ClusterStatus::Deleting
        )
    }

    /// Statuses in which data plane agent capacity reports are processed.
    pub fn processes_status_reports(self) -> bool {
        matches!(
            self,
            ClusterStatus::Ready
                | ClusterStatus::ComputeNodeScalingUp
                | ClusterStatus::Full
                | ClusterStatus::WaitingForKasFleetshardOperator
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterStatus::Deleting | ClusterStatus::Failed)
    }
}

const _: () = {
    let mut i = 1;
    while i < ClusterStatus::ALL.len() {
        assert!(ClusterStatus::ALL[i - 1].ordinal() < ClusterStatus::ALL[i].ordinal());
        i += 1;
    }
};

impl PartialOrd for ClusterStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClusterStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(*other)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Instance request status ────────────────────────────────────────

/// Lifecycle status of an instance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRequestStatus {
    Accepted,
    Preparing,
    Provisioning,
    Ready,
    Suspending,
    Suspended,
    Resuming,
    Deprovision,
    Deleting,
    Failed,
}

impl InstanceRequestStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [InstanceRequestStatus; 10] = [
        InstanceRequestStatus::Accepted,
        InstanceRequestStatus::Preparing,
        InstanceRequestStatus::Provisioning,
        InstanceRequestStatus::Ready,
        InstanceRequestStatus::Suspending,
        InstanceRequestStatus::Suspended,
        InstanceRequestStatus::Resuming,
        InstanceRequestStatus::Deprovision,
        InstanceRequestStatus::Deleting,
        InstanceRequestStatus::Failed,
    ];

    pub const fn ordinal(self) -> u8 {
        match self {
            InstanceRequestStatus::Accepted => 0,
            InstanceRequestStatus::Preparing => 10,
            InstanceRequestStatus::Provisioning => 20,
            InstanceRequestStatus::Ready => 30,
            InstanceRequestStatus::Suspending => 40,
            InstanceRequestStatus::Suspended => 50,
            InstanceRequestStatus::Resuming => 60,
            InstanceRequestStatus::Deprovision => 70,
            InstanceRequestStatus::Deleting => 80,
            InstanceRequestStatus::Failed => 90,
        }
    }

    pub fn compare_to(self, other: InstanceRequestStatus) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }

    pub fn has_reached(self, other: InstanceRequestStatus) -> bool {
        self.compare_to(other) != Ordering::Less
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceRequestStatus::Accepted => "accepted",
            InstanceRequestStatus::Preparing => "preparing",
            InstanceRequestStatus::Provisioning => "provisioning",
            InstanceRequestStatus::Ready => "ready",
            InstanceRequestStatus::Suspending => "suspending",
            InstanceRequestStatus::Suspended => "suspended",
            InstanceRequestStatus::Resuming => "resuming",
            InstanceRequestStatus::Deprovision => "deprovision",
            InstanceRequestStatus::Deleting => "deleting",
            InstanceRequestStatus::Failed => "failed",
        }
    }

    /// Statuses in which a request must carry an assigned cluster.
    pub fn requires_cluster(self) -> bool {
        matches!(
            self,
            InstanceRequestStatus::Preparing
                | InstanceRequestStatus::Provisioning
                | InstanceRequestStatus::Ready
                | InstanceRequestStatus::Suspending
                | InstanceRequestStatus::Suspended
                | InstanceRequestStatus::Resuming
        )
    }

    /// Statuses from which the expiration worker may start a suspension.
    pub fn can_be_automatically_suspended(self) -> bool {
        matches!(
            self,
            InstanceRequestStatus::Accepted
                | InstanceRequestStatus::Preparing
                | InstanceRequestStatus::Provisioning
                | InstanceRequestStatus::Ready
                | InstanceRequestStatus::Resuming
        )
    }

    pub fn is_deleting(self) -> bool {
        matches!(
            self,
            InstanceRequestStatus::Deprovision | InstanceRequestStatus::Deleting
        )
    }

    /// Failed requests no longer hold capacity on their cluster.
    pub fn consumes_capacity(self) -> bool {
        self != InstanceRequestStatus::Failed
    }

    /// Requests the data plane agent is expected to act on.
    pub fn is_visible_to_agent(self) -> bool {
        !matches!(
            self,
            InstanceRequestStatus::Accepted | InstanceRequestStatus::Preparing
        )
    }
}

const _: () = {
    let mut i = 1;
    while i < InstanceRequestStatus::ALL.len() {
        assert!(
            InstanceRequestStatus::ALL[i - 1].ordinal() < InstanceRequestStatus::ALL[i].ordinal()
        );
        i += 1;
    }
};

impl PartialOrd for InstanceRequestStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceRequestStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(*other)
    }
}

impl fmt::Display for InstanceRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cluster ────────────────────────────────────────────────────────

/// Who provisions the cluster's infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Created and deleted through the cloud provider collaborator.
    #[default]
    Ocm,
    /// Pre-existing infrastructure registered by an operator.
    Standalone,
}

/// Ownership model of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    #[default]
    Managed,
    /// Owned by a single organization; only that organization's requests land here.
    Enterprise,
}

/// Per-instance-type capacity of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicCapacityInfo {
    /// Maximum worker nodes of the machine pool backing this instance type.
    pub max_nodes: u32,
    /// Streaming units that fit into `max_nodes`, as last reported by the agent.
    pub max_units: u32,
    /// Streaming units still available, as last reported by the agent.
    pub remaining_units: u32,
}

/// An operator version bundle available on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrimziVersion {
    pub version: String,
    pub ready: bool,
    #[serde(default)]
    pub kafka_versions: Vec<String>,
    #[serde(default)]
    pub kafka_ibp_versions: Vec<String>,
}

/// A backing compute cluster onto which instance requests are placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Internal row identifier.
    pub id: String,
    pub cluster_id: ClusterId,
    /// Identifier assigned by the cloud provider, once created.
    pub external_id: Option<String>,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub provider_type: ProviderType,
    pub cluster_type: ClusterType,
    pub status: ClusterStatus,
    pub status_details: Option<String>,
    pub supported_instance_types: Vec<String>,
    pub schedulable: bool,
    pub dynamic_capacity_info: BTreeMap<String, DynamicCapacityInfo>,
    pub organization_id: Option<String>,
    pub cluster_dns: Option<String>,
    /// Service account the agent authenticates with; removed during cleanup.
    pub service_account: Option<String>,
    pub strimzi_versions: Vec<StrimziVersion>,
    pub created_at: u64,
    pub updated_at: u64,
    /// First time the cluster reached `ready`.
    pub ready_at: Option<u64>,
    pub deleted_at: Option<u64>,
}

impl Cluster {
    /// A freshly registered managed cluster in `accepted`.
    pub fn new(cluster_id: &str, cloud_provider: &str, region: &str, multi_az: bool) -> Self {
        let now = epoch_secs();
        Self {
            id: new_id(),
            cluster_id: cluster_id.to_string(),
            external_id: None,
            cloud_provider: cloud_provider.to_string(),
            region: region.to_string(),
            multi_az,
            provider_type: ProviderType::Ocm,
            cluster_type: ClusterType::Managed,
            status: ClusterStatus::Accepted,
            status_details: None,
            supported_instance_types: vec!["standard".to_string(), "developer".to_string()],
            schedulable: true,
            dynamic_capacity_info: BTreeMap::new(),
            organization_id: None,
            cluster_dns: None,
            service_account: None,
            strimzi_versions: Vec::new(),
            created_at: now,
            updated_at: now,
            ready_at: None,
            deleted_at: None,
        }
    }

    pub fn table_key(&self) -> &str {
        &self.cluster_id
    }

    pub fn supports_instance_type(&self, instance_type: &str) -> bool {
        self.supported_instance_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(instance_type))
    }

    /// Reported maximum streaming units for an instance type (0 when unknown).
    pub fn max_units(&self, instance_type: &str) -> u32 {
        self.dynamic_capacity_info
            .get(instance_type)
            .map(|c| c.max_units)
            .unwrap_or(0)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// New instances may be placed here: live, `ready` and schedulable.
    pub fn accepts_placements(&self) -> bool {
        !self.is_deleted() && self.status == ClusterStatus::Ready && self.schedulable
    }
}

// ── Instance request ───────────────────────────────────────────────

/// A connection route exposed by an instance on its cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    pub prefix: String,
    pub router: String,
}

/// A tenant's request for one managed streaming instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub id: RequestId,
    pub name: String,
    pub owner: String,
    pub organization_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub multi_az: bool,
    pub instance_type: String,
    pub size_id: String,
    /// Streaming units consumed by this request's size.
    pub streaming_units: u32,
    /// Cluster explicitly requested by enterprise tenants.
    pub requested_cluster_id: Option<ClusterId>,
    pub cluster_id: Option<ClusterId>,
    /// Changes whenever the agent must retry the placement on its cluster.
    pub placement_id: Option<String>,
    pub status: InstanceRequestStatus,
    pub desired_billing_model: String,
    pub actual_billing_model: String,
    pub desired_strimzi_version: Option<String>,
    pub actual_strimzi_version: Option<String>,
    pub desired_kafka_version: Option<String>,
    pub actual_kafka_version: Option<String>,
    pub desired_kafka_ibp_version: Option<String>,
    pub actual_kafka_ibp_version: Option<String>,
    pub bootstrap_server_host: Option<String>,
    /// Persisted once when the agent first reports the instance ready.
    pub routes: Option<Vec<Route>>,
    pub failed_reason: Option<String>,
    pub expires_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
    pub deleted_at: Option<u64>,
}

impl InstanceRequest {
    /// A new request in `accepted`, not yet placed.
    pub fn new(
        name: &str,
        owner: &str,
        organization_id: &str,
        cloud_provider: &str,
        region: &str,
        instance_type: &str,
        size_id: &str,
        streaming_units: u32,
    ) -> Self {
        let now = epoch_secs();
        Self {
            id: new_id(),
            name: name.to_string(),
            owner: owner.to_string(),
            organization_id: organization_id.to_string(),
            cloud_provider: cloud_provider.to_string(),
            region: region.to_string(),
            multi_az: instance_type == "standard",
            instance_type: instance_type.to_string(),
            size_id: size_id.to_string(),
            streaming_units,
            requested_cluster_id: None,
            cluster_id: None,
            placement_id: None,
            status: InstanceRequestStatus::Accepted,
            desired_billing_model: "standard".to_string(),
            actual_billing_model: "standard".to_string(),
            desired_strimzi_version: None,
            actual_strimzi_version: None,
            desired_kafka_version: None,
            actual_kafka_version: None,
            desired_kafka_ibp_version: None,
            actual_kafka_ibp_version: None,
            bootstrap_server_host: None,
            routes: None,
            failed_reason: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn table_key(&self) -> &str {
        &self.id
    }

    pub fn desired_billing_model_is_enterprise(&self) -> bool {
        self.desired_billing_model.eq_ignore_ascii_case("enterprise")
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `expires_at` has been reached at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Remaining lifespan in seconds, `None` when the request never expires.
    pub fn remaining_lifespan_secs(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|expires| expires.saturating_sub(now))
    }
}

// ── Conditions ─────────────────────────────────────────────────────

/// A status condition reported by the data plane agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    /// `True`, `False` or `Unknown`.
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(kind: &str, status: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status: status.to_string(),
            reason: None,
            message: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn is_true(&self) -> bool {
        self.status.eq_ignore_ascii_case("true")
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reason
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(reason))
    }
}

/// The `Ready` condition of a report, if present.
pub fn ready_condition(conditions: &[Condition]) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.kind.eq_ignore_ascii_case("ready"))
}

// ── Coordination ───────────────────────────────────────────────────

/// Time-bound record granting one process the leadership of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderLease {
    pub role: String,
    pub holder: String,
    pub expires_at_ms: u64,
}

impl LeaderLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseAcquisition {
    /// Whether the caller holds the lease after the attempt.
    pub acquired: bool,
    /// The lease as stored after the attempt; may belong to someone else.
    pub lease: LeaderLease,
}

/// Row marking a named lock as held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub name: String,
    /// Token of the lock handle holding the row.
    pub holder: String,
    pub acquired_at_ms: u64,
}

// ── Capacity claims ────────────────────────────────────────────────

/// A conditional placement of a request onto a cluster.
#[derive(Debug, Clone)]
pub struct CapacityClaim {
    pub request_id: RequestId,
    pub cluster_id: ClusterId,
    pub placement_id: String,
    /// Maximum streaming units the cluster may carry after the claim.
    pub max_units: u32,
    /// Count only requests of this instance type against `max_units`.
    pub instance_type: Option<String>,
    /// Status the request moves to when the claim succeeds.
    pub next_status: Option<InstanceRequestStatus>,
}

/// Outcome of a capacity claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The request already belongs to the given cluster.
    AlreadyPlaced(ClusterId),
    InsufficientCapacity { consumed: u32, max_units: u32 },
    ClusterNotReady,
    RequestNotFound,
}

// ── Helpers ────────────────────────────────────────────────────────

/// Fresh random identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_status_order_follows_lifecycle() {
        for pair in ClusterStatus::ALL.windows(2) {
            assert_eq!(pair[0].compare_to(pair[1]), Ordering::Less);
        }
        assert!(ClusterStatus::Full.has_reached(ClusterStatus::Ready));
        assert!(!ClusterStatus::Provisioned.has_reached(ClusterStatus::Ready));
    }

    #[test]
    fn nothing_after_ready_sorts_before_provisioning() {
        for status in ClusterStatus::ALL {
            if status.has_reached(ClusterStatus::Ready) {
                assert_eq!(
                    status.compare_to(ClusterStatus::Provisioning),
                    Ordering::Greater
                );
            }
        }
        for status in InstanceRequestStatus::ALL {
            if status.has_reached(InstanceRequestStatus::Ready) {
                assert!(status > InstanceRequestStatus::Provisioning);
            }
        }
    }

    #[test]
    fn status_comparison_is_transitive() {
        for a in InstanceRequestStatus::ALL {
            for b in InstanceRequestStatus::ALL {
                for c in InstanceRequestStatus::ALL {
                    if a < b && b < c {
                        assert!(a < c);
                    }
                }
            }
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ClusterStatus::WaitingForKasFleetshardOperator).unwrap();
        assert_eq!(json, "\"waiting_for_kas_fleetshard_operator\"");
        let parsed: InstanceRequestStatus = serde_json::from_str("\"deprovision\"").unwrap();
        assert_eq!(parsed, InstanceRequestStatus::Deprovision);
        assert_eq!(ClusterStatus::ComputeNodeScalingUp.to_string(), "compute_node_scaling_up");
    }

    #[test]
    fn live_request_statuses_require_a_cluster() {
        assert!(!InstanceRequestStatus::Accepted.requires_cluster());
        assert!(InstanceRequestStatus::Suspended.requires_cluster());
        assert!(!InstanceRequestStatus::Failed.requires_cluster());
    }

    #[test]
    fn request_expiry() {
        let mut req = InstanceRequest::new("a", "u", "org", "aws", "us-east-1", "developer", "x1", 1);
        assert!(!req.is_expired_at(10));
        assert_eq!(req.remaining_lifespan_secs(10), None);

        req.expires_at = Some(100);
        assert!(!req.is_expired_at(99));
        assert!(req.is_expired_at(100));
        assert_eq!(req.remaining_lifespan_secs(40), Some(60));
    }

    #[test]
    fn cluster_instance_type_support_is_case_insensitive() {
        let cluster = Cluster::new("c1", "aws", "us-east-1", true);
        assert!(cluster.supports_instance_type("Standard"));
        assert!(!cluster.supports_instance_type("enterprise"));
        assert_eq!(cluster.max_units("standard"), 0);
    }
}
