//! The data plane agent protocol, independent of transport.

use std::collections::BTreeMap;

use fleet_core::FleetContext;
use fleet_instances::{InstanceService, InstanceStatusReport, apply_status_report};
use fleet_scaling::{ClusterCapacityReport, NodeScaler, ReportOutcome};
use fleet_state::{Cluster, InstanceRequest, InstanceRequestStatus, Route};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::validate_id;
use crate::error::{AgentError, AgentResult};

/// Desired state of one instance as the agent sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub organization_id: String,
    pub placement_id: Option<String>,
    pub instance_type: String,
    pub size_id: String,
    pub streaming_units: u32,
    pub bootstrap_server_host: Option<String>,
    pub strimzi_version: Option<String>,
    pub kafka_version: Option<String>,
    pub kafka_ibp_version: Option<String>,
    pub routes: Option<Vec<Route>>,
    pub suspended: bool,
    pub deleted: bool,
}

impl From<&InstanceRequest> for AgentInstance {
    fn from(r: &InstanceRequest) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            owner: r.owner.clone(),
            organization_id: r.organization_id.clone(),
            placement_id: r.placement_id.clone(),
            instance_type: r.instance_type.clone(),
            size_id: r.size_id.clone(),
            streaming_units: r.streaming_units,
            bootstrap_server_host: r.bootstrap_server_host.clone(),
            strimzi_version: r.desired_strimzi_version.clone(),
            kafka_version: r.desired_kafka_version.clone(),
            kafka_ibp_version: r.desired_kafka_ibp_version.clone(),
            routes: r.routes.clone(),
            suspended: matches!(
                r.status,
                InstanceRequestStatus::Suspending | InstanceRequestStatus::Suspended
            ),
            deleted: r.status == InstanceRequestStatus::Deprovision,
        }
    }
}

/// Handles calls from the agents. Callers are expected to have checked the
/// caller's claim on the cluster.
#[derive(Clone)]
pub struct AgentService {
    ctx: FleetContext,
}

impl AgentService {
    pub fn new(ctx: FleetContext) -> Self {
        Self { ctx }
    }

    pub fn instances(&self) -> InstanceService {
        InstanceService::new(self.ctx.clone())
    }

    fn cluster(&self, cluster_id: &str) -> AgentResult<Cluster> {
        validate_id("cluster", cluster_id)?;
        self.ctx
            .store
            .get_cluster(cluster_id)?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| AgentError::NotFound(format!("cluster {cluster_id}")))
    }

    /// `UpdateClusterStatus`: record capacity and act on the node scaling
    /// the report calls for.
    pub async fn update_cluster_status(
        &self,
        cluster_id: &str,
        report: &ClusterCapacityReport,
    ) -> AgentResult<ReportOutcome> {
        validate_id("cluster", cluster_id)?;
        let outcome = NodeScaler::new(self.ctx.clone())
            .apply_report(cluster_id, report)
            .await?;
        Ok(outcome)
    }

    /// `GetInstanceRequests`: every request on the cluster the agent should
    /// act on.
    pub fn get_instance_requests(&self, cluster_id: &str) -> AgentResult<Vec<AgentInstance>> {
        let cluster = self.cluster(cluster_id)?;
        let instances: Vec<AgentInstance> = self
            .ctx
            .store
            .list_requests_for_cluster(&cluster.cluster_id)?
            .iter()
            .filter(|r| r.status.is_visible_to_agent())
            .map(AgentInstance::from)
            .collect();
        debug!(%cluster_id, count = instances.len(), "instance requests served to agent");
        Ok(instances)
    }

    /// `UpdateInstanceRequestStatus`: apply one report per request.
    ///
    /// Every ID is checked before any report is applied, so an unknown
    /// request rejects the whole batch.
    pub fn update_instance_request_status(
        &self,
        cluster_id: &str,
        reports: &BTreeMap<String, InstanceStatusReport>,
    ) -> AgentResult<BTreeMap<String, InstanceRequestStatus>> {
        let cluster = self.cluster(cluster_id)?;
        for request_id in reports.keys() {
            validate_id("instance request", request_id)?;
            let assigned = self
                .ctx
                .store
                .get_request(request_id)?
                .is_some_and(|r| !r.is_deleted() && r.cluster_id.as_deref() == Some(&cluster.cluster_id));
            if !assigned {
                return Err(AgentError::NotFound(format!("instance request {request_id}")));
            }
        }

        let mut statuses = BTreeMap::new();
        for (request_id, report) in reports {
            let status = apply_status_report(&self.ctx, &cluster.cluster_id, request_id, report)?;
            statuses.insert(request_id.clone(), status);
        }
        Ok(statuses)
    }
}
