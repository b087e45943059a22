//! Instance status reports from the data plane agent.
//!
//! The agent reports one `Ready` condition per instance. `True` completes
//! provisioning or resuming; `False` carries a reason telling what the agent
//! did instead.

use fleet_core::FleetContext;
use fleet_state::{Condition, InstanceRequest, InstanceRequestStatus, Route, new_id, ready_condition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{InstanceError, InstanceResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportedVersions {
    pub strimzi: Option<String>,
    pub kafka: Option<String>,
    pub kafka_ibp: Option<String>,
}

/// Status of one instance as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceStatusReport {
    pub conditions: Vec<Condition>,
    pub versions: ReportedVersions,
    pub routes: Option<Vec<Route>>,
}

/// Apply an agent report to a request assigned to `cluster_id`.
///
/// Returns the request status after the report. A request that does not
/// exist or lives on another cluster is `NotFound`.
pub fn apply_status_report(
    ctx: &FleetContext,
    cluster_id: &str,
    request_id: &str,
    report: &InstanceStatusReport,
) -> InstanceResult<InstanceRequestStatus> {
    let request = ctx
        .store
        .get_request(request_id)?
        .filter(|r| !r.is_deleted() && r.cluster_id.as_deref() == Some(cluster_id))
        .ok_or_else(|| InstanceError::NotFound(request_id.to_string()))?;

    let Some(ready) = ready_condition(&report.conditions) else {
        debug!(%request_id, "status report without a ready condition");
        return Ok(request.status);
    };

    let versions = report.versions.clone();
    let update = plan(&request, ready, report);
    let from = request.status;

    let updated = ctx.store.update_request_if(request_id, &[from], |r| {
        if let Some(v) = versions.strimzi {
            r.actual_strimzi_version = Some(v);
        }
        if let Some(v) = versions.kafka {
            r.actual_kafka_version = Some(v);
        }
        if let Some(v) = versions.kafka_ibp {
            r.actual_kafka_ibp_version = Some(v);
        }
        match update {
            StatusUpdate::Keep => {}
            StatusUpdate::Move(to) => r.status = to,
            StatusUpdate::Ready { routes } => {
                r.status = InstanceRequestStatus::Ready;
                if r.routes.is_none() {
                    r.routes = routes;
                }
            }
            StatusUpdate::Fail(reason) => {
                r.status = InstanceRequestStatus::Failed;
                r.failed_reason = Some(reason);
            }
            StatusUpdate::Replace => r.placement_id = Some(new_id()),
        }
    })?;

    let Some(updated) = updated else {
        // Moved concurrently; the next report will apply against the new status.
        let current = ctx
            .store
            .get_request(request_id)?
            .ok_or_else(|| InstanceError::NotFound(request_id.to_string()))?;
        return Ok(current.status);
    };
    if updated.status != from {
        info!(%request_id, %cluster_id, %from, to = %updated.status, "instance status updated by agent");
    }
    Ok(updated.status)
}

enum StatusUpdate {
    Keep,
    Move(InstanceRequestStatus),
    Ready { routes: Option<Vec<Route>> },
    Fail(String),
    /// The agent could not host the instance; hand out a new placement id.
    Replace,
}

fn plan(request: &InstanceRequest, ready: &Condition, report: &InstanceStatusReport) -> StatusUpdate {
    use InstanceRequestStatus as S;

    let status = request.status;
    if ready.is_true() {
        return match status {
            S::Provisioning | S::Resuming | S::Ready => StatusUpdate::Ready {
                routes: report.routes.clone(),
            },
            _ => StatusUpdate::Keep,
        };
    }

    let reason = ready.reason.as_deref().unwrap_or_default();
    match reason.to_ascii_lowercase().as_str() {
        "suspended" if status == S::Suspending => StatusUpdate::Move(S::Suspended),
        "deleted" if status != S::Deleting => StatusUpdate::Move(S::Deleting),
        "error" if !status.is_deleting() && status != S::Failed => {
            let message = ready.message.clone().unwrap_or_else(|| "reported by agent".to_string());
            warn!(request_id = %request.id, %message, "instance failed on the data plane");
            StatusUpdate::Fail(message)
        }
        "rejected" if status == S::Provisioning => StatusUpdate::Replace,
        _ => {
            debug!(request_id = %request.id, %status, %reason, "instance status noted");
            StatusUpdate::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::FleetConfig;
    use fleet_state::StateStore;

    use super::*;

    fn setup(status: InstanceRequestStatus) -> (FleetContext, String) {
        let (ctx, _) = FleetContext::simulated(FleetConfig::default(), StateStore::open_in_memory().unwrap());
        let mut r = InstanceRequest::new("k", "alice", "org-1", "aws", "us-east-1", "standard", "x1", 1);
        r.cluster_id = Some("c1".into());
        r.placement_id = Some("p1".into());
        r.status = status;
        ctx.store.insert_request(&r).unwrap();
        (ctx, r.id)
    }

    fn report(status: &str, reason: Option<&str>) -> InstanceStatusReport {
        let mut condition = Condition::new("Ready", status);
        if let Some(reason) = reason {
            condition = condition.with_reason(reason).with_message("boom");
        }
        InstanceStatusReport {
            conditions: vec![condition],
            ..InstanceStatusReport::default()
        }
    }

    fn route(name: &str) -> Route {
        Route {
            name: name.to_string(),
            prefix: String::new(),
            router: "router.example".to_string(),
        }
    }

    #[test]
    fn ready_persists_routes_once() {
        let (ctx, id) = setup(InstanceRequestStatus::Provisioning);
        let mut first = report("True", None);
        first.routes = Some(vec![route("bootstrap")]);
        first.versions.kafka = Some("2.8.0".into());
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &first).unwrap(),
            InstanceRequestStatus::Ready
        );

        let mut second = report("True", None);
        second.routes = Some(vec![route("other")]);
        apply_status_report(&ctx, "c1", &id, &second).unwrap();

        let stored = ctx.store.get_request(&id).unwrap().unwrap();
        assert_eq!(stored.routes, Some(vec![route("bootstrap")]));
        assert_eq!(stored.actual_kafka_version.as_deref(), Some("2.8.0"));
    }

    #[test]
    fn suspension_completes_on_report() {
        let (ctx, id) = setup(InstanceRequestStatus::Suspending);
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &report("False", Some("Suspended"))).unwrap(),
            InstanceRequestStatus::Suspended
        );
    }

    #[test]
    fn resume_completes_on_ready() {
        let (ctx, id) = setup(InstanceRequestStatus::Resuming);
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &report("True", None)).unwrap(),
            InstanceRequestStatus::Ready
        );
    }

    #[test]
    fn deleted_and_error_reasons() {
        let (ctx, id) = setup(InstanceRequestStatus::Deprovision);
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &report("False", Some("Deleted"))).unwrap(),
            InstanceRequestStatus::Deleting
        );

        let (ctx, id) = setup(InstanceRequestStatus::Provisioning);
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &report("False", Some("Error"))).unwrap(),
            InstanceRequestStatus::Failed
        );
        let stored = ctx.store.get_request(&id).unwrap().unwrap();
        assert_eq!(stored.failed_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn rejected_gets_a_new_placement_id() {
        let (ctx, id) = setup(InstanceRequestStatus::Provisioning);
        apply_status_report(&ctx, "c1", &id, &report("False", Some("Rejected"))).unwrap();
        let stored = ctx.store.get_request(&id).unwrap().unwrap();
        assert_eq!(stored.status, InstanceRequestStatus::Provisioning);
        assert_ne!(stored.placement_id.as_deref(), Some("p1"));
    }

    #[test]
    fn installing_is_only_noted() {
        let (ctx, id) = setup(InstanceRequestStatus::Provisioning);
        assert_eq!(
            apply_status_report(&ctx, "c1", &id, &report("False", Some("Installing"))).unwrap(),
            InstanceRequestStatus::Provisioning
        );
    }

    #[test]
    fn other_clusters_cannot_report() {
        let (ctx, id) = setup(InstanceRequestStatus::Provisioning);
        assert!(matches!(
            apply_status_report(&ctx, "c2", &id, &report("True", None)),
            Err(InstanceError::NotFound(_))
        ));
    }
}
