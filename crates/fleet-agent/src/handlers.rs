//! Route handlers.
//!
//! Each handler authenticates the bearer token, checks the caller's role and
//! cluster claim, then calls into [`AgentService`].

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use fleet_instances::InstanceStatusReport;
use fleet_scaling::ClusterCapacityReport;
use serde::{Deserialize, Serialize};

use crate::AgentState;
use crate::auth::{authenticate, authorize_admin, authorize_agent, validate_id};
use crate::error::AgentResult;
use crate::response::ApiResponse;
use crate::service::AgentService;

fn respond<T: Serialize>(result: AgentResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => e.into_response(),
    }
}

fn agent_for(state: &AgentState, headers: &HeaderMap, cluster_id: &str) -> AgentResult<AgentService> {
    let subject = authenticate(&state.ctx.config, headers)?;
    authorize_agent(&subject, cluster_id)?;
    Ok(state.service.clone())
}

fn admin_for(state: &AgentState, headers: &HeaderMap, request_id: &str) -> AgentResult<AgentService> {
    let subject = authenticate(&state.ctx.config, headers)?;
    authorize_admin(&subject)?;
    validate_id("instance request", request_id)?;
    Ok(state.service.clone())
}

// ── Agent ──────────────────────────────────────────────────────

/// PUT /api/v1/agent-clusters/{id}/status
pub async fn update_cluster_status(
    State(state): State<AgentState>,
    Path(cluster_id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<ClusterCapacityReport>,
) -> Response {
    let service = match agent_for(&state, &headers, &cluster_id) {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };
    respond(service.update_cluster_status(&cluster_id, &report).await)
}

/// GET /api/v1/agent-clusters/{id}/kafkas
pub async fn get_instance_requests(
    State(state): State<AgentState>,
    Path(cluster_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(agent_for(&state, &headers, &cluster_id).and_then(|s| s.get_instance_requests(&cluster_id)))
}

/// PUT /api/v1/agent-clusters/{id}/kafkas/status
pub async fn update_instance_request_status(
    State(state): State<AgentState>,
    Path(cluster_id): Path<String>,
    headers: HeaderMap,
    Json(reports): Json<BTreeMap<String, InstanceStatusReport>>,
) -> Response {
    respond(
        agent_for(&state, &headers, &cluster_id)
            .and_then(|s| s.update_instance_request_status(&cluster_id, &reports)),
    )
}

// ── Admin ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct Placement {
    pub cluster_id: String,
}

/// POST /api/v1/admin/kafkas/{id}/placement
pub async fn place_instance_request(
    State(state): State<AgentState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(admin_for(&state, &headers, &request_id).and_then(|s| {
        let cluster_id = s.instances().place(&request_id)?;
        Ok(Placement { cluster_id })
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuspendResume {
    pub suspended: bool,
}

/// POST /api/v1/admin/kafkas/{id}/suspend
pub async fn suspend_resume(
    State(state): State<AgentState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SuspendResume>,
) -> Response {
    respond(admin_for(&state, &headers, &request_id).and_then(|s| {
        let status = s.instances().suspend_resume(&request_id, body.suspended)?;
        Ok(serde_json::json!({ "id": request_id, "status": status }))
    }))
}
