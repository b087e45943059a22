//! Bearer credentials for the agent and admin routes.
//!
//! Credentials are static and come from `[[agent.credentials]]`. An agent
//! credential carries the cluster it may report for. A mismatched cluster
//! claim is reported as not found so that callers cannot discover the
//! existence of other clusters.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use fleet_core::FleetConfig;
use regex::Regex;
use tracing::warn;

use crate::error::{AgentError, AgentResult};

pub const AGENT_ROLE: &str = "agent";
pub const ADMIN_ROLE: &str = "admin";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub role: Option<String>,
    pub cluster_id: Option<String>,
}

impl Subject {
    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }
}

/// Resolve the bearer token in `headers` against the configured credentials.
pub fn authenticate(config: &FleetConfig, headers: &HeaderMap) -> AgentResult<Subject> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AgentError::Unauthenticated)?;

    let credential = config.credential(token).ok_or(AgentError::Unauthenticated)?;
    Ok(Subject {
        role: credential.role.clone(),
        cluster_id: credential.cluster_id.clone(),
    })
}

/// Check that `subject` may act as the agent of `cluster_id`.
pub fn authorize_agent(subject: &Subject, cluster_id: &str) -> AgentResult<()> {
    if !subject.has_role(AGENT_ROLE) {
        return Err(AgentError::Forbidden("agent role required".to_string()));
    }
    validate_id("cluster", cluster_id)?;
    if subject.cluster_id.as_deref() != Some(cluster_id) {
        warn!(%cluster_id, claim = ?subject.cluster_id, "agent cluster claim mismatch");
        return Err(AgentError::NotFound(format!("cluster {cluster_id}")));
    }
    Ok(())
}

pub fn authorize_admin(subject: &Subject) -> AgentResult<()> {
    if subject.has_role(ADMIN_ROLE) {
        Ok(())
    } else {
        Err(AgentError::Forbidden("admin role required".to_string()))
    }
}

/// Reject IDs that cannot name a record.
pub fn validate_id(kind: &str, id: &str) -> AgentResult<()> {
    let well_formed = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$")
        .map(|re| re.is_match(id))
        .unwrap_or(false);
    if well_formed {
        Ok(())
    } else {
        Err(AgentError::BadRequest(format!("malformed {kind} id {id:?}")))
    }
}
