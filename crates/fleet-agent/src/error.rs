//! Agent protocol errors and their transport status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_instances::InstanceError;
use fleet_placement::PlacementError;
use fleet_scaling::ScalingError;
use fleet_state::StateError;
use thiserror::Error;
use tracing::error;

use crate::response::ApiResponse;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("missing or invalid credential")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AgentError::Forbidden(_) => StatusCode::FORBIDDEN,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AgentError::CapacityExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StateError> for AgentError {
    fn from(e: StateError) -> Self {
        AgentError::Internal(e.to_string())
    }
}

impl From<ScalingError> for AgentError {
    fn from(e: ScalingError) -> Self {
        match e {
            ScalingError::ClusterNotFound(id) => AgentError::NotFound(format!("cluster {id}")),
            other => AgentError::Internal(other.to_string()),
        }
    }
}

impl From<PlacementError> for AgentError {
    fn from(e: PlacementError) -> Self {
        match e {
            e if e.is_capacity() => AgentError::CapacityExhausted(e.to_string()),
            PlacementError::RequestNotFound(id) => AgentError::NotFound(format!("instance request {id}")),
            PlacementError::Unauthorized(_) => AgentError::Forbidden(e.to_string()),
            PlacementError::ClusterNotReady(_) | PlacementError::MissingClusterId(_) => {
                AgentError::BadRequest(e.to_string())
            }
            other => AgentError::Internal(other.to_string()),
        }
    }
}

impl From<InstanceError> for AgentError {
    fn from(e: InstanceError) -> Self {
        match e {
            InstanceError::NotFound(id) => AgentError::NotFound(format!("instance request {id}")),
            InstanceError::Placement(e) => e.into(),
            e if e.is_validation() => AgentError::BadRequest(e.to_string()),
            other => AgentError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "agent request failed");
        }
        (status, Json(ApiResponse::<()>::err(self.to_string()))).into_response()
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
