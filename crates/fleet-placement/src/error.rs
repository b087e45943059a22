//! Placement error types.

use fleet_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no cluster with free capacity for {instance_type} in {cloud_provider}/{region}")]
    CapacityExhausted {
        cloud_provider: String,
        region: String,
        instance_type: String,
    },

    #[error("instance request not found: {0}")]
    RequestNotFound(String),

    #[error("requested cluster {0} does not belong to the organization")]
    Unauthorized(String),

    #[error("cluster {0} is not ready for placement")]
    ClusterNotReady(String),

    #[error("enterprise request {0} does not name a cluster")]
    MissingClusterId(String),

    #[error("placement claim kept losing to concurrent placements on {0}")]
    Conflict(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl PlacementError {
    /// Errors the caller may retry later once capacity frees up.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            PlacementError::CapacityExhausted { .. } | PlacementError::Conflict(_)
        )
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
