use fleet_placement::PlacementError;
use fleet_state::{InstanceRequestStatus, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance request not found: {0}")]
    NotFound(String),

    #[error("cannot {action} a request in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: InstanceRequestStatus,
    },

    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl InstanceError {
    /// Rejected input that retrying will not fix.
    pub fn is_validation(&self) -> bool {
        matches!(self, InstanceError::InvalidTransition { .. })
    }
}

pub type InstanceResult<T> = Result<T, InstanceError>;
