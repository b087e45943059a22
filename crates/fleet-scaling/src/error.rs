use fleet_core::ProviderError;
use fleet_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type ScalingResult<T> = Result<T, ScalingError>;
