//! Worker error types.

use fleet_core::{ConfigError, ProviderError};
use fleet_state::StateError;
use thiserror::Error;

/// Errors reported by one reconcile pass.
///
/// Everything except `Fatal` and `Config` is logged and retried on the next
/// tick. A fatal error halts the worker's loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Transient(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_) | WorkerError::Config(_))
    }

    /// Prefix the error with the record it concerns.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            WorkerError::Fatal(msg) => WorkerError::Fatal(format!("{what}: {msg}")),
            WorkerError::Config(e) => WorkerError::Config(e),
            other => WorkerError::Transient(anyhow::anyhow!("{what}: {other}")),
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
