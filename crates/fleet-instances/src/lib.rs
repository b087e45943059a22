//! fleet-instances: the instance request lifecycle.
//!
//! ```text
//! accepted ──place──▶ preparing ──host──▶ provisioning ──agent──▶ ready
//!                                                               │    ▲
//!                                                    suspending ▼    │ resuming
//!                                                          suspended
//! any ──expire/delete──▶ deprovision ──agent──▶ deleting ──▶ soft deleted
//! ```
//!
//! The workers under [`workers`] drive the control-plane side of the
//! lifecycle. [`apply_status_report`] applies what the data plane agent
//! reports, and [`InstanceService`] serves the admin operations.

pub mod error;
pub mod service;
pub mod status;
pub mod versions;
pub mod workers;

pub use error::{InstanceError, InstanceResult};
pub use service::InstanceService;
pub use status::{InstanceStatusReport, ReportedVersions, apply_status_report};
pub use versions::{SelectedVersions, latest_ready};
pub use workers::{
    ACCEPTED_WORKER, AcceptedWorker, DELETING_WORKER, DeletingWorker, EXPIRATION_WORKER, ExpirationWorker,
    PREPARING_WORKER, PreparingWorker,
};
